//! Live instance records, segmented per identity.
//!
//! ```text
//! <share>/state/lock
//! <share>/state/<identity>/lock
//! <share>/state/<identity>/<instance id>
//! ```
//!
//! Every access to a segment happens under its lock. Entry files carry a
//! fixed header holding the instance's enablements so cleanup can compute
//! its revert scope without decoding the records.

mod entry;
mod lock;

pub use entry::*;
use lock::Lock;

use crate::types::{
    Enablement, IDENTITY_MAX, IDENTITY_MIN, InstanceId, InstanceRecord,
};
use log::{trace, warn};
use std::fs::{DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "lock";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot lock {}: {1}", .0.display())]
    Open(PathBuf, #[source] io::Error),
    #[error("cannot unlock {}: {1}", .0.display())]
    Unlock(PathBuf, #[source] io::Error),
    #[error("cannot access {}: {1}", .0.display())]
    Io(PathBuf, #[source] io::Error),
    #[error("invalid store entry {}: {1}", .0.display())]
    Decode(PathBuf, String),
}

fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    match DirBuilder::new().recursive(true).mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) => Err(StoreError::Io(path.to_path_buf(), e)),
    }
}

/** The store rooted at `<share>/state`. */
#[derive(Debug, Clone)]
pub struct Store {
    base: PathBuf,
}

impl Store {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn handle(&self, identity: u32) -> Handle {
        Handle {
            base: self.base.clone(),
            identity,
            path: self.base.join(identity.to_string()),
        }
    }

    /** Every identity segment present. Stray entries are reported and
     * skipped.
     */
    pub fn segments(&self) -> Result<Vec<Handle>, StoreError> {
        let dir = match std::fs::read_dir(&self.base) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::Io(self.base.clone(), e)),
        };

        let mut segments = Vec::new();
        for entry in dir {
            let entry =
                entry.map_err(|e| StoreError::Io(self.base.clone(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE {
                continue;
            }
            match name.parse::<u32>() {
                Ok(identity)
                    if (IDENTITY_MIN..=IDENTITY_MAX).contains(&identity) =>
                {
                    segments.push(self.handle(identity));
                }
                Ok(identity) => {
                    warn!("Skipping out of range identity {}", identity);
                }
                Err(_) => warn!("Skipping stray store entry {:?}", name),
            }
        }
        segments.sort_by_key(|h| h.identity);
        Ok(segments)
    }

    /** Records of every segment, each loaded under its own lock. */
    pub fn all(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let mut records = Vec::new();
        for handle in self.segments()? {
            let cursor = handle.lock()?;
            for entry in cursor.entries()? {
                match entry.load() {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("{}", e),
                }
            }
            cursor.unlock()?;
        }
        Ok(records)
    }
}

/** One identity segment, not yet locked. */
#[derive(Debug, Clone)]
pub struct Handle {
    base: PathBuf,
    pub identity: u32,
    pub path: PathBuf,
}

impl Handle {
    /** Creates the segment as needed and takes its lock. */
    pub fn lock(&self) -> Result<Cursor, StoreError> {
        ensure_dir(&self.base)?;
        if !self.path.is_dir() {
            let store_lock = Lock::acquire(&self.base.join(LOCK_FILE))?;
            ensure_dir(&self.path)?;
            store_lock.release()?;
        }
        let lock = Lock::acquire(&self.path.join(LOCK_FILE))?;
        Ok(Cursor {
            path: self.path.clone(),
            lock,
        })
    }
}

/** A locked segment. */
pub struct Cursor {
    path: PathBuf,
    lock: Lock,
}

impl Cursor {
    pub fn entries(&self) -> Result<Vec<EntryHandle>, StoreError> {
        let dir = std::fs::read_dir(&self.path)
            .map_err(|e| StoreError::Io(self.path.clone(), e))?;
        let mut entries = Vec::new();
        for entry in dir {
            let entry =
                entry.map_err(|e| StoreError::Io(self.path.clone(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE {
                continue;
            }
            if name.starts_with('.') {
                trace!("Skipping pending segment entry {:?}", name);
                continue;
            }
            match name.parse::<InstanceId>() {
                Ok(id) => entries.push(EntryHandle::new(&self.path, id)),
                Err(_) => warn!("Skipping stray segment entry {:?}", name),
            }
        }
        entries.sort_by(|a, b| a.id.as_bytes().cmp(b.id.as_bytes()));
        Ok(entries)
    }

    pub fn load(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        self.entries()?.iter().map(EntryHandle::load).collect()
    }

    /// Enablements of every entry, read from headers only. A bad entry
    /// fails on its own.
    pub fn load_header(
        &self,
    ) -> Result<Vec<Result<Enablement, StoreError>>, StoreError> {
        Ok(self.entries()?.iter().map(EntryHandle::load_header).collect())
    }

    pub fn save(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let entry = EntryHandle::new(&self.path, record.id);
        trace!("Saving instance record {}", entry.path.display());
        let body = serde_json::to_vec(record)
            .map_err(|e| StoreError::Decode(entry.path.clone(), e.to_string()))?;

        // written aside and linked into place, so a reader never sees a
        // partial entry
        let pending = self.path.join(format!(".{}", record.id));
        let written = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&pending)
            .and_then(|mut file| {
                file.write_all(&encode_header(record.enablements()))?;
                file.write_all(&body)?;
                file.sync_all()
            })
            .map_err(|e| StoreError::Io(pending.clone(), e))
            .and_then(|()| {
                std::fs::hard_link(&pending, &entry.path)
                    .map_err(|e| StoreError::Io(entry.path.clone(), e))
            });
        if let Err(e) = std::fs::remove_file(&pending) {
            warn!("Cannot remove {}: {}", pending.display(), e);
        }
        written
    }

    pub fn destroy(&self, id: &InstanceId) -> Result<(), StoreError> {
        let entry = EntryHandle::new(&self.path, *id);
        trace!("Destroying instance record {}", entry.path.display());
        std::fs::remove_file(&entry.path)
            .map_err(|e| StoreError::Io(entry.path, e))
    }

    pub fn unlock(self) -> Result<(), StoreError> {
        self.lock.release()
    }
}
