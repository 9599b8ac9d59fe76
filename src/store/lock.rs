use super::StoreError;
use log::trace;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/** An exclusive flock on a store lock file, released on drop. */
pub struct Lock {
    path: PathBuf,
    lock: Option<Flock<File>>,
}

impl Lock {
    /** Blocks until the lock file at `path` is held exclusively. */
    pub fn acquire(path: &Path) -> Result<Lock, StoreError> {
        trace!("Acquiring lock {}", path.display());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(|e| StoreError::Open(path.to_path_buf(), e))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| StoreError::Open(path.to_path_buf(), e.into()))?;

        trace!("Acquired lock {}", path.display());
        Ok(Lock {
            path: path.to_path_buf(),
            lock: Some(lock),
        })
    }

    pub fn release(mut self) -> Result<(), StoreError> {
        trace!("Unlocking lock {}", self.path.display());
        match self.lock.take() {
            Some(lock) => lock.unlock().map(drop).map_err(|(_, e)| {
                StoreError::Unlock(self.path.clone(), e.into())
            }),
            None => Ok(()),
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.lock.is_some() {
            trace!("Unlocking lock {}", self.path.display());
        }
    }
}
