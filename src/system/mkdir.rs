use super::SysDispatcher;
use crate::types::Enablement;
use anyhow::{Result, anyhow};
use std::fmt;
use std::io;
use std::path::PathBuf;

/* Creates a directory and sets its mode. An ensured directory may already
 * exist and is left in place on revert, an ephemeral one must not exist
 * yet and is removed again.
 */
pub struct MkdirOp {
    pub et: Enablement,
    pub path: PathBuf,
    pub perm: u32,
    pub ephemeral: bool,
}

impl MkdirOp {
    pub(super) fn apply(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        match d.mkdir(&self.path, self.perm) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && !self.ephemeral => (),
            Err(e) => {
                return Err(anyhow!(
                    "cannot create directory {}: {}",
                    self.path.display(),
                    e
                ));
            }
        }

        // mkdir is subject to umask
        d.chmod(&self.path, self.perm).map_err(|e| {
            anyhow!("cannot chmod {}: {}", self.path.display(), e)
        })
    }

    pub(super) fn revert(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        if !self.ephemeral {
            return Ok(());
        }
        d.remove(&self.path).map_err(|e| {
            anyhow!("cannot remove directory {}: {}", self.path.display(), e)
        })
    }
}

impl fmt::Display for MkdirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.ephemeral { "ephemeral" } else { "ensure" };
        write!(f, "mkdir {} {} {:04o}", kind, self.path.display(), self.perm)
    }
}
