use super::SysDispatcher;
use crate::types::Enablement;
use anyhow::{Result, anyhow};
use std::fmt;
use std::path::PathBuf;

/* Hard links `src` to `dst`. */
pub struct LinkOp {
    pub et: Enablement,
    pub src: PathBuf,
    pub dst: PathBuf,
}

impl LinkOp {
    pub(super) fn apply(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        d.link(&self.src, &self.dst).map_err(|e| {
            anyhow!(
                "cannot link {} to {}: {}",
                self.src.display(),
                self.dst.display(),
                e
            )
        })
    }

    pub(super) fn revert(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        d.remove(&self.dst)
            .map_err(|e| anyhow!("cannot remove {}: {}", self.dst.display(), e))
    }
}

impl fmt::Display for LinkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link {} {}", self.src.display(), self.dst.display())
    }
}
