use super::{Broker, SysDispatcher};
use anyhow::{Result, anyhow};
use log::debug;
use std::fmt;
use std::io;
use std::path::PathBuf;

/* Binds a security context restricted socket at `dst` on the compositor
 * listening at `src`. The binding lives as long as its handle.
 */
pub struct WaylandOp {
    pub dst: PathBuf,
    pub src: PathBuf,
    pub app_id: String,
    pub instance_id: String,
    pub(super) handle: Option<Box<dyn Broker>>,
}

impl WaylandOp {
    pub(super) fn apply(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        if self.handle.is_some() {
            return Err(anyhow!("attempted to attach multiple wayland sockets"));
        }
        let handle = d
            .wayland_bind(&self.dst, &self.src, &self.app_id, &self.instance_id)
            .map_err(|e| {
                anyhow!(
                    "cannot bind wayland socket on {}: {:#}",
                    self.dst.display(),
                    e
                )
            })?;
        debug!("Wayland socket attached on {}", self.dst.display());
        self.handle = Some(handle);
        Ok(())
    }

    pub(super) fn revert(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        let mut errors = Vec::new();
        match d.remove(&self.dst) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => errors.push(format!(
                "cannot remove {}: {}",
                self.dst.display(),
                e
            )),
        }
        if let Some(mut handle) = self.handle.take() {
            debug!("Detaching wayland socket {}", self.dst.display());
            if let Err(e) = handle.close() {
                errors.push(format!("cannot close wayland helper: {:#}", e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(errors.join(", ")))
        }
    }
}

impl fmt::Display for WaylandOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wayland socket {} on {} for {}",
            self.dst.display(),
            self.src.display(),
            self.app_id
        )
    }
}
