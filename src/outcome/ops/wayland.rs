use crate::container::BindFlags;
use crate::error::NotEnabled;
use crate::outcome::{ParamsState, SysState};
use crate::system::AclPerms;
use crate::types::Enablement;
use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const WAYLAND_DISPLAY: &str = "WAYLAND_DISPLAY";
pub const WAYLAND_FALLBACK: &str = "wayland-0";

/** Exports the Wayland compositor, through a security context unless
 * direct access was asked for. Runs after the runtime op.
 */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaylandOp {
    /// Host compositor socket, only set for direct access.
    pub socket_path: Option<PathBuf>,
}

impl WaylandOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        if !s.state.enablements.has(Enablement::WAYLAND) {
            return Err(NotEnabled.into());
        }

        let socket_path = match s.d.lookup_env(WAYLAND_DISPLAY) {
            None => {
                debug!("{} is not set, assuming {}", WAYLAND_DISPLAY, WAYLAND_FALLBACK);
                s.paths().runtime_path.join(WAYLAND_FALLBACK)
            }
            Some(name) if PathBuf::from(&name).is_absolute() => PathBuf::from(name),
            Some(name) => s.paths().runtime_path.join(name),
        };

        if !s.state.direct_wayland {
            let app_id = if s.state.app_id.is_empty() {
                format!("app.rampart.{}", s.state.id)
            } else {
                s.state.app_id.clone()
            };
            let instance = s.instance();
            s.sys.wayland(
                instance.join("wayland"),
                socket_path,
                app_id,
                s.state.id.to_string(),
            );
        } else {
            warn!("Direct wayland access, proceed with caution");
            s.ensure_runtime_dir();
            s.sys.update_perm_type(
                Enablement::WAYLAND,
                socket_path.clone(),
                AclPerms::RWX,
            );
            self.socket_path = Some(socket_path);
        }
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        let inner = z.runtime_dir().join(WAYLAND_FALLBACK);
        z.env.insert(WAYLAND_DISPLAY.into(), WAYLAND_FALLBACK.into());
        let source = match &self.socket_path {
            Some(socket_path) => socket_path.clone(),
            None => z.instance_path().join("wayland"),
        };
        z.params.bind(source, inner, BindFlags::NONE);
        Ok(())
    }
}
