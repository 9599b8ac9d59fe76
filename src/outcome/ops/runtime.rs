use crate::container::BindFlags;
use crate::outcome::{ParamsState, SysState};
use crate::system::{AclPerms, USER};
use crate::types::Enablement;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Unspecified,
    Tty,
    X11,
    Wayland,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Unspecified => "unspecified",
            SessionType::Tty => "tty",
            SessionType::X11 => "x11",
            SessionType::Wayland => "wayland",
        }
    }
}

/** Sets up `XDG_RUNTIME_DIR` inside the container, optionally backed by
 * a directory shared between instances of the same identity.
 */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeOp {
    pub session_type: SessionType,
}

fn shared_paths(
    share_path: &std::path::Path,
    identity: u32,
) -> (PathBuf, PathBuf) {
    let dir = share_path.join("runtime");
    let inst = dir.join(identity.to_string());
    (dir, inst)
}

impl RuntimeOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        if s.state.container.share_runtime {
            let (dir, inst) =
                shared_paths(&s.paths().share_path, s.state.identity);
            s.sys
                .ensure(dir.clone(), 0o700)
                .update_perm_type(USER, dir, AclPerms::EXECUTE)
                .ensure(inst.clone(), 0o700)
                .update_perm_type(USER, inst, AclPerms::RWX);
        }

        self.session_type = if s.state.enablements.has(Enablement::WAYLAND) {
            SessionType::Wayland
        } else if s.state.enablements.has(Enablement::X11) {
            SessionType::X11
        } else {
            SessionType::Tty
        };
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        let runtime_dir =
            PathBuf::from(format!("/run/user/{}", z.state.mapuid));
        z.runtime_dir = Some(runtime_dir.clone());
        z.env.insert(
            "XDG_RUNTIME_DIR".into(),
            runtime_dir.display().to_string(),
        );
        z.env.insert("XDG_SESSION_CLASS".into(), "user".into());
        z.env.insert(
            "XDG_SESSION_TYPE".into(),
            self.session_type.as_str().into(),
        );

        z.params.tmpfs("/run/user", 1 << 12, 0o755);
        if z.state.container.share_runtime {
            let (_, inst) =
                shared_paths(&z.state.paths.share_path, z.state.identity);
            z.params.bind(inst, runtime_dir, BindFlags::WRITABLE);
        } else {
            z.params.mkdir(runtime_dir, 0o700);
        }
        Ok(())
    }
}
