use super::container_error;
use super::filesystem::resolve_root;
use crate::container::{BindFlags, SeccompFlags, SeccompPresets};
use crate::outcome::{PRIVATE_TMP, ParamsState, SysState};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/** Fills in the unordered container params and the early mounts,
 * including an optional root filesystem. Always runs first.
 */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsOp {
    /// `$TERM` of the caller, if set.
    pub term: Option<String>,
}

impl ParamsOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        self.term = s.d.lookup_env("TERM");
        s.sys.ensure(s.paths().share_path.clone(), 0o711);
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        if let Some(term) = &self.term {
            z.env.insert("TERM".into(), term.clone());
        }

        let c = z.container();
        z.params.hostname = c.hostname.clone();
        z.params.retain_session = c.tty;
        z.params.host_net = c.host_net;
        z.params.host_abstract = c.host_abstract;

        let path = c
            .path
            .as_ref()
            .ok_or_else(|| container_error("invalid program path"))?;
        z.params.path = path.clone();
        z.params.args = if c.args.is_empty() {
            vec![path.display().to_string()]
        } else {
            c.args.clone()
        };

        // the shim cancels the container instead of exiting on request
        z.params.forward_cancel = z.state.shim.wait_delay_ms > 0;

        if c.multiarch {
            z.params.seccomp_flags |= SeccompFlags::ALLOW_MULTIARCH;
        }
        if !c.seccomp_compat {
            z.params.seccomp_presets |= SeccompPresets::EXT;
        }
        if !c.devel {
            z.params.seccomp_presets |= SeccompPresets::DENY_DEVEL;
        }
        if !c.userns {
            z.params.seccomp_presets |= SeccompPresets::DENY_NS;
        }
        if !c.tty {
            z.params.seccomp_presets |= SeccompPresets::DENY_TTY;
        }

        if c.map_real_uid {
            z.params.uid = z.state.mapuid;
            z.params.gid = z.state.mapgid;
        }

        let (root, filesystem, _) = resolve_root(&c.filesystem);
        z.filesystem = filesystem;
        if let Some(root) = root {
            root.apply(&z.apply, &mut z.params);
        }

        z.params.proc("/proc").tmpfs(PRIVATE_TMP, 1 << 12, 0o755);
        if !c.device {
            z.params.dev("/dev", true);
        } else {
            z.params
                .bind("/dev", "/dev", BindFlags::WRITABLE | BindFlags::DEVICE);
        }
        // /dev goes readonly later, /dev/shm must not
        z.params.tmpfs("/dev/shm", 0, 0o1777);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerOp;
    use crate::outcome::ops::test_support::{config, describe, state};
    use crate::system::SystemState;
    use crate::testing::{Recorder, SysRecorder};
    use crate::types::{FilesystemConfig, FsBind};
    use std::sync::Arc;

    #[test]
    fn test_params_to_system() -> Result<()> {
        let config = config();
        let state = state(&config);
        let mut d = Recorder::default();
        d.env.insert("TERM".into(), "xterm-256color".into());
        let mut sys = SystemState::new(state.uid(), Arc::new(SysRecorder::default()));

        let mut op = ParamsOp::default();
        op.to_system(&mut SysState::new(&state, &config, &mut sys, &d))?;
        assert_eq!(op.term.as_deref(), Some("xterm-256color"));
        assert_eq!(
            describe(&sys),
            vec!["mkdir ensure /tmp/rampart.0 0711 [user]"]
        );
        Ok(())
    }

    #[test]
    fn test_params_to_container() -> Result<()> {
        let mut config = config();
        if let Some(c) = config.container.as_mut() {
            c.filesystem = vec![FilesystemConfig::Bind(FsBind {
                src: "/var/lib/rampart/base/org.debian".into(),
                dst: Some("/".into()),
                write: true,
                special: true,
                ..FsBind::default()
            })];
        }
        let state = state(&config);
        let mut z = ParamsState::new(&state);
        ParamsOp::default().to_container(&mut z)?;

        assert!(z.filesystem.is_empty());
        assert_eq!(z.params.hostname, "localhost");
        assert_eq!(z.params.args, vec!["chromium", "--ignore-gpu-blocklist"]);
        assert!(z.params.forward_cancel);
        assert_eq!(
            z.params.seccomp_presets,
            SeccompPresets::EXT | SeccompPresets::DENY_DEVEL | SeccompPresets::DENY_TTY
        );
        assert_eq!(z.params.uid, 0);
        assert_eq!(
            z.params.ops,
            vec![
                ContainerOp::Root {
                    host: "/var/lib/rampart/base/org.debian".into(),
                    flags: BindFlags::WRITABLE,
                },
                ContainerOp::Proc {
                    target: "/proc".into()
                },
                ContainerOp::Tmpfs {
                    target: "/.rampart".into(),
                    size: 4096,
                    perm: 0o755,
                },
                ContainerOp::Bind {
                    source: "/dev".into(),
                    target: "/dev".into(),
                    flags: BindFlags::WRITABLE | BindFlags::DEVICE,
                },
                ContainerOp::Tmpfs {
                    target: "/dev/shm".into(),
                    size: 0,
                    perm: 0o1777,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_params_invalid_program_path() {
        let mut config = config();
        if let Some(c) = config.container.as_mut() {
            c.path = None;
        }
        let state = state(&config);
        let mut z = ParamsState::new(&state);
        let err = ParamsOp::default().to_container(&mut z).err();
        assert_eq!(
            err.map(|e| e.to_string()).as_deref(),
            Some("invalid program path")
        );
    }
}
