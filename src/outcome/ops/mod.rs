mod account;
mod dbus;
mod filesystem;
mod params;
mod pulse;
mod runtime;
mod tmpdir;
mod wayland;

pub use account::*;
pub use dbus::*;
pub use filesystem::*;
pub use params::*;
pub use pulse::*;
pub use runtime::*;
pub use tmpdir::*;
pub use wayland::*;

use super::{ParamsState, SysState};
use crate::error::AppError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/** One setup operation, split between the monitor and the shim.
 *
 * `to_system` runs in the monitor before any child exists and may only
 * register tracked actions and fill in the fields of the op itself.
 * Whatever it fills in is transmitted. `to_container` runs in the shim
 * and is a pure function of those fields and the outcome state.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Op {
    Params(ParamsOp),
    Runtime(RuntimeOp),
    Tmpdir(TmpdirOp),
    Account(AccountOp),
    Wayland(WaylandOp),
    Pulse(PulseOp),
    DBus(DBusOp),
    Filesystem(FilesystemOp),
}

impl Op {
    /// Every op, in the order they run. Params comes first and
    /// filesystem last.
    pub fn canonical() -> Vec<Op> {
        vec![
            Op::Params(ParamsOp::default()),
            Op::Runtime(RuntimeOp::default()),
            Op::Tmpdir(TmpdirOp::default()),
            Op::Account(AccountOp::default()),
            Op::Wayland(WaylandOp::default()),
            Op::Pulse(PulseOp::default()),
            Op::DBus(DBusOp::default()),
            Op::Filesystem(FilesystemOp::default()),
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Params(_) => "params",
            Op::Runtime(_) => "runtime",
            Op::Tmpdir(_) => "tmpdir",
            Op::Account(_) => "account",
            Op::Wayland(_) => "wayland",
            Op::Pulse(_) => "pulse",
            Op::DBus(_) => "dbus",
            Op::Filesystem(_) => "filesystem",
        }
    }

    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        match self {
            Op::Params(op) => op.to_system(s),
            Op::Runtime(op) => op.to_system(s),
            Op::Tmpdir(op) => op.to_system(s),
            Op::Account(op) => op.to_system(s),
            Op::Wayland(op) => op.to_system(s),
            Op::Pulse(op) => op.to_system(s),
            Op::DBus(op) => op.to_system(s),
            Op::Filesystem(op) => op.to_system(s),
        }
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        match self {
            Op::Params(op) => op.to_container(z),
            Op::Runtime(op) => op.to_container(z),
            Op::Tmpdir(op) => op.to_container(z),
            Op::Account(op) => op.to_container(z),
            Op::Wayland(op) => op.to_container(z),
            Op::Pulse(op) => op.to_container(z),
            Op::DBus(op) => op.to_container(z),
            Op::Filesystem(op) => op.to_container(z),
        }
    }
}

pub(crate) fn finalise_error(msg: impl Into<String>) -> anyhow::Error {
    AppError::new("finalise", msg).into()
}

pub(crate) fn container_error(msg: impl Into<String>) -> anyhow::Error {
    AppError::new("container", msg).into()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::outcome::{OutcomeState, Paths, ShimParams};
    use crate::system::{PROCESS, SystemState, USER};
    use crate::types::{Config, ContainerConfig, Enablement, InstanceId};
    use std::collections::BTreeMap;

    /// Tracked ops as `<op> [<scope>]`.
    pub fn describe(sys: &SystemState) -> Vec<String> {
        sys.ops()
            .iter()
            .map(|op| {
                let scope = match op.scope() {
                    USER => "user".to_string(),
                    PROCESS => "process".to_string(),
                    et => et.to_string(),
                };
                format!("{} [{}]", op, scope)
            })
            .collect()
    }

    pub const ID: InstanceId = InstanceId::from_bytes([
        0x18, 0x3c, 0x9e, 0x2a, 0x55, 0x10, 0x00, 0x00, 0x9b, 0x3e, 0x61,
        0xd2, 0x7f, 0x40, 0x0c, 0xa1,
    ]);

    pub fn config() -> Config {
        Config {
            id: "org.chromium.Chromium".into(),
            enablements: Enablement::WAYLAND
                | Enablement::DBUS
                | Enablement::PULSE,
            identity: 9,
            groups: vec!["video".into()],
            container: Some(ContainerConfig {
                hostname: "localhost".into(),
                wait_delay: -1,
                env: BTreeMap::from([
                    ("GOOGLE_API_KEY".to_string(), "AIzaSy".to_string()),
                ]),
                username: "chronos".into(),
                shell: Some("/run/current-system/sw/bin/zsh".into()),
                home: Some("/data/data/org.chromium.Chromium".into()),
                path: Some("/run/current-system/sw/bin/chromium".into()),
                args: vec!["chromium".into(), "--ignore-gpu-blocklist".into()],
                userns: true,
                host_net: true,
                host_abstract: true,
                device: true,
                ..ContainerConfig::default()
            }),
            ..Config::default()
        }
    }

    pub fn state(config: &Config) -> OutcomeState {
        OutcomeState {
            shim: ShimParams {
                monitor_pid: 0xdead,
                wait_delay_ms: 5000,
                verbose: false,
                init: "/usr/libexec/rampart/init".into(),
                ops: Vec::new(),
            },
            id: ID,
            app_id: config.id.clone(),
            identity: config.identity,
            user_id: 0,
            mapuid: 1000,
            mapgid: 100,
            enablements: config.enablements,
            direct_wayland: config.direct_wayland,
            container: config.container.clone().unwrap_or_default(),
            paths: Paths {
                share_path: "/tmp/rampart.0".into(),
                run_dir_path: "/run/user/1971/rampart".into(),
                runtime_path: "/run/user/1971".into(),
            },
        }
    }
}
