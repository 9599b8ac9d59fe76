mod finalise;
mod hsu;
pub mod monitor;
pub mod ops;
mod paths;
pub mod shim;
pub mod signal;

pub use finalise::*;
pub use hsu::*;
pub use paths::*;

use crate::container::Params;
use crate::dispatcher::Dispatcher;
use crate::system::{AclPerms, PROCESS, SystemState, USER};
use crate::types::{
    ApplyState, Config, ContainerConfig, Enablement, FilesystemConfig,
    InstanceId,
};
use ops::Op;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const PAYLOAD_VERSION: u32 = 1;

pub const WAIT_DELAY_DEFAULT: Duration = Duration::from_secs(5);
pub const WAIT_DELAY_MAX: Duration = Duration::from_secs(30);
/// Extra time given to the shim beyond its wait delay.
pub const SHIM_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the shim to accept its setup payload.
pub const SHIM_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CANCEL: i32 = 2;
pub const EXIT_ORPHAN: i32 = 3;
pub const EXIT_BAD_WAIT: i32 = 127;
pub const EXIT_REQUEST: i32 = 254;

/// Environment variables read by the setuid helper.
pub const IDENTITY_ENV: &str = "RAMPART_IDENTITY";
pub const GROUPS_ENV: &str = "RAMPART_GROUPS";

/// Directory inside the container holding generated files.
pub const PRIVATE_TMP: &str = "/.rampart";

/// Sandbox uid of `identity` for the user `user_id`.
pub fn to_uid(user_id: u32, identity: u32) -> u32 {
    1_000_000 + user_id * 10_000 + identity
}

/** Values the shim needs beyond the container description. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShimParams {
    /// Only SIGCONT from this process counts as an exit request.
    pub monitor_pid: i32,
    pub wait_delay_ms: u64,
    pub verbose: bool,
    /// Container init executable.
    pub init: PathBuf,
    pub ops: Vec<Op>,
}

/** The plan built by the monitor and carried out by the shim. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutcomeState {
    pub shim: ShimParams,

    pub id: InstanceId,
    pub app_id: String,
    pub identity: u32,
    pub user_id: u32,
    pub mapuid: u32,
    pub mapgid: u32,
    pub enablements: Enablement,
    pub direct_wayland: bool,
    pub container: ContainerConfig,
    pub paths: Paths,
}

impl OutcomeState {
    pub fn uid(&self) -> u32 {
        to_uid(self.user_id, self.identity)
    }

    pub fn wait_delay(&self) -> Duration {
        Duration::from_millis(self.shim.wait_delay_ms)
    }
}

/** Versioned envelope written to the setup pipe. */
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payload {
    pub version: u32,
    pub state: OutcomeState,
}

/** Monitor side working set of the first phase. Never transmitted. */
pub struct SysState<'a> {
    pub state: &'a OutcomeState,
    pub config: &'a Config,
    pub sys: &'a mut SystemState,
    pub d: &'a dyn Dispatcher,

    use_runtime_dir: bool,
    instance: Option<PathBuf>,
    runtime: Option<PathBuf>,
}

impl<'a> SysState<'a> {
    pub fn new(
        state: &'a OutcomeState,
        config: &'a Config,
        sys: &'a mut SystemState,
        d: &'a dyn Dispatcher,
    ) -> Self {
        Self {
            state,
            config,
            sys,
            d,
            use_runtime_dir: false,
            instance: None,
            runtime: None,
        }
    }

    pub fn paths(&self) -> &'a Paths {
        &self.state.paths
    }

    /// Grants traversal of the runtime directories, once.
    pub fn ensure_runtime_dir(&mut self) {
        if self.use_runtime_dir {
            return;
        }
        self.use_runtime_dir = true;

        let paths = self.paths();
        self.sys
            .ensure(paths.run_dir_path.clone(), 0o700)
            .update_perm_type(USER, paths.run_dir_path.clone(), AclPerms::EXECUTE)
            .ensure(paths.runtime_path.clone(), 0o700)
            .update_perm_type(USER, paths.runtime_path.clone(), AclPerms::EXECUTE);
    }

    /// Per instance directory under the share path.
    pub fn instance(&mut self) -> PathBuf {
        if let Some(instance) = &self.instance {
            return instance.clone();
        }
        let instance = self.paths().share_path.join(self.state.id.to_string());
        self.sys.ephemeral(PROCESS, instance.clone(), 0o711);
        self.instance = Some(instance.clone());
        instance
    }

    /// Per instance directory under the runtime directory.
    pub fn runtime(&mut self) -> PathBuf {
        if let Some(runtime) = &self.runtime {
            return runtime.clone();
        }
        self.ensure_runtime_dir();
        let runtime = self.paths().run_dir_path.join(self.state.id.to_string());
        self.sys
            .ephemeral(PROCESS, runtime.clone(), 0o700)
            .update_perm(runtime.clone(), AclPerms::EXECUTE);
        self.runtime = Some(runtime.clone());
        runtime
    }
}

/** Shim side working set of the second phase. */
pub struct ParamsState<'a> {
    pub state: &'a OutcomeState,
    pub params: Params,
    pub env: BTreeMap<String, String>,
    /// Set by the runtime op, read by everything binding into it.
    pub runtime_dir: Option<PathBuf>,
    /// Entries left after an early root entry was taken out.
    pub filesystem: &'a [FilesystemConfig],
    pub apply: ApplyState,
}

impl<'a> ParamsState<'a> {
    pub fn new(state: &'a OutcomeState) -> Self {
        Self {
            state,
            params: Params::default(),
            env: state.container.env.clone(),
            runtime_dir: None,
            filesystem: &state.container.filesystem,
            apply: ApplyState {
                auto_etc_prefix: state.id.to_string(),
            },
        }
    }

    pub fn container(&self) -> &'a ContainerConfig {
        &self.state.container
    }

    /// Host side per instance directory under the share path.
    pub fn instance_path(&self) -> PathBuf {
        self.state.paths.share_path.join(self.state.id.to_string())
    }

    /// Host side per instance directory under the runtime directory.
    pub fn runtime_path(&self) -> PathBuf {
        self.state.paths.run_dir_path.join(self.state.id.to_string())
    }

    /// Runtime directory inside the container, `/run/user/<mapuid>`.
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(|| {
            PathBuf::from(format!("/run/user/{}", self.state.mapuid))
        })
    }
}
