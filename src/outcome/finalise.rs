use super::ops::Op;
use super::{
    Hsu, OutcomeState, Paths, ShimParams, SysState, WAIT_DELAY_DEFAULT,
    WAIT_DELAY_MAX, to_uid,
};
use crate::dispatcher::Dispatcher;
use crate::error::{AppError, is_not_enabled};
use crate::system::{SysDispatcher, SystemState};
use crate::types::{Config, IDENTITY_MAX, IDENTITY_MIN, InstanceId};
use anyhow::Result;
use log::{debug, trace};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/** A fully planned launch. Nothing in here has touched the host yet. */
pub struct Outcome {
    pub state: OutcomeState,
    pub sys: SystemState,
    /// Supplementary group ids handed to the setuid helper.
    pub supp: Vec<u32>,
}

fn check_absolute(path: &Option<PathBuf>, what: &str) -> Result<()> {
    match path {
        Some(p) if p.is_absolute() => Ok(()),
        _ => Err(AppError::new("finalise", format!("invalid {}", what)).into()),
    }
}

/// Bounds the configured wait delay to what the shim accepts.
pub fn wait_delay_ms(configured: i64) -> u64 {
    if configured <= 0 {
        return WAIT_DELAY_DEFAULT.as_millis() as u64;
    }
    (configured as u64).min(WAIT_DELAY_MAX.as_millis() as u64)
}

/** Validates `config` and plans every op against a fresh tracker.
 *
 * Ops whose enablement is unset are dropped. Any other op error aborts,
 * leaving the host untouched.
 */
pub fn finalise(
    d: &dyn Dispatcher,
    sys_d: Arc<dyn SysDispatcher>,
    hsu: &Hsu,
    id: InstanceId,
    config: &Config,
    init: &Path,
    verbose: bool,
) -> Result<Outcome> {
    let container = config.container.as_ref().ok_or_else(|| {
        AppError::new("finalise", "invalid container configuration")
    })?;
    check_absolute(&container.home, "home directory")?;
    check_absolute(&container.shell, "shell path")?;
    check_absolute(&container.path, "program path")?;

    if !(IDENTITY_MIN..=IDENTITY_MAX).contains(&config.identity) {
        return Err(AppError::new(
            "finalise",
            format!("identity {} out of range", config.identity),
        )
        .into());
    }

    let mut supp = Vec::with_capacity(config.groups.len());
    for name in &config.groups {
        match d.lookup_group(name) {
            Ok(Some(gid)) => supp.push(gid),
            Ok(None) => {
                return Err(AppError::new(
                    "finalise",
                    format!("unknown group {:?}", name),
                )
                .into());
            }
            Err(e) => {
                return Err(AppError::wrap(
                    "finalise",
                    format!("cannot look up group {:?}", name),
                    e,
                )
                .into());
            }
        }
    }

    let user_id = hsu
        .id(d)
        .map_err(|e| AppError::wrap("obtain user id", "", e))?;

    let (mapuid, mapgid) = if container.map_real_uid {
        (d.getuid(), d.getgid())
    } else {
        (d.overflow_uid(), d.overflow_gid())
    };

    let mut state = OutcomeState {
        shim: ShimParams {
            monitor_pid: d.getpid(),
            wait_delay_ms: wait_delay_ms(container.wait_delay),
            verbose,
            init: init.to_path_buf(),
            ops: Vec::new(),
        },
        id,
        app_id: config.id.clone(),
        identity: config.identity,
        user_id,
        mapuid,
        mapgid,
        enablements: config.enablements,
        direct_wayland: config.direct_wayland,
        container: container.clone(),
        paths: Paths::resolve(d, user_id),
    };
    trace!("Resolved paths {:?}", state.paths);

    let mut sys = SystemState::new(to_uid(user_id, config.identity), sys_d);
    let mut ops = Vec::new();
    {
        let mut s = SysState::new(&state, config, &mut sys, d);
        for mut op in Op::canonical() {
            match op.to_system(&mut s) {
                Ok(()) => ops.push(op),
                Err(e) if is_not_enabled(&e) => {
                    debug!("Skipping {} op, not enabled", op.name());
                }
                Err(e) => return Err(e),
            }
        }
    }
    state.shim.ops = ops;

    Ok(Outcome { state, sys, supp })
}
