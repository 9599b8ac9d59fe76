use super::{container_error, finalise_error};
use crate::container::RemountFlags;
use crate::error::AppError;
use crate::outcome::{ParamsState, SysState, deep_contains};
use crate::system::dbus::{SYSTEM_BUS_ENV, SYSTEM_BUS_FALLBACK, unix_paths};
use crate::system::{AclPerms, SystemState, USER};
use crate::types::{ExtraPermConfig, FilesystemConfig, FsBind};
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const VAR_RUN_NSCD: &str = "/var/run/nscd";

/// Top level names never bound by the auto root.
const AUTO_ROOT_SKIP: &[&str] = &["proc", "dev", "tmp", "mnt", "etc"];

/** Applies the configured filesystem, except an early root entry, and
 * covers host paths the configuration made visible by accident. Always
 * runs last.
 */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemOp {
    pub hide_paths: Vec<PathBuf>,
}

/// Splits off a leading entry targeting `/`, which is set up before
/// everything else and takes no part in path hiding.
pub(super) fn resolve_root(
    filesystem: &[FilesystemConfig],
) -> (Option<&FilesystemConfig>, &[FilesystemConfig], Option<&FsBind>) {
    match filesystem.split_first() {
        Some((first, rest))
            if first.valid() && first.path() == Some(Path::new("/")) =>
        {
            let autoroot = match first {
                FilesystemConfig::Bind(b) if first.is_auto_root() => Some(b),
                _ => None,
            };
            (Some(first), rest, autoroot)
        }
        _ => (None, filesystem, None),
    }
}

pub fn is_auto_root_bindable(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !AUTO_ROOT_SKIP.contains(&name)
}

// Resolves `path`, leaving it untouched when it does not exist yet.
fn eval_symlinks(s: &SysState, path: &Path) -> io::Result<PathBuf> {
    match s.d.eval_symlinks(path) {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Path {} does not yet exist", path.display());
            Ok(path.to_path_buf())
        }
        Err(e) => Err(e),
    }
}

pub fn flatten_extra_perms(sys: &mut SystemState, extra_perms: &[ExtraPermConfig]) {
    for p in extra_perms {
        if !p.path.is_absolute() {
            continue;
        }
        if p.ensure {
            sys.ensure(p.path.clone(), 0o700);
        }
        sys.update_perm_type(
            USER,
            p.path.clone(),
            AclPerms::from_bools(p.r, p.w, p.x),
        );
    }
}

impl FilesystemOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        let paths = s.paths();
        let mut hide = vec![
            paths.runtime_path.clone(),
            paths.share_path.clone(),
            PathBuf::from(VAR_RUN_NSCD),
        ];

        let address = s
            .d
            .lookup_env(SYSTEM_BUS_ENV)
            .unwrap_or_else(|| SYSTEM_BUS_FALLBACK.to_string());
        let sockets = unix_paths(&address)
            .map_err(|e| AppError::wrap("parse dbus address", "", e))?;
        for socket in sockets {
            let dir = socket.parent().unwrap_or(Path::new("/"));
            if dir == Path::new("/") {
                debug!(
                    "Message bus socket {} is in an unusual location",
                    socket.display()
                );
            }
            hide.push(dir.to_path_buf());
        }

        for p in hide.iter_mut() {
            *p = eval_symlinks(s, p).map_err(|e| {
                AppError::wrap("evaluate path hiding target", "", e)
            })?;
        }

        let (_, filesystem, autoroot) = resolve_root(&s.state.container.filesystem);
        for (i, c) in filesystem.iter().enumerate() {
            if !c.valid() {
                return Err(finalise_error(format!(
                    "invalid filesystem at index {}",
                    i
                )));
            }
        }

        let mut sources: Vec<PathBuf> =
            filesystem.iter().flat_map(FilesystemConfig::host).collect();
        if let Some(autoroot) = autoroot {
            let entries = s.d.read_dir(&autoroot.src).map_err(|e| {
                AppError::wrap("access autoroot source", "", e)
            })?;
            sources.extend(
                entries
                    .iter()
                    .filter(|name| is_auto_root_bindable(name))
                    .map(|name| autoroot.src.join(name)),
            );
        }

        let mut matched = vec![false; hide.len()];
        for source in &sources {
            let eval = eval_symlinks(s, source).map_err(|e| {
                AppError::wrap("evaluate path hiding source", "", e)
            })?;
            for (i, target) in hide.iter().enumerate() {
                if !matched[i] && deep_contains(&eval, target) {
                    matched[i] = true;
                    debug!(
                        "Hiding path {} from {}",
                        target.display(),
                        source.display()
                    );
                }
            }
        }

        self.hide_paths = hide
            .into_iter()
            .zip(matched)
            .filter_map(|(p, ok)| ok.then_some(p))
            .collect();

        flatten_extra_perms(s.sys, &s.config.extra_perms);
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        let filesystem = z.filesystem;
        for (i, c) in filesystem.iter().enumerate() {
            if !c.valid() {
                return Err(container_error(format!(
                    "invalid filesystem at index {}",
                    i
                )));
            }
            c.apply(&z.apply, &mut z.params);
        }

        for p in &self.hide_paths {
            z.params.tmpfs(p.clone(), 1 << 13, 0o755);
        }

        if !z.state.container.device {
            z.params.remount("/dev", RemountFlags::RDONLY);
        }
        z.params.remount("/", RemountFlags::RDONLY);

        let mut env = Vec::with_capacity(z.env.len());
        for (key, value) in &z.env {
            if key.is_empty() || key.contains('=') {
                return Err(container_error(format!(
                    "invalid environment variable {:?}",
                    key
                )));
            }
            env.push(format!("{}={}", key, value));
        }
        env.sort();
        z.params.env = env;
        Ok(())
    }
}
