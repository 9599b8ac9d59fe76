use super::{container_error, finalise_error};
use crate::container::BindFlags;
use crate::error::{AppError, NotEnabled};
use crate::outcome::{PRIVATE_TMP, ParamsState, SysState};
use crate::types::Enablement;
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

pub const PULSE_COOKIE_SIZE: usize = 1 << 8;

/** Exports the PulseAudio server through a hard link of its socket.
 * Runs after the runtime op.
 */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PulseOp {
    /// Zero padded cookie data, when a cookie was found.
    pub cookie: Option<Vec<u8>>,
}

impl PulseOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        if !s.state.enablements.has(Enablement::PULSE) {
            return Err(NotEnabled.into());
        }

        let dir = s.paths().runtime_path.join("pulse");
        let socket = dir.join("native");

        match s.d.stat(&dir) {
            Ok(_) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(finalise_error(format!(
                    "PulseAudio directory {:?} not found",
                    dir
                )));
            }
            Err(e) => {
                return Err(AppError::wrap(
                    format!("access PulseAudio directory {:?}", dir),
                    "",
                    e,
                )
                .into());
            }
        }

        match s.d.stat(&socket) {
            Ok(stat) if stat.mode & 0o006 != 0o006 => {
                return Err(finalise_error(format!(
                    "unexpected permissions on {:?}: {:o}",
                    socket, stat.mode
                )));
            }
            Ok(_) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(finalise_error(format!(
                    "PulseAudio directory {:?} found but socket does not exist",
                    dir
                )));
            }
            Err(e) => {
                return Err(AppError::wrap(
                    format!("access PulseAudio socket {:?}", socket),
                    "",
                    e,
                )
                .into());
            }
        }

        // the socket is world writable but its parent is not traversable
        let runtime = s.runtime();
        s.sys.link(socket, runtime.join("pulse"));

        match discover_cookie(s)? {
            Some(path) => self.cookie = Some(load_cookie(s, &path)?),
            None => debug!(
                "Cannot locate PulseAudio cookie (tried $PULSE_COOKIE, \
                 $HOME/.pulse-cookie, $XDG_CONFIG_HOME/pulse/cookie)"
            ),
        }
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        let inner = z.runtime_dir().join("pulse").join("native");
        let source = z.runtime_path().join("pulse");
        z.params.bind(source, inner.clone(), BindFlags::NONE);
        z.env
            .insert("PULSE_SERVER".into(), format!("unix:{}", inner.display()));

        if let Some(cookie) = &self.cookie {
            if cookie.len() != PULSE_COOKIE_SIZE {
                return Err(container_error("invalid PulseAudio cookie"));
            }
            let dst = Path::new(PRIVATE_TMP).join("pulse-cookie");
            z.env
                .insert("PULSE_COOKIE".into(), dst.display().to_string());
            z.params.place(dst, cookie.clone());
        }
        Ok(())
    }
}

fn cookie_candidate(s: &SysState, path: PathBuf) -> Result<Option<PathBuf>> {
    match s.d.stat(&path) {
        Ok(stat) if stat.is_dir => Ok(None),
        Ok(_) => Ok(Some(path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            Err(AppError::wrap("access PulseAudio cookie", "", e).into())
        }
    }
}

fn absolute(value: String) -> Result<PathBuf> {
    let path = PathBuf::from(&value);
    if !path.is_absolute() {
        return Err(AppError::wrap(
            "locate PulseAudio cookie",
            "",
            anyhow::anyhow!("path {:?} is not absolute", value),
        )
        .into());
    }
    Ok(path)
}

/// `$PULSE_COOKIE`, then `$HOME/.pulse-cookie`, then
/// `$XDG_CONFIG_HOME/pulse/cookie`.
fn discover_cookie(s: &SysState) -> Result<Option<PathBuf>> {
    if let Some(value) = s.d.lookup_env("PULSE_COOKIE") {
        // taken as is, access is checked on load
        return absolute(value).map(Some);
    }
    if let Some(home) = s.d.lookup_env("HOME") {
        let candidate = absolute(home)?.join(".pulse-cookie");
        if let Some(path) = cookie_candidate(s, candidate)? {
            return Ok(Some(path));
        }
    }
    if let Some(config) = s.d.lookup_env("XDG_CONFIG_HOME") {
        let candidate = absolute(config)?.join("pulse").join("cookie");
        if let Some(path) = cookie_candidate(s, candidate)? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn load_cookie(s: &SysState, path: &Path) -> Result<Vec<u8>> {
    debug!("Loading up to {} bytes from {:?}", PULSE_COOKIE_SIZE, path);
    let mut data = s
        .d
        .read_file(path, PULSE_COOKIE_SIZE)
        .map_err(|e| AppError::wrap("read PulseAudio cookie", "", e))?;
    if data.len() > PULSE_COOKIE_SIZE {
        return Err(finalise_error(format!(
            "PulseAudio cookie at {:?} exceeds maximum expected size",
            path
        )));
    }
    if data.len() < PULSE_COOKIE_SIZE {
        debug!(
            "PulseAudio cookie at {:?} is {} bytes short",
            path,
            PULSE_COOKIE_SIZE - data.len()
        );
    }
    data.resize(PULSE_COOKIE_SIZE, 0);
    Ok(data)
}
