use super::impls::deserialize_level_filter;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

pub const HSU_DEFAULT: &str = "/usr/libexec/rampart/rsu";
pub const INIT_DEFAULT: &str = "/usr/libexec/rampart/init";
pub const WAYLAND_HELPER_DEFAULT: &str = "/usr/libexec/rampart/wayland-helper";
pub const DBUS_PROXY_DEFAULT: &str = "/usr/bin/xdg-dbus-proxy";

/** One layer of settings as read from a TOML file. */
#[derive(Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PartialSettings {
    #[serde(deserialize_with = "deserialize_level_filter", default)]
    pub log_level: Option<log::LevelFilter>,
    pub hsu_path: Option<PathBuf>,
    pub init_path: Option<PathBuf>,
    pub wayland_helper: Option<PathBuf>,
    pub dbus_proxy: Option<PathBuf>,
}

/** Launcher settings. The sandbox configuration itself is separate and
 * read per invocation of `run`.
 */
#[derive(Clone, Debug)]
pub struct Settings {
    pub log_level: log::LevelFilter,
    pub hsu_path: PathBuf,
    pub init_path: PathBuf,
    pub wayland_helper: PathBuf,
    pub dbus_proxy: PathBuf,
    /// Where each key was last set, e.g. `cli` or a file path.
    pub sources: HashMap<String, String>,
}
