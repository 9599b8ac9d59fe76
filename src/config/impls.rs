use super::structs::{PartialSettings, Settings};

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

pub(crate) fn deserialize_level_filter<'de, D>(
    deserializer: D,
) -> Result<Option<log::LevelFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map_or(Ok(None), |s| {
        log::LevelFilter::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    })
}

impl PartialSettings {
    /** Overlays every key `other` sets, recording `source` for it. */
    pub fn merge(
        &mut self,
        sources: &mut std::collections::HashMap<String, String>,
        other: PartialSettings,
        source: &str,
    ) {
        let mut note = |key: &str| {
            sources.insert(key.into(), source.into());
        };
        if let Some(log_level) = other.log_level {
            self.log_level = Some(log_level);
            note("log_level");
        }
        if let Some(hsu_path) = other.hsu_path {
            self.hsu_path = Some(hsu_path);
            note("hsu_path");
        }
        if let Some(init_path) = other.init_path {
            self.init_path = Some(init_path);
            note("init_path");
        }
        if let Some(wayland_helper) = other.wayland_helper {
            self.wayland_helper = Some(wayland_helper);
            note("wayland_helper");
        }
        if let Some(dbus_proxy) = other.dbus_proxy {
            self.dbus_proxy = Some(dbus_proxy);
            note("dbus_proxy");
        }
    }
}

impl Settings {
    pub const KEYS: [&'static str; 5] = [
        "log_level",
        "hsu_path",
        "init_path",
        "wayland_helper",
        "dbus_proxy",
    ];

    /// Looks up a key by name, accepting `-` in place of `_`.
    pub fn get(&self, key: &str) -> Option<(&'static str, String)> {
        let path = |p: &Path| p.display().to_string();
        match key.replace('-', "_").as_str() {
            "log_level" => Some(("log_level", self.log_level.to_string())),
            "hsu_path" => Some(("hsu_path", path(&self.hsu_path))),
            "init_path" => Some(("init_path", path(&self.init_path))),
            "wayland_helper" => {
                Some(("wayland_helper", path(&self.wayland_helper)))
            }
            "dbus_proxy" => Some(("dbus_proxy", path(&self.dbus_proxy))),
            _ => None,
        }
    }
}
