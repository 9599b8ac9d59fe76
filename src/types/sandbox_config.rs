use super::{BusConfig, Enablement, FilesystemConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const IDENTITY_MIN: u32 = 0;
pub const IDENTITY_MAX: u32 = 9999;

/** Declarative description of one sandboxed application. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Reverse domain application identifier.
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub enablements: Enablement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_bus: Option<BusConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_bus: Option<BusConfig>,
    #[serde(default)]
    pub direct_wayland: bool,

    #[serde(default)]
    pub extra_perms: Vec<ExtraPermConfig>,

    pub identity: u32,
    #[serde(default)]
    pub groups: Vec<String>,

    pub container: Option<ContainerConfig>,
}

/** Host path ACL granted to the sandbox user for the lifetime of the
 * instance owner, never reverted while any instance remains.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraPermConfig {
    #[serde(default)]
    pub ensure: bool,
    pub path: PathBuf,
    #[serde(default)]
    pub r: bool,
    #[serde(default)]
    pub w: bool,
    #[serde(default)]
    pub x: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    /// Milliseconds the program is given to exit after cancellation.
    /// Zero or below selects the default.
    #[serde(default)]
    pub wait_delay: i64,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// The first entry is set up before everything else when it targets `/`.
    #[serde(default)]
    pub filesystem: Vec<FilesystemConfig>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    pub shell: Option<PathBuf>,
    pub home: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub seccomp_compat: bool,
    #[serde(default)]
    pub devel: bool,
    #[serde(default)]
    pub userns: bool,
    #[serde(default)]
    pub host_net: bool,
    #[serde(default)]
    pub host_abstract: bool,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub multiarch: bool,
    #[serde(default)]
    pub map_real_uid: bool,
    #[serde(default)]
    pub device: bool,
    #[serde(default)]
    pub share_runtime: bool,
    #[serde(default)]
    pub share_tmpdir: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_minimal_json() -> anyhow::Result<()> {
        let config: Config = serde_json::from_str(
            r#"{
                "id": "org.example.App",
                "identity": 3,
                "container": {
                    "shell": "/bin/sh",
                    "home": "/home/app",
                    "path": "/bin/app"
                }
            }"#,
        )?;
        assert_eq!(config.identity, 3);
        assert_eq!(config.enablements, Enablement::NONE);

        let container = config.container.as_ref();
        assert_eq!(container.map(|c| c.wait_delay), Some(0));
        assert_eq!(container.map(|c| c.share_runtime), Some(false));
        Ok(())
    }

    #[test]
    fn test_config_rejects_unknown_field() {
        assert!(
            serde_json::from_str::<Config>(
                r#"{"identity": 1, "container": null, "hostname": "x"}"#
            )
            .is_err()
        );
    }
}
