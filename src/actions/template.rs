use crate::outln;
use crate::types::{
    BusConfig, Config, ContainerConfig, Enablement, ExtraPermConfig,
    FilesystemConfig, FsBind, FsEphemeral, FsLink,
};
use crate::util::{json_mode, set_json_output};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/** A complete configuration for a browser-like program. */
pub fn template_config() -> Config {
    let id = "org.chromium.Chromium";
    Config {
        id: id.into(),
        enablements: Enablement::WAYLAND | Enablement::DBUS | Enablement::PULSE,
        session_bus: Some(BusConfig::for_app(id)),
        system_bus: Some(BusConfig {
            talk: vec![
                "org.bluez".into(),
                "org.freedesktop.Avahi".into(),
                "org.freedesktop.UPower".into(),
            ],
            filter: true,
            ..BusConfig::default()
        }),
        direct_wayland: false,
        extra_perms: vec![ExtraPermConfig {
            ensure: true,
            path: "/var/lib/rampart/u0".into(),
            r: false,
            w: false,
            x: true,
        }],
        identity: 9,
        groups: vec!["video".into(), "dialout".into(), "plugdev".into()],
        container: Some(ContainerConfig {
            hostname: "localhost".into(),
            wait_delay: -1,
            env: BTreeMap::from([(
                "GOOGLE_DEFAULT_CLIENT_ID".to_string(),
                "77185425430.apps.googleusercontent.com".to_string(),
            )]),
            filesystem: vec![
                FilesystemConfig::Bind(FsBind {
                    src: "/var/lib/rampart/base/org.debian".into(),
                    dst: Some("/".into()),
                    special: true,
                    ..FsBind::default()
                }),
                FilesystemConfig::Bind(FsBind {
                    src: "/etc".into(),
                    special: true,
                    ..FsBind::default()
                }),
                FilesystemConfig::Ephemeral(FsEphemeral {
                    dst: "/tmp".into(),
                    write: true,
                    size: 1 << 24,
                    perm: 0o1777,
                }),
                FilesystemConfig::Bind(FsBind {
                    src: "/var/lib/rampart/u0/org.chromium.Chromium".into(),
                    dst: Some("/data/data/org.chromium.Chromium".into()),
                    write: true,
                    ensure: true,
                    ..FsBind::default()
                }),
                FilesystemConfig::Bind(FsBind {
                    src: "/dev/dri".into(),
                    dev: true,
                    optional: true,
                    ..FsBind::default()
                }),
                FilesystemConfig::Link(FsLink {
                    dst: "/run/current-system".into(),
                    linkname: "/run/host/current-system".into(),
                    dereference: false,
                }),
            ],
            username: "chronos".into(),
            shell: Some("/bin/sh".into()),
            home: Some("/data/data/org.chromium.Chromium".into()),
            path: Some("/usr/bin/chromium".into()),
            args: vec!["chromium".into(), "--ignore-gpu-blocklist".into()],
            userns: true,
            host_net: true,
            host_abstract: true,
            device: false,
            share_runtime: false,
            share_tmpdir: false,
            ..ContainerConfig::default()
        }),
        ..Config::default()
    }
}

pub fn template() -> Result<()> {
    let value = serde_json::to_value(template_config())
        .context("Encoding template")?;
    if json_mode() {
        set_json_output("config", value);
    } else {
        outln!(
            "{}",
            serde_json::to_string_pretty(&value).context("Encoding template")?
        );
    }
    Ok(())
}
