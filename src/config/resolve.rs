use super::PartialSettings;
use super::cli::Args;
use super::structs::{
    DBUS_PROXY_DEFAULT, HSU_DEFAULT, INIT_DEFAULT, Settings,
    WAYLAND_HELPER_DEFAULT,
};
use anyhow::{Context, Result, anyhow};
use log::trace;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub fn resolve_settings(cli: &Args) -> Result<Settings> {
    let env = |key: &str| std::env::var(key).ok();
    let files = if cli.no_config {
        vec![]
    } else {
        find_config_files(&env)
    };
    resolve_with(cli, &files, env)
}

/** Layers config files, then the environment, then the command line. */
pub fn resolve_with(
    cli: &Args,
    files: &[PathBuf],
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let (mut partial, mut sources) = load_partial(files)?;

    let mut from_env = PartialSettings::default();
    if let Some(log_level) = env("RAMPART_LOG_LEVEL").filter(|s| !s.is_empty())
    {
        from_env.log_level = Some(
            log::LevelFilter::from_str(&log_level)
                .map_err(|_| anyhow!("Invalid log level: {}", log_level))?,
        );
    }
    if let Some(hsu) = env("RAMPART_HSU").filter(|s| !s.is_empty()) {
        from_env.hsu_path = Some(PathBuf::from(hsu));
    }
    partial.merge(&mut sources, from_env, "environment");

    let from_cli = PartialSettings {
        log_level: cli.log_level,
        hsu_path: cli.hsu.clone(),
        init_path: cli.init.clone(),
        ..Default::default()
    };
    partial.merge(&mut sources, from_cli, "cli");

    let mut default = |key: &str, value: Option<PathBuf>, fallback: &str| {
        sources.entry(key.into()).or_insert_with(|| "default".into());
        value.unwrap_or_else(|| PathBuf::from(fallback))
    };
    let hsu_path = default("hsu_path", partial.hsu_path, HSU_DEFAULT);
    let init_path = default("init_path", partial.init_path, INIT_DEFAULT);
    let wayland_helper = default(
        "wayland_helper",
        partial.wayland_helper,
        WAYLAND_HELPER_DEFAULT,
    );
    let dbus_proxy =
        default("dbus_proxy", partial.dbus_proxy, DBUS_PROXY_DEFAULT);

    let log_level = partial.log_level.unwrap_or(log::LevelFilter::Info);
    sources
        .entry("log_level".into())
        .or_insert_with(|| "default".into());

    let settings = Settings {
        log_level,
        hsu_path,
        init_path,
        wayland_helper,
        dbus_proxy,
        sources,
    };
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn load_partial(
    files: &[PathBuf],
) -> Result<(PartialSettings, HashMap<String, String>)> {
    let mut sources = HashMap::new();
    let mut merged = PartialSettings::default();
    if files.is_empty() {
        trace!("No config files found, using default settings");
        return Ok((merged, sources));
    }

    for path in files {
        let config_str = std::fs::read_to_string(path).context(format!(
            "Failed to read config file {}",
            path.display()
        ))?;
        let layer: PartialSettings = toml::from_str(&config_str).context(
            format!("Failed to parse config file {}", path.display()),
        )?;
        merged.merge(&mut sources, layer, &path.display().to_string());
        trace!("Loaded config file: {}", path.display());
    }
    Ok((merged, sources))
}

/** System file first, so the user's file wins. */
fn find_config_files(env: &impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/rampart.toml")];
    let config_home = env("XDG_CONFIG_HOME")
        .filter(|s| Path::new(s).is_absolute())
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| Path::new(&home).join(".config")));
    if let Some(config_home) = config_home {
        paths.push(config_home.join("rampart/config.toml"));
    }
    paths.into_iter().filter(|path| path.is_file()).collect()
}

fn validate_settings(settings: &Settings) -> Result<()> {
    for (key, path) in [
        ("hsu_path", &settings.hsu_path),
        ("init_path", &settings.init_path),
        ("wayland_helper", &settings.wayland_helper),
        ("dbus_proxy", &settings.dbus_proxy),
    ] {
        if !path.is_absolute() {
            return Err(anyhow!(
                "{} must be an absolute path, got {}",
                key,
                path.display()
            ));
        }
    }
    Ok(())
}
