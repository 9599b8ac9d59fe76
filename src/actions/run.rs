use crate::config::Settings;
use crate::dispatcher::{Direct, Dispatcher};
use crate::outcome::{Hsu, finalise, monitor};
use crate::store::Store;
use crate::system::{DirectSys, SysDispatcher};
use crate::types::{Config, InstanceId};
use anyhow::{Context, Result};
use log::{LevelFilter, debug};
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

/** Reads a sandbox configuration from `source`, `-` meaning stdin. */
pub fn read_config(source: &str) -> Result<Config> {
    let reader: Box<dyn Read> = if source == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(
            File::open(source)
                .with_context(|| format!("Opening config {:?}", source))?,
        )
    };
    serde_json::from_reader(reader)
        .with_context(|| format!("Decoding config {:?}", source))
}

/** Runs one sandboxed program and returns the monitor's exit code. */
pub fn run(settings: &Settings, source: &str) -> Result<i32> {
    let config = read_config(source)?;
    let d: Arc<dyn Dispatcher> = Arc::new(Direct);
    let sys_d: Arc<dyn SysDispatcher> = Arc::new(DirectSys {
        wayland_helper: settings.wayland_helper.clone(),
        dbus_proxy: settings.dbus_proxy.clone(),
    });
    let hsu = Hsu::new(settings.hsu_path.clone());

    let id = InstanceId::generate()?;
    debug!("Finalising instance {} of {:?}", id, config.id);
    let outcome = finalise(
        &*d,
        sys_d,
        &hsu,
        id,
        &config,
        &settings.init_path,
        settings.log_level >= LevelFilter::Debug,
    )?;

    let store = Store::new(outcome.state.paths.store_path());
    Ok(monitor::run(d, outcome, &store, hsu.path(), &config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_config_missing() {
        let err = read_config("/nonexistent/rampart.json")
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("Opening config \"/nonexistent/rampart.json\"")
        );
    }
}
