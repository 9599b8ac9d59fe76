use crate::config::Settings;
use crate::outln;
use crate::util::set_json_output;
use anyhow::{Result, anyhow};
use log::debug;
use serde_json::Value;

pub fn config(settings: &Settings, keys: Option<Vec<String>>) -> Result<()> {
    let keys = keys
        .unwrap_or_else(|| Settings::KEYS.map(String::from).to_vec());
    let multi_line = keys.len() > 1;

    for key in keys {
        let (key, value) = settings
            .get(&key)
            .ok_or_else(|| anyhow!("Unknown key: {}", key))?;
        if let Some(source) = settings.sources.get(key) {
            debug!("{}={} set from {}", key, value, source);
        }
        if multi_line {
            outln!("{}={}", key, value);
        } else {
            outln!("{}", value);
        }
        set_json_output(key, Value::String(value));
    }
    Ok(())
}
