#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

static JSON_OUTPUT: Mutex<BTreeMap<String, Value>> = Mutex::new(BTreeMap::new());
static JSON_MODE: AtomicBool = AtomicBool::new(false);

/// In JSON mode human readable lines are suppressed and actions report
/// through `set_json_output` instead.
pub fn set_json_mode(json: bool) {
    JSON_MODE.store(json, Ordering::Relaxed);
}

pub fn json_mode() -> bool {
    JSON_MODE.load(Ordering::Relaxed)
}

pub fn print_output(printed_output: &str) {
    if !json_mode() {
        println!("{}", printed_output);
    }
}

pub fn set_json_output(key: &str, value: Value) {
    JSON_OUTPUT
        .lock()
        .expect("Failed to lock JSON_OUTPUT")
        .insert(key.to_string(), value);
}

#[macro_export]
macro_rules! outln {
    ( $fmt:expr $(, $args:expr)*) => {
        $crate::util::print_output(&format!($fmt $(, $args)*))
    };
}

fn take_json_output<T>(result: &Result<T>) -> Value {
    let mut map = std::mem::take(
        &mut *JSON_OUTPUT.lock().expect("Failed to lock JSON_OUTPUT"),
    );
    match result {
        Ok(_) => {
            map.insert("status".into(), Value::String("success".into()));
        }
        Err(e) => {
            map.insert("status".into(), Value::String("error".into()));
            map.insert("error".into(), Value::String(format!("{:#}", e)));
        }
    }
    Value::Object(map.into_iter().collect())
}

/** Prints the collected JSON blob along with the action's status. */
pub fn print_json_output<T>(result: &Result<T>) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&take_json_output(result))
            .context("Error serializing JSON")?
    );
    Ok(())
}
