use crate::outln;
use crate::store::Store;
use crate::types::InstanceRecord;
use crate::util::set_json_output;
use anyhow::Result;
use chrono::Local;
use colored::*;
use fast_glob::glob_match;
use log::trace;
use nix::{sys::signal::kill, unistd::Pid};
use serde_json::{Value, json};

fn matches(patterns: &[String], app_id: &str) -> bool {
    patterns.is_empty()
        || patterns
            .iter()
            .any(|pattern| glob_match(&format!("*{pattern}*"), app_id))
}

fn alive(pid: i32) -> bool {
    pid > 0 && kill(Pid::from_raw(pid), None).is_ok()
}

/** Live instances first, then records whose monitor is gone. */
pub fn select(
    records: Vec<InstanceRecord>,
    patterns: &[String],
    alive: impl Fn(i32) -> bool,
) -> (Vec<InstanceRecord>, Vec<InstanceRecord>) {
    records
        .into_iter()
        .filter(|record| matches(patterns, &record.config.id))
        .partition(|record| alive(record.pid))
}

fn line(record: &InstanceRecord) -> String {
    format!(
        "{}  {:>7}  {:>7}  {:>4}  {:<32}  {:<24}  {}",
        record.id,
        record.pid,
        record.shim_pid,
        record.identity(),
        record.config.id,
        record.enablements(),
        record.time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
    )
}

fn to_json(record: &InstanceRecord, live: bool) -> Value {
    json!({
        "instance": record.id.to_string(),
        "pid": record.pid,
        "shim_pid": record.shim_pid,
        "identity": record.identity(),
        "id": record.config.id,
        "enablements": record.enablements().to_string(),
        "time": record.time.to_rfc3339(),
        "live": live,
    })
}

pub fn ps(store: &Store, patterns: &[String]) -> Result<()> {
    trace!("Listing instances in {}", store.base().display());
    let (live, stale) = select(store.all()?, patterns, alive);

    if !live.is_empty() {
        outln!(
            "{}",
            format!(
                "{:<32}  {:>7}  {:>7}  {:>4}  {:<32}  {:<24}  {}",
                "INSTANCE", "PID", "SHIM", "IDENT", "ID", "ENABLEMENTS", "STARTED"
            )
            .bold()
        );
        for record in &live {
            outln!("{}", line(record));
        }
    }
    if !live.is_empty() && !stale.is_empty() {
        outln!("");
    }
    if !stale.is_empty() {
        outln!("{}", "Stale instances:".dimmed());
        for record in &stale {
            outln!("{}", line(record).dimmed());
        }
    }

    let instances = live
        .iter()
        .map(|r| to_json(r, true))
        .chain(stale.iter().map(|r| to_json(r, false)))
        .collect();
    set_json_output("instances", Value::Array(instances));
    Ok(())
}
