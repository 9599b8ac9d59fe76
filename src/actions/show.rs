use crate::outln;
use crate::store::Store;
use crate::types::InstanceRecord;
use crate::util::{json_mode, set_json_output};
use anyhow::{Context, Result, anyhow};

/** The single record whose id starts with `prefix`. */
pub fn find_instance(
    records: Vec<InstanceRecord>,
    prefix: &str,
) -> Result<InstanceRecord> {
    let prefix = prefix.to_ascii_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("empty instance prefix"));
    }
    let mut found: Vec<InstanceRecord> = records
        .into_iter()
        .filter(|record| record.id.to_string().starts_with(&prefix))
        .collect();
    match found.len() {
        0 => Err(anyhow!("no instance matches {:?}", prefix)),
        1 => Ok(found.remove(0)),
        n => Err(anyhow!("instance prefix {:?} matches {} instances", prefix, n)),
    }
}

pub fn show(store: &Store, prefix: &str) -> Result<()> {
    let record = find_instance(store.all()?, prefix)?;
    let value = serde_json::to_value(&record).context("Encoding record")?;
    if json_mode() {
        set_json_output("instance", value);
    } else {
        outln!(
            "{}",
            serde_json::to_string_pretty(&value).context("Encoding record")?
        );
    }
    Ok(())
}
