use super::{Config, Enablement, InstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/** A live instance as stored in its identity segment. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceRecord {
    pub id: InstanceId,
    /// Monitor process.
    pub pid: i32,
    pub shim_pid: i32,
    pub config: Config,
    pub time: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn enablements(&self) -> Enablement {
        self.config.enablements
    }

    pub fn identity(&self) -> u32 {
        self.config.identity
    }
}
