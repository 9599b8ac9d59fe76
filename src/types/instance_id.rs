use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const INSTANCE_ID_LEN: usize = 16;

/** Identifies a running instance. The first half is the creation time in
 * big endian UNIX nanoseconds, the second half is random.
 */
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId([u8; INSTANCE_ID_LEN]);

impl InstanceId {
    pub fn generate() -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("System clock is before the epoch: {}", e))?
            .as_nanos() as u64;
        let random = uuid::Uuid::new_v4();

        let mut id = [0u8; INSTANCE_ID_LEN];
        id[..8].copy_from_slice(&nanos.to_be_bytes());
        id[8..].copy_from_slice(&random.as_bytes()[..8]);
        Ok(Self(id))
    }

    pub const fn from_bytes(id: [u8; INSTANCE_ID_LEN]) -> Self {
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; INSTANCE_ID_LEN] {
        &self.0
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        let mut nanos = [0u8; 8];
        nanos.copy_from_slice(&self.0[..8]);
        DateTime::from_timestamp_nanos(u64::from_be_bytes(nanos) as i64)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self)
    }
}

impl FromStr for InstanceId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != INSTANCE_ID_LEN * 2 {
            return Err(anyhow!("Invalid instance identifier length: {}", s));
        }
        let decoded = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| anyhow!("Invalid instance identifier {}: {}", s, e))?;

        let mut id = [0u8; INSTANCE_ID_LEN];
        id.copy_from_slice(&decoded);
        Ok(Self(id))
    }
}

impl Serialize for InstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InstanceId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn test_instance_id_text() -> Result<()> {
        let id = InstanceId::from_bytes([
            0x18, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f, 0x70, 0xde, 0xad, 0xbe,
            0xef, 0x00, 0x01, 0x02, 0x03,
        ]);
        assert_eq!(id.to_string(), "181a2b3c4d5e6f70deadbeef00010203");
        assert_eq!(InstanceId::from_str(&id.to_string())?, id);
        Ok(())
    }

    #[rstest]
    #[case("")]
    #[case("181a2b3c4d5e6f70deadbeef0001020")]
    #[case("181A2B3C4D5E6F70DEADBEEF00010203")]
    #[case("181a2b3c4d5e6f70deadbeef0001020z")]
    fn test_instance_id_rejects(#[case] s: &str) {
        assert!(InstanceId::from_str(s).is_err());
    }

    #[test]
    fn test_instance_id_creation_time() -> Result<()> {
        let before = Utc::now();
        let id = InstanceId::generate()?;
        let after = Utc::now();
        assert!(id.creation_time() >= before - chrono::Duration::seconds(1));
        assert!(id.creation_time() <= after + chrono::Duration::seconds(1));
        assert_ne!(id, InstanceId::generate()?);
        Ok(())
    }
}
