use super::StoreError;
use crate::types::{Enablement, InstanceId, InstanceRecord};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const HEADER_MAGIC: &[u8; 4] = b"RMPT";
pub const HEADER_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 8;

/// Magic, version, enablement byte and its complement, then a zero.
pub fn encode_header(et: Enablement) -> [u8; HEADER_SIZE] {
    let [m0, m1, m2, m3] = *HEADER_MAGIC;
    [m0, m1, m2, m3, HEADER_VERSION, et.bits(), !et.bits(), 0]
}

pub fn decode_header(data: &[u8]) -> Result<Enablement, String> {
    if data.len() < HEADER_SIZE {
        return Err("short header".into());
    }
    if &data[..4] != HEADER_MAGIC {
        return Err("bad header magic".into());
    }
    if data[4] != HEADER_VERSION {
        return Err(format!("unsupported header version {}", data[4]));
    }
    if data[5] != !data[6] || data[7] != 0 {
        return Err("corrupt header".into());
    }
    Ok(Enablement(data[5]))
}

/** One entry file of a locked segment. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHandle {
    pub id: InstanceId,
    pub path: PathBuf,
}

impl EntryHandle {
    pub fn new(segment: &Path, id: InstanceId) -> Self {
        Self {
            path: segment.join(id.to_string()),
            id,
        }
    }

    fn decode_error(&self, msg: impl Into<String>) -> StoreError {
        StoreError::Decode(self.path.clone(), msg.into())
    }

    pub fn load_header(&self) -> Result<Enablement, StoreError> {
        let mut header = [0u8; HEADER_SIZE];
        let mut file = File::open(&self.path)
            .map_err(|e| StoreError::Io(self.path.clone(), e))?;
        file.read_exact(&mut header)
            .map_err(|e| self.decode_error(e.to_string()))?;
        decode_header(&header).map_err(|e| self.decode_error(e))
    }

    /** Loads the record, checking it against its header and file name. */
    pub fn load(&self) -> Result<InstanceRecord, StoreError> {
        let data = std::fs::read(&self.path)
            .map_err(|e| StoreError::Io(self.path.clone(), e))?;
        let et = decode_header(&data).map_err(|e| self.decode_error(e))?;
        let record: InstanceRecord =
            serde_json::from_slice(&data[HEADER_SIZE..])
                .map_err(|e| self.decode_error(e.to_string()))?;

        if record.enablements() != et {
            return Err(self.decode_error(format!(
                "header enablements {} do not match record ({})",
                et,
                record.enablements()
            )));
        }
        if record.id != self.id {
            return Err(self.decode_error(format!(
                "record is for instance {}",
                record.id
            )));
        }
        Ok(record)
    }
}
