use super::SysDispatcher;
use crate::types::Enablement;
use anyhow::{Result, anyhow};
use std::ffi::CString;
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AclPerms(pub u16);

impl AclPerms {
    pub const NONE: AclPerms = AclPerms(0);
    pub const EXECUTE: AclPerms = AclPerms(1);
    pub const WRITE: AclPerms = AclPerms(2);
    pub const READ: AclPerms = AclPerms(4);
    pub const RW: AclPerms = AclPerms(4 | 2);
    pub const RWX: AclPerms = AclPerms(4 | 2 | 1);

    pub fn from_bools(r: bool, w: bool, x: bool) -> Self {
        let mut perms = 0;
        if r {
            perms |= Self::READ.0;
        }
        if w {
            perms |= Self::WRITE.0;
        }
        if x {
            perms |= Self::EXECUTE.0;
        }
        AclPerms(perms)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AclPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |b: AclPerms, c: char| if self.0 & b.0 != 0 { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            bit(Self::READ, 'r'),
            bit(Self::WRITE, 'w'),
            bit(Self::EXECUTE, 'x')
        )
    }
}

/* Grants the sandbox user perms on a host path. */
pub struct AclOp {
    pub et: Enablement,
    pub path: PathBuf,
    pub perms: AclPerms,
}

impl AclOp {
    pub(super) fn apply(&mut self, d: &dyn SysDispatcher, uid: u32) -> Result<()> {
        d.acl_update(&self.path, uid, self.perms).map_err(|e| {
            anyhow!(
                "cannot apply ACL entry to {}: {}",
                self.path.display(),
                e
            )
        })
    }

    pub(super) fn revert(&mut self, d: &dyn SysDispatcher, uid: u32) -> Result<()> {
        match d.acl_update(&self.path, uid, AclPerms::NONE) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!(
                "cannot strip ACL entry from {}: {}",
                self.path.display(),
                e
            )),
        }
    }
}

impl fmt::Display for AclOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acl {} {}", self.perms, self.path.display())
    }
}

const ACL_XATTR: &str = "system.posix_acl_access";
const ACL_XATTR_VERSION: u32 = 2;
const ACL_UNDEFINED_ID: u32 = u32::MAX;

const ACL_USER_OBJ: u16 = 0x01;
const ACL_USER: u16 = 0x02;
const ACL_GROUP_OBJ: u16 = 0x04;
const ACL_GROUP: u16 = 0x08;
const ACL_MASK: u16 = 0x10;
const ACL_OTHER: u16 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AclEntry {
    tag: u16,
    perm: u16,
    id: u32,
}

fn from_mode(mode: u32) -> Vec<AclEntry> {
    let entry = |tag, shift: u32| AclEntry {
        tag,
        perm: ((mode >> shift) & 0o7) as u16,
        id: ACL_UNDEFINED_ID,
    };
    vec![
        entry(ACL_USER_OBJ, 6),
        entry(ACL_GROUP_OBJ, 3),
        entry(ACL_OTHER, 0),
    ]
}

pub(crate) fn decode(data: &[u8]) -> io::Result<Vec<AclEntry>> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
    if data.len() < 4 || (data.len() - 4) % 8 != 0 {
        return Err(invalid("malformed ACL"));
    }
    let version = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if version != ACL_XATTR_VERSION {
        return Err(invalid("unsupported ACL version"));
    }

    Ok(data[4..]
        .chunks_exact(8)
        .map(|c| AclEntry {
            tag: u16::from_le_bytes([c[0], c[1]]),
            perm: u16::from_le_bytes([c[2], c[3]]),
            id: u32::from_le_bytes([c[4], c[5], c[6], c[7]]),
        })
        .collect())
}

pub(crate) fn encode(entries: &[AclEntry]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + entries.len() * 8);
    data.extend_from_slice(&ACL_XATTR_VERSION.to_le_bytes());
    for e in entries {
        data.extend_from_slice(&e.tag.to_le_bytes());
        data.extend_from_slice(&e.perm.to_le_bytes());
        data.extend_from_slice(&e.id.to_le_bytes());
    }
    data
}

/** Replaces the named user entry of `uid` and recalculates the mask. */
pub(crate) fn update_entries(
    mut entries: Vec<AclEntry>,
    uid: u32,
    perms: AclPerms,
) -> Vec<AclEntry> {
    entries.retain(|e| !(e.tag == ACL_USER && e.id == uid) && e.tag != ACL_MASK);
    if !perms.is_empty() {
        entries.push(AclEntry {
            tag: ACL_USER,
            perm: perms.0,
            id: uid,
        });
    }

    let named = entries
        .iter()
        .any(|e| e.tag == ACL_USER || e.tag == ACL_GROUP);
    if named {
        let mask = entries
            .iter()
            .filter(|e| matches!(e.tag, ACL_USER | ACL_GROUP | ACL_GROUP_OBJ))
            .fold(0, |m, e| m | e.perm);
        entries.push(AclEntry {
            tag: ACL_MASK,
            perm: mask,
            id: ACL_UNDEFINED_ID,
        });
    }

    entries.sort_by_key(|e| (e.tag, e.id));
    entries
}

fn get_xattr(path: &CString, name: &CString) -> io::Result<Option<Vec<u8>>> {
    loop {
        let size = unsafe {
            libc::getxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0)
        };
        if size < 0 {
            let e = io::Error::last_os_error();
            return match e.raw_os_error() {
                Some(libc::ENODATA) => Ok(None),
                _ => Err(e),
            };
        }

        let mut buf = vec![0u8; size as usize];
        let n = unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            let e = io::Error::last_os_error();
            match e.raw_os_error() {
                // grew in between
                Some(libc::ERANGE) => continue,
                Some(libc::ENODATA) => return Ok(None),
                _ => return Err(e),
            }
        }
        buf.truncate(n as usize);
        return Ok(Some(buf));
    }
}

/// Updates the access ACL of `path` through its extended attribute.
pub fn update_acl(path: &Path, uid: u32, perms: AclPerms) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let c_name = CString::new(ACL_XATTR)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let entries = match get_xattr(&c_path, &c_name)? {
        Some(data) => decode(&data)?,
        None => from_mode(std::fs::metadata(path)?.mode()),
    };
    let data = encode(&update_entries(entries, uid, perms));

    let ret = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
