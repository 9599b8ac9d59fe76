use crate::container::BindFlags;
use crate::outcome::{ParamsState, SysState};
use crate::system::{AclPerms, USER};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/** Provides `/tmp`, private to the instance unless shared between
 * instances of the same identity.
 */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TmpdirOp {}

fn shared_paths(share_path: &Path, identity: u32) -> (PathBuf, PathBuf) {
    let dir = share_path.join("tmpdir");
    let inst = dir.join(identity.to_string());
    (dir, inst)
}

impl TmpdirOp {
    pub fn to_system(&mut self, s: &mut SysState) -> Result<()> {
        if !s.state.container.share_tmpdir {
            return Ok(());
        }
        let (dir, inst) = shared_paths(&s.paths().share_path, s.state.identity);
        s.sys
            .ensure(dir.clone(), 0o700)
            .update_perm_type(USER, dir, AclPerms::EXECUTE)
            .ensure(inst.clone(), 0o1700)
            .update_perm_type(USER, inst, AclPerms::RWX);
        Ok(())
    }

    pub fn to_container(&self, z: &mut ParamsState) -> Result<()> {
        if z.state.container.share_tmpdir {
            let (_, inst) =
                shared_paths(&z.state.paths.share_path, z.state.identity);
            z.params.bind(inst, "/tmp", BindFlags::WRITABLE);
        } else {
            z.params.tmpfs("/tmp", 0, 0o1777);
        }
        Ok(())
    }
}
