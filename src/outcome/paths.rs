use crate::dispatcher::Dispatcher;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/** Host paths shared by every instance of one user.
 *
 * Resolved once by the monitor and transmitted, the shim never derives
 * them again.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    /// Per user state under the temporary directory.
    pub share_path: PathBuf,
    /// Parent of per instance runtime directories.
    pub run_dir_path: PathBuf,
    /// The user's XDG runtime directory, or a stand-in.
    pub runtime_path: PathBuf,
}

impl Paths {
    pub fn resolve(d: &dyn Dispatcher, user_id: u32) -> Self {
        let share_path = d.temp_dir().join(format!("rampart.{}", user_id));

        match d
            .lookup_env("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
        {
            Some(runtime_path) => Self {
                run_dir_path: runtime_path.join("rampart"),
                runtime_path,
                share_path,
            },
            None => {
                let run_dir_path = share_path.join("run");
                Self {
                    runtime_path: run_dir_path.join("compat"),
                    run_dir_path,
                    share_path,
                }
            }
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.share_path.join("state")
    }
}

/// Whether `target` is `base` or lies below it.
pub fn deep_contains(base: &Path, target: &Path) -> bool {
    target.starts_with(base)
}
