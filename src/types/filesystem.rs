use crate::container::{BindFlags, ContainerOp, Params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/** One entry of the container filesystem, in the order it is set up. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilesystemConfig {
    Bind(FsBind),
    Ephemeral(FsEphemeral),
    Overlay(FsOverlay),
    Link(FsLink),
}

/** Bind mounts a host path. A special bind of `/` becomes the auto root,
 * a special bind of `/etc` becomes the auto etc.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FsBind {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<PathBuf>,
    pub src: PathBuf,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub ensure: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub special: bool,
}

/** A tmpfs, or an empty readonly directory when not writable. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsEphemeral {
    pub dst: PathBuf,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub size: usize,
    #[serde(default = "default_ephemeral_perm")]
    pub perm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsOverlay {
    pub dst: PathBuf,
    pub lower: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsLink {
    pub dst: PathBuf,
    pub linkname: String,
    #[serde(default)]
    pub dereference: bool,
}

fn default_ephemeral_perm() -> u32 {
    0o755
}

/// Per instance values entries need while building container ops.
pub struct ApplyState {
    pub auto_etc_prefix: String,
}

impl FilesystemConfig {
    pub fn valid(&self) -> bool {
        match self {
            FilesystemConfig::Bind(b) => {
                if !b.src.is_absolute() {
                    return false;
                }
                if b.dst.as_ref().is_some_and(|dst| !dst.is_absolute()) {
                    return false;
                }
                if b.ensure && b.optional {
                    return false;
                }
                if b.special {
                    let target = self.path();
                    return target == Some(Path::new("/"))
                        || target == Some(Path::new("/etc"));
                }
                true
            }
            FilesystemConfig::Ephemeral(e) => {
                e.dst.is_absolute() && e.perm <= 0o7777
            }
            FilesystemConfig::Overlay(o) => {
                if !o.dst.is_absolute()
                    || o.lower.iter().any(|l| !l.is_absolute())
                {
                    return false;
                }
                match (&o.upper, &o.work) {
                    (Some(upper), Some(work)) => {
                        upper.is_absolute()
                            && work.is_absolute()
                            && !o.lower.is_empty()
                    }
                    (None, None) => o.lower.len() >= 2,
                    _ => false,
                }
            }
            FilesystemConfig::Link(l) => {
                l.dst.is_absolute() && !l.linkname.is_empty()
            }
        }
    }

    /// Path of this entry inside the container.
    pub fn path(&self) -> Option<&Path> {
        match self {
            FilesystemConfig::Bind(b) => {
                Some(b.dst.as_deref().unwrap_or(b.src.as_path()))
            }
            FilesystemConfig::Ephemeral(e) => Some(&e.dst),
            FilesystemConfig::Overlay(o) => Some(&o.dst),
            FilesystemConfig::Link(l) => Some(&l.dst),
        }
    }

    /// Host paths made visible by this entry.
    pub fn host(&self) -> Vec<PathBuf> {
        match self {
            FilesystemConfig::Bind(b) => vec![b.src.clone()],
            FilesystemConfig::Ephemeral(_) | FilesystemConfig::Link(_) => {
                vec![]
            }
            FilesystemConfig::Overlay(o) => {
                let mut paths = o.lower.clone();
                paths.extend(o.upper.iter().cloned());
                paths.extend(o.work.iter().cloned());
                paths
            }
        }
    }

    pub fn is_auto_root(&self) -> bool {
        matches!(self, FilesystemConfig::Bind(b) if b.special)
            && self.path() == Some(Path::new("/"))
    }

    pub fn apply(&self, z: &ApplyState, params: &mut Params) {
        match self {
            FilesystemConfig::Bind(b) => {
                let mut flags = BindFlags::NONE;
                if b.write {
                    flags |= BindFlags::WRITABLE;
                }
                if b.dev {
                    flags |= BindFlags::DEVICE | BindFlags::WRITABLE;
                }
                if b.ensure {
                    flags |= BindFlags::ENSURE;
                }
                if b.optional {
                    flags |= BindFlags::OPTIONAL;
                }

                let target = b.dst.clone().unwrap_or_else(|| b.src.clone());
                if b.special && target == Path::new("/") {
                    params.push(ContainerOp::Root {
                        host: b.src.clone(),
                        flags,
                    });
                } else if b.special && target == Path::new("/etc") {
                    params.push(ContainerOp::Etc {
                        host: b.src.clone(),
                        prefix: z.auto_etc_prefix.clone(),
                    });
                } else {
                    params.bind(b.src.clone(), target, flags);
                }
            }
            FilesystemConfig::Ephemeral(e) => {
                if e.write {
                    params.tmpfs(e.dst.clone(), e.size, e.perm);
                } else {
                    params.push(ContainerOp::Readonly {
                        target: e.dst.clone(),
                        perm: e.perm,
                    });
                }
            }
            FilesystemConfig::Overlay(o) => match (&o.upper, &o.work) {
                (Some(upper), Some(work)) => {
                    params.push(ContainerOp::Overlay {
                        target: o.dst.clone(),
                        lower: o.lower.clone(),
                        upper: upper.clone(),
                        work: work.clone(),
                    });
                }
                _ => {
                    params.push(ContainerOp::OverlayReadonly {
                        target: o.dst.clone(),
                        lower: o.lower.clone(),
                    });
                }
            },
            FilesystemConfig::Link(l) => {
                params.push(ContainerOp::Link {
                    target: l.dst.clone(),
                    linkname: l.linkname.clone(),
                    dereference: l.dereference,
                });
            }
        }
    }
}
