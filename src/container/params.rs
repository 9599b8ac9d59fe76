use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;

macro_rules! bits {
    ($name:ident, $repr:ty) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NONE: $name = $name(0);

            pub fn has(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

bits!(BindFlags, u32);
bits!(SeccompFlags, u32);
bits!(SeccompPresets, u32);
bits!(RemountFlags, u64);

impl BindFlags {
    pub const WRITABLE: BindFlags = BindFlags(1 << 0);
    pub const DEVICE: BindFlags = BindFlags(1 << 1);
    pub const ENSURE: BindFlags = BindFlags(1 << 2);
    pub const OPTIONAL: BindFlags = BindFlags(1 << 3);
}

impl SeccompFlags {
    pub const ALLOW_MULTIARCH: SeccompFlags = SeccompFlags(1 << 0);
}

impl SeccompPresets {
    pub const EXT: SeccompPresets = SeccompPresets(1 << 0);
    pub const DENY_NS: SeccompPresets = SeccompPresets(1 << 1);
    pub const DENY_TTY: SeccompPresets = SeccompPresets(1 << 2);
    pub const DENY_DEVEL: SeccompPresets = SeccompPresets(1 << 3);

    pub const STRICT: SeccompPresets = SeccompPresets(
        Self::EXT.0 | Self::DENY_NS.0 | Self::DENY_TTY.0 | Self::DENY_DEVEL.0,
    );
}

impl RemountFlags {
    pub const RDONLY: RemountFlags = RemountFlags(libc::MS_RDONLY as u64);
}

/** A single step of container filesystem construction, carried out in
 * order by the container init.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum ContainerOp {
    Root {
        host: PathBuf,
        flags: BindFlags,
    },
    Etc {
        host: PathBuf,
        prefix: String,
    },
    Proc {
        target: PathBuf,
    },
    Dev {
        target: PathBuf,
        writable: bool,
    },
    Tmpfs {
        target: PathBuf,
        size: usize,
        perm: u32,
    },
    Readonly {
        target: PathBuf,
        perm: u32,
    },
    Bind {
        source: PathBuf,
        target: PathBuf,
        flags: BindFlags,
    },
    Overlay {
        target: PathBuf,
        lower: Vec<PathBuf>,
        upper: PathBuf,
        work: PathBuf,
    },
    OverlayReadonly {
        target: PathBuf,
        lower: Vec<PathBuf>,
    },
    Link {
        target: PathBuf,
        linkname: String,
        dereference: bool,
    },
    Mkdir {
        target: PathBuf,
        perm: u32,
    },
    Place {
        target: PathBuf,
        data: Vec<u8>,
    },
    Remount {
        target: PathBuf,
        flags: RemountFlags,
    },
}

impl ContainerOp {
    pub fn target(&self) -> PathBuf {
        match self {
            ContainerOp::Root { .. } => PathBuf::from("/"),
            ContainerOp::Etc { .. } => PathBuf::from("/etc"),
            ContainerOp::Proc { target }
            | ContainerOp::Dev { target, .. }
            | ContainerOp::Tmpfs { target, .. }
            | ContainerOp::Readonly { target, .. }
            | ContainerOp::Bind { target, .. }
            | ContainerOp::Overlay { target, .. }
            | ContainerOp::OverlayReadonly { target, .. }
            | ContainerOp::Link { target, .. }
            | ContainerOp::Mkdir { target, .. }
            | ContainerOp::Place { target, .. }
            | ContainerOp::Remount { target, .. } => target.clone(),
        }
    }
}

/** Everything the container init needs to set up and start the program. */
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub hostname: String,
    pub retain_session: bool,
    pub host_net: bool,
    pub host_abstract: bool,

    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub dir: PathBuf,
    pub uid: u32,
    pub gid: u32,

    pub forward_cancel: bool,
    pub seccomp_flags: SeccompFlags,
    pub seccomp_presets: SeccompPresets,

    pub ops: Vec<ContainerOp>,
}

impl Params {
    pub fn push(&mut self, op: ContainerOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn proc(&mut self, target: impl Into<PathBuf>) -> &mut Self {
        self.push(ContainerOp::Proc {
            target: target.into(),
        })
    }

    pub fn dev(&mut self, target: impl Into<PathBuf>, writable: bool) -> &mut Self {
        self.push(ContainerOp::Dev {
            target: target.into(),
            writable,
        })
    }

    pub fn tmpfs(
        &mut self,
        target: impl Into<PathBuf>,
        size: usize,
        perm: u32,
    ) -> &mut Self {
        self.push(ContainerOp::Tmpfs {
            target: target.into(),
            size,
            perm,
        })
    }

    pub fn bind(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        flags: BindFlags,
    ) -> &mut Self {
        self.push(ContainerOp::Bind {
            source: source.into(),
            target: target.into(),
            flags,
        })
    }

    pub fn mkdir(&mut self, target: impl Into<PathBuf>, perm: u32) -> &mut Self {
        self.push(ContainerOp::Mkdir {
            target: target.into(),
            perm,
        })
    }

    pub fn place(&mut self, target: impl Into<PathBuf>, data: Vec<u8>) -> &mut Self {
        self.push(ContainerOp::Place {
            target: target.into(),
            data,
        })
    }

    pub fn remount(
        &mut self,
        target: impl Into<PathBuf>,
        flags: RemountFlags,
    ) -> &mut Self {
        self.push(ContainerOp::Remount {
            target: target.into(),
            flags,
        })
    }
}
