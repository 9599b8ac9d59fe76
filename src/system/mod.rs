mod acl;
pub mod dbus;
mod direct;
mod link;
mod mkdir;
mod wayland;

pub use acl::*;
pub use direct::*;
pub use link::*;
pub use mkdir::*;
pub use wayland::*;

use crate::types::{BusConfig, Enablement};
use anyhow::{Result, anyhow};
use dbus::DBusOp;
use log::{debug, error};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reverted once no instance of the identity remains.
pub const USER: Enablement = Enablement::EM;
/// Reverted when the owning instance exits.
pub const PROCESS: Enablement = Enablement(Enablement::EM.0 << 1);

/** Selects which tracked operations a revert undoes.
 *
 * The default selects everything except user scoped state and is what a
 * failed commit rolls back with.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Criteria(pub Option<Enablement>);

impl Criteria {
    pub fn new(ec: Enablement) -> Self {
        Self(Some(ec))
    }

    pub fn has(&self, et: Enablement) -> bool {
        match self.0 {
            None => et != USER,
            Some(ec) => ec.has(et),
        }
    }
}

/// A long running helper process backing committed state.
pub trait Broker: Send {
    fn close(&mut self) -> Result<()>;
}

/** Host side effects of the system state tracker. */
pub trait SysDispatcher: Send + Sync {
    fn mkdir(&self, path: &Path, perm: u32) -> io::Result<()>;
    fn chmod(&self, path: &Path, perm: u32) -> io::Result<()>;
    fn link(&self, src: &Path, dst: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    /// Replaces the ACL entry of `uid`, removing it when `perms` is empty.
    fn acl_update(&self, path: &Path, uid: u32, perms: AclPerms) -> io::Result<()>;
    fn wayland_bind(
        &self,
        dst: &Path,
        src: &Path,
        app_id: &str,
        instance_id: &str,
    ) -> Result<Box<dyn Broker>>;
    fn dbus_proxy_start(&self, args: &[String]) -> Result<Box<dyn Broker>>;
}

pub enum SysOp {
    Mkdir(MkdirOp),
    Acl(AclOp),
    Link(LinkOp),
    Wayland(WaylandOp),
    DBus(DBusOp),
}

impl SysOp {
    pub fn scope(&self) -> Enablement {
        match self {
            SysOp::Mkdir(op) => op.et,
            SysOp::Acl(op) => op.et,
            SysOp::Link(op) => op.et,
            SysOp::Wayland(_) | SysOp::DBus(_) => PROCESS,
        }
    }

    fn apply(&mut self, d: &dyn SysDispatcher, uid: u32) -> Result<()> {
        match self {
            SysOp::Mkdir(op) => op.apply(d),
            SysOp::Acl(op) => op.apply(d, uid),
            SysOp::Link(op) => op.apply(d),
            SysOp::Wayland(op) => op.apply(d),
            SysOp::DBus(op) => op.apply(d),
        }
    }

    fn revert(&mut self, d: &dyn SysDispatcher, uid: u32) -> Result<()> {
        match self {
            SysOp::Mkdir(op) => op.revert(d),
            SysOp::Acl(op) => op.revert(d, uid),
            SysOp::Link(op) => op.revert(d),
            SysOp::Wayland(op) => op.revert(d),
            SysOp::DBus(op) => op.revert(d),
        }
    }
}

impl fmt::Display for SysOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysOp::Mkdir(op) => write!(f, "{}", op),
            SysOp::Acl(op) => write!(f, "{}", op),
            SysOp::Link(op) => write!(f, "{}", op),
            SysOp::Wayland(op) => write!(f, "{}", op),
            SysOp::DBus(op) => write!(f, "{}", op),
        }
    }
}

/** One bus handed to the message bus proxy. */
pub struct ProxyBus<'a> {
    pub upstream: String,
    pub config: &'a BusConfig,
    pub path: PathBuf,
}

/** Accumulates reversible host actions for one instance, applies them
 * in order on commit and undoes them in reverse on revert.
 */
pub struct SystemState {
    uid: u32,
    ops: Vec<SysOp>,
    d: Arc<dyn SysDispatcher>,
    committed: bool,
    reverted: bool,
}

impl SystemState {
    pub fn new(uid: u32, d: Arc<dyn SysDispatcher>) -> Self {
        Self {
            uid,
            ops: Vec::new(),
            d,
            committed: false,
            reverted: false,
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn ops(&self) -> &[SysOp] {
        &self.ops
    }

    /// Creates `path` if it is missing. Never removed on revert.
    pub fn ensure(&mut self, path: impl Into<PathBuf>, perm: u32) -> &mut Self {
        self.ops.push(SysOp::Mkdir(MkdirOp {
            et: USER,
            path: path.into(),
            perm,
            ephemeral: false,
        }));
        self
    }

    /// Creates `path`, removed on revert when `et` is in scope.
    pub fn ephemeral(
        &mut self,
        et: Enablement,
        path: impl Into<PathBuf>,
        perm: u32,
    ) -> &mut Self {
        self.ops.push(SysOp::Mkdir(MkdirOp {
            et,
            path: path.into(),
            perm,
            ephemeral: true,
        }));
        self
    }

    pub fn update_perm(
        &mut self,
        path: impl Into<PathBuf>,
        perms: AclPerms,
    ) -> &mut Self {
        self.update_perm_type(PROCESS, path, perms)
    }

    pub fn update_perm_type(
        &mut self,
        et: Enablement,
        path: impl Into<PathBuf>,
        perms: AclPerms,
    ) -> &mut Self {
        self.ops.push(SysOp::Acl(AclOp {
            et,
            path: path.into(),
            perms,
        }));
        self
    }

    pub fn link(
        &mut self,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> &mut Self {
        self.ops.push(SysOp::Link(LinkOp {
            et: PROCESS,
            src: src.into(),
            dst: dst.into(),
        }));
        self
    }

    pub fn wayland(
        &mut self,
        dst: impl Into<PathBuf>,
        src: impl Into<PathBuf>,
        app_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> &mut Self {
        self.ops.push(SysOp::Wayland(WaylandOp {
            dst: dst.into(),
            src: src.into(),
            app_id: app_id.into(),
            instance_id: instance_id.into(),
            handle: None,
        }));
        self
    }

    pub fn proxy_dbus(
        &mut self,
        session: ProxyBus<'_>,
        system: Option<ProxyBus<'_>>,
    ) -> Result<&mut Self> {
        self.ops.push(SysOp::DBus(DBusOp::new(session, system)?));
        Ok(self)
    }

    /** Applies every tracked op in order. On failure, the ops already
     * applied are rolled back before the error is returned.
     */
    pub fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(anyhow!("state committed twice"));
        }
        self.committed = true;

        for i in 0..self.ops.len() {
            debug!("Applying {}", self.ops[i]);
            if let Err(e) = self.ops[i].apply(&*self.d, self.uid) {
                self.reverted = true;
                for op in self.ops[..i].iter_mut().rev() {
                    if !Criteria::default().has(op.scope()) {
                        continue;
                    }
                    if let Err(re) = op.revert(&*self.d, self.uid) {
                        error!("Cannot roll back {}: {:#}", op, re);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undoes every op in scope of `ec`, last applied first.
    pub fn revert(&mut self, ec: &Criteria) -> Result<(), Vec<anyhow::Error>> {
        if !self.committed {
            return Err(vec![anyhow!("state not committed")]);
        }
        if self.reverted {
            return Err(vec![anyhow!("state reverted twice")]);
        }
        self.reverted = true;

        let mut errors = Vec::new();
        for op in self.ops.iter_mut().rev() {
            if !ec.has(op.scope()) {
                debug!("Skipping {}", op);
                continue;
            }
            debug!("Reverting {}", op);
            if let Err(e) = op.revert(&*self.d, self.uid) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SysRecorder;
    use rstest::*;

    #[rstest]
    #[case(Criteria::default(), USER, false)]
    #[case(Criteria::default(), PROCESS, true)]
    #[case(Criteria::default(), Enablement::WAYLAND, true)]
    #[case(Criteria::new(PROCESS), PROCESS, true)]
    #[case(Criteria::new(PROCESS), USER, false)]
    #[case(Criteria::new(PROCESS | USER), USER, true)]
    #[case(Criteria::new(PROCESS), Enablement::WAYLAND, false)]
    fn test_criteria(
        #[case] ec: Criteria,
        #[case] et: Enablement,
        #[case] want: bool,
    ) {
        assert_eq!(ec.has(et), want);
    }

    #[test]
    fn test_commit_revert_order() -> anyhow::Result<()> {
        let d = Arc::new(SysRecorder::default());
        let mut sys = SystemState::new(1000009, d.clone());
        sys.ensure("/tmp/rampart.0", 0o711)
            .ephemeral(PROCESS, "/tmp/rampart.0/id", 0o711)
            .update_perm("/tmp/rampart.0/id", AclPerms::EXECUTE)
            .update_perm_type(USER, "/tmp/rampart.0", AclPerms::EXECUTE);
        assert!(d.calls().is_empty());

        sys.commit()?;
        assert_eq!(
            d.take(),
            vec![
                "mkdir /tmp/rampart.0 0711",
                "chmod /tmp/rampart.0 0711",
                "mkdir /tmp/rampart.0/id 0711",
                "chmod /tmp/rampart.0/id 0711",
                "acl /tmp/rampart.0/id 1000009 --x",
                "acl /tmp/rampart.0 1000009 --x",
            ]
        );

        assert!(sys.revert(&Criteria::new(PROCESS)).is_ok());
        assert_eq!(
            d.take(),
            vec![
                "acl /tmp/rampart.0/id 1000009 ---",
                "remove /tmp/rampart.0/id",
            ]
        );
        assert!(sys.revert(&Criteria::new(PROCESS)).is_err());
        assert!(sys.commit().is_err());
        Ok(())
    }

    #[test]
    fn test_commit_rolls_back_prefix() {
        let d = Arc::new(SysRecorder::failing("/tmp/b"));
        let mut sys = SystemState::new(1000000, d.clone());
        sys.ensure("/tmp/s", 0o700)
            .ephemeral(PROCESS, "/tmp/a", 0o700)
            .ephemeral(PROCESS, "/tmp/b", 0o700)
            .ephemeral(PROCESS, "/tmp/c", 0o700);

        assert!(sys.commit().is_err());
        assert_eq!(
            d.take(),
            vec![
                "mkdir /tmp/s 0700",
                "chmod /tmp/s 0700",
                "mkdir /tmp/a 0700",
                "chmod /tmp/a 0700",
                "mkdir /tmp/b 0700",
                "remove /tmp/a",
            ]
        );
        assert!(sys.revert(&Criteria::default()).is_err());
    }

    #[test]
    fn test_revert_collects_errors() -> anyhow::Result<()> {
        let d = Arc::new(SysRecorder::default());
        let mut sys = SystemState::new(1000000, d.clone());
        sys.ephemeral(PROCESS, "/tmp/a", 0o700)
            .ephemeral(PROCESS, "/tmp/b", 0o700);
        sys.commit()?;
        d.fail_on("/tmp/a");
        d.fail_on("/tmp/b");

        let errors = sys.revert(&Criteria::default()).err().unwrap_or_default();
        assert_eq!(errors.len(), 2);
        Ok(())
    }

    #[test]
    fn test_revert_before_commit() {
        let d = Arc::new(SysRecorder::default());
        let mut sys = SystemState::new(1000000, d.clone());
        sys.ephemeral(PROCESS, "/tmp/a", 0o700);
        assert!(sys.revert(&Criteria::default()).is_err());
        assert!(d.calls().is_empty());
    }
}
