use super::dbus::ProxyBroker;
use super::{AclPerms, Broker, SysDispatcher, update_acl};
use anyhow::{Context, Result, anyhow};
use log::debug;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fs::{self, DirBuilder, Permissions};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

const HELPER_READY_TIMEOUT: Duration = Duration::from_secs(5);

/** Applies tracked state to the running system. */
pub struct DirectSys {
    pub wayland_helper: PathBuf,
    pub dbus_proxy: PathBuf,
}

/** The wayland helper holds its binding until it receives SIGTERM. */
struct HelperBroker {
    child: Child,
}

impl Broker for HelperBroker {
    fn close(&mut self) -> Result<()> {
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)
            .context("Terminating wayland helper")?;
        let status = self.child.wait().context("Waiting for wayland helper")?;
        debug!("Wayland helper exited with {}", status);
        Ok(())
    }
}

impl SysDispatcher for DirectSys {
    fn mkdir(&self, path: &Path, perm: u32) -> io::Result<()> {
        DirBuilder::new().mode(perm).create(path)
    }

    fn chmod(&self, path: &Path, perm: u32) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(perm))
    }

    fn link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::hard_link(src, dst)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn acl_update(&self, path: &Path, uid: u32, perms: AclPerms) -> io::Result<()> {
        update_acl(path, uid, perms)
    }

    fn wayland_bind(
        &self,
        dst: &Path,
        src: &Path,
        app_id: &str,
        instance_id: &str,
    ) -> Result<Box<dyn Broker>> {
        let mut child = Command::new(&self.wayland_helper)
            .arg(dst)
            .arg(src)
            .arg(app_id)
            .arg(instance_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("Spawning {}", self.wayland_helper.display())
            })?;

        await_ready(&mut child, HELPER_READY_TIMEOUT)?;
        Ok(Box::new(HelperBroker { child }))
    }

    fn dbus_proxy_start(&self, args: &[String]) -> Result<Box<dyn Broker>> {
        Ok(Box::new(ProxyBroker::start(&self.dbus_proxy, args)?))
    }
}

/// Waits for the helper to print "ready", killing it on anything else.
fn await_ready(child: &mut Child, timeout: Duration) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = tx.send(
                BufReader::new(stdout).read_line(&mut line).map(|_| line),
            );
        });
    }

    let failure = match rx.recv_timeout(timeout) {
        Ok(Ok(line)) if line.trim() == "ready" => return Ok(()),
        Ok(Ok(_)) | Err(mpsc::RecvTimeoutError::Disconnected) => None,
        Ok(Err(e)) => Some(anyhow!("cannot read wayland helper status: {}", e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Some(anyhow!(
            "wayland helper not ready after {:?}",
            timeout
        )),
    };
    let _ = child.kill();
    let status = child.wait().context("Waiting for wayland helper")?;
    Err(failure.unwrap_or_else(|| anyhow!("wayland helper failed: {}", status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use std::os::unix::fs::MetadataExt;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rampart-direct-sys-{}-{}",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_direct_sys_mkdir_remove() -> Result<()> {
        let d = DirectSys {
            wayland_helper: PathBuf::from("/nonexistent"),
            dbus_proxy: PathBuf::from("/nonexistent"),
        };
        let path = scratch("mkdir");
        d.mkdir(&path, 0o700)?;
        d.chmod(&path, 0o711)?;
        assert_eq!(fs::metadata(&path)?.mode() & 0o7777, 0o711);
        assert_eq!(
            d.mkdir(&path, 0o700).map_err(|e| e.kind()),
            Err(io::ErrorKind::AlreadyExists)
        );
        d.remove(&path)?;
        assert!(!path.exists());
        assert!(d.wayland_bind(&path, &path, "app", "id").is_err());
        Ok(())
    }

    #[rstest]
    #[case("echo ready", None)]
    #[case("echo nope", Some("wayland helper failed: "))]
    #[case("exit 3", Some("wayland helper failed: "))]
    #[case("sleep 5", Some("wayland helper not ready after 200ms"))]
    fn test_await_ready(
        #[case] script: &str,
        #[case] want: Option<&str>,
    ) -> Result<()> {
        let mut child = Command::new("/bin/sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        let err = await_ready(&mut child, Duration::from_millis(200))
            .err()
            .map(|e| e.to_string());
        match want {
            Some(want) => assert!(err.is_some_and(|e| e.starts_with(want))),
            None => {
                assert_eq!(err, None);
                child.wait()?;
            }
        }
        Ok(())
    }
}
