mod params;
pub mod seccomp;

pub use params::*;

use anyhow::{Context, Result, anyhow};
use log::{debug, trace};
use nix::fcntl::OFlag;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{Id, WaitPidFlag, waitid};
use nix::unistd::Pid;
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Names the setup descriptor inherited by the container init.
pub const INIT_ENV: &str = "RAMPART_INIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerExit {
    Exited(i32),
    Signaled(i32),
    /// The program terminated after its context was cancelled.
    Cancelled,
}

/** Cancels a running container. SIGTERM first, SIGKILL once the wait
 * delay runs out.
 *
 * No signal is sent once the init has been reaped, so a reused pid is
 * never hit.
 */
#[derive(Debug, Clone)]
pub struct Canceller {
    pid: i32,
    wait_delay: Duration,
    cancelled: Arc<AtomicBool>,
    reaped: Arc<Mutex<bool>>,
}

impl Canceller {
    pub fn new(pid: i32, wait_delay: Duration) -> Self {
        Self {
            pid,
            wait_delay,
            cancelled: Arc::new(AtomicBool::new(false)),
            reaped: Arc::new(Mutex::new(false)),
        }
    }

    fn signal(
        reaped: &Mutex<bool>,
        pid: i32,
        signal: Signal,
    ) -> nix::Result<()> {
        let reaped = reaped.lock().unwrap_or_else(PoisonError::into_inner);
        if *reaped {
            trace!("Container init {} already reaped, skipping {}", pid, signal);
            return Ok(());
        }
        kill(Pid::from_raw(pid), signal)
    }

    /// Called with the init still a zombie, right before it is reaped.
    fn set_reaped(&self) {
        *self.reaped.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Cancelling container init {}", self.pid);
        if let Err(e) = Self::signal(&self.reaped, self.pid, Signal::SIGTERM) {
            debug!("Cannot terminate container init: {}", e);
        }

        let pid = self.pid;
        let wait_delay = self.wait_delay;
        let reaped = self.reaped.clone();
        std::thread::spawn(move || {
            std::thread::sleep(wait_delay);
            if let Err(e) = Self::signal(&reaped, pid, Signal::SIGKILL) {
                debug!("Cannot kill container init {}: {}", pid, e);
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/** The container as seen from the shim: an init process started from
 * `init`, fed `params` over an inherited pipe.
 */
pub struct Container {
    pub init: PathBuf,
    pub params: Params,
    pub wait_delay: Duration,
    child: Option<Child>,
    setup: Option<File>,
    canceller: Option<Canceller>,
}

impl Container {
    pub fn new(init: PathBuf, params: Params, wait_delay: Duration) -> Self {
        Self {
            init,
            params,
            wait_delay,
            child: None,
            setup: None,
            canceller: None,
        }
    }

    pub fn canceller(&self) -> Option<Canceller> {
        self.canceller.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(anyhow!("container already started"));
        }

        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .context("Creating container setup pipe")?;
        let fd = read.as_raw_fd();

        let mut command = Command::new(&self.init);
        command
            .env_clear()
            .env(INIT_ENV, fd.to_string())
            .current_dir("/");
        // the read end has to survive exec in the child only
        unsafe {
            command.pre_exec(move || {
                if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        trace!("Starting container init {}", self.init.display());
        let child = command.spawn().map_err(|e| {
            anyhow!("cannot start container init {}: {}", self.init.display(), e)
        })?;
        drop(read);

        self.canceller =
            Some(Canceller::new(child.id() as i32, self.wait_delay));
        self.setup = Some(File::from(write));
        self.child = Some(child);
        Ok(())
    }

    /// Transmits params to the init and closes the setup pipe.
    pub fn serve(&mut self) -> Result<()> {
        let mut setup = self
            .setup
            .take()
            .ok_or_else(|| anyhow!("container not started"))?;
        serde_json::to_writer(&mut setup, &self.params)
            .context("Encoding container params")?;
        setup.flush().context("Writing container params")?;
        Ok(())
    }

    pub fn wait(&mut self) -> Result<ContainerExit> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| anyhow!("container not started"))?;
        // wait for termination but leave the zombie in place until the
        // canceller has stopped signalling
        let pid = Pid::from_raw(child.id() as i32);
        loop {
            let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
            match waitid(Id::Pid(pid), flags) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(e).context("Waiting for container init");
                }
            }
        }
        if let Some(canceller) = &self.canceller {
            canceller.set_reaped();
        }
        let status = child.wait().context("Waiting for container init")?;

        if self.canceller.as_ref().is_some_and(Canceller::is_cancelled) {
            return Ok(ContainerExit::Cancelled);
        }

        if let Some(code) = status.code() {
            Ok(ContainerExit::Exited(code))
        } else if let Some(signal) = status.signal() {
            Ok(ContainerExit::Signaled(signal))
        } else {
            Err(anyhow!("unexpected wait status {}", status))
        }
    }
}
