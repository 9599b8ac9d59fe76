use super::{Dispatcher, FileStat, ReceiveError, ShimProcess};
use crate::container::{Container, ContainerExit, SeccompFlags, seccomp};
use crate::outcome::signal;
use anyhow::{Context, Result, anyhow};
use log::{Log, trace};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, Signal, kill, sigaction,
};
use nix::unistd::{Group, Pid};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc;

/// Names the setup descriptor inherited by the shim.
pub const SHIM_ENV: &str = "RAMPART_SHIM";

const OVERFLOW_DEFAULT: u32 = 65534;

/// Write end of the pipe fed by `forward`.
static NOTIFY_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward(signal: libc::c_int) {
    let saved = Errno::last_raw();
    let fd = NOTIFY_FD.load(Ordering::Relaxed);
    let buf = [signal as u8];
    unsafe { libc::write(fd, buf.as_ptr().cast(), 1) };
    Errno::set_raw(saved);
}

/** Passes every call straight through to the operating system. */
pub struct Direct;

fn read_overflow(path: &str) -> u32 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(OVERFLOW_DEFAULT)
}

// Clears FD_CLOEXEC in the child so `fd` survives exec.
unsafe fn inherit_fd(command: &mut Command, fd: RawFd) {
    unsafe {
        command.pre_exec(move || {
            if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

impl Dispatcher for Direct {
    fn getpid(&self) -> i32 {
        nix::unistd::getpid().as_raw()
    }

    fn getuid(&self) -> u32 {
        nix::unistd::getuid().as_raw()
    }

    fn getgid(&self) -> u32 {
        nix::unistd::getgid().as_raw()
    }

    fn lookup_env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileStat {
            mode: metadata.mode(),
            is_dir: metadata.is_dir(),
        })
    }

    fn read_file(&self, path: &Path, limit: usize) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        File::open(path)?
            .take(limit as u64 + 1)
            .read_to_end(&mut data)?;
        Ok(data)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn eval_symlinks(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>> {
        Group::from_name(name)
            .map(|group| group.map(|g| g.gid.as_raw()))
            .map_err(io::Error::from)
    }

    fn helper_output(&self, helper: &Path) -> io::Result<Output> {
        Command::new(helper).env_clear().current_dir("/").output()
    }

    fn overflow_uid(&self) -> u32 {
        read_overflow("/proc/sys/kernel/overflowuid")
    }

    fn overflow_gid(&self) -> u32 {
        read_overflow("/proc/sys/kernel/overflowgid")
    }

    fn start_shim(
        &self,
        helper: &Path,
        env: &[(String, String)],
    ) -> io::Result<ShimProcess> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
        let fd = read.as_raw_fd();

        let mut command = Command::new(helper);
        command
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(SHIM_ENV, fd.to_string())
            .current_dir("/");
        unsafe { inherit_fd(&mut command, fd) };

        trace!("Starting setuid helper {}", helper.display());
        let child = command.spawn()?;
        drop(read);

        Ok(ShimProcess {
            pid: child.id() as i32,
            setup: Box::new(File::from(write)),
            child: Box::new(child),
        })
    }

    fn kill(&self, pid: i32, signal: Signal) -> io::Result<()> {
        kill(Pid::from_raw(pid), signal).map_err(io::Error::from)
    }

    fn notify(&self, signals: &[Signal]) -> Result<mpsc::Receiver<Signal>> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .context("Creating signal pipe")?;
        let write = write.into_raw_fd();
        if NOTIFY_FD
            .compare_exchange(-1, write, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            unsafe { libc::close(write) };
            return Err(anyhow!("signal notification already armed"));
        }

        // a handler rather than a mask, so delivery to any thread counts
        let action = SigAction::new(
            SigHandler::Handler(forward),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in signals {
            unsafe { sigaction(*signal, &action) }
                .with_context(|| format!("Catching {}", signal))?;
        }

        let (tx, rx) = mpsc::channel();
        let mut read = File::from(read);
        std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            while read.read_exact(&mut buf).is_ok() {
                let Ok(signal) = Signal::try_from(i32::from(buf[0])) else {
                    continue;
                };
                if tx.send(signal).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn set_dumpable(&self, dumpable: bool) -> Result<()> {
        nix::sys::prctl::set_dumpable(dumpable)
            .map_err(|e| anyhow!("cannot set SUID_DUMP_DISABLE: {}", e))
    }

    fn set_pdeathsig(&self, signal: Signal) -> Result<()> {
        nix::sys::prctl::set_pdeathsig(Some(signal))
            .map_err(|e| anyhow!("prctl(PR_SET_PDEATHSIG, {}): {}", signal, e))
    }

    fn receive(&self, key: &str) -> Result<Box<dyn Read + Send>, ReceiveError> {
        let value = std::env::var(key)
            .map_err(|_| ReceiveError::NotSet(key.to_string()))?;
        let fd: RawFd =
            value.parse().map_err(|_| ReceiveError::BadDescriptor)?;
        if fd < 0 {
            return Err(ReceiveError::BadDescriptor);
        }
        match fcntl(fd, FcntlArg::F_GETFD) {
            Ok(_) => (),
            Err(Errno::EBADF) => return Err(ReceiveError::BadDescriptor),
            Err(e) => return Err(ReceiveError::Io(e.into())),
        }
        // the descriptor was handed over by the monitor and is owned here
        Ok(Box::new(unsafe { File::from_raw_fd(fd) }))
    }

    fn sigcont_relay(&self, monitor: i32) -> Result<Box<dyn Read + Send>> {
        let read = signal::install(monitor)?;
        Ok(Box::new(File::from(read)))
    }

    fn container_start(&self, z: &mut Container) -> Result<()> {
        z.start()
    }

    fn container_serve(&self, z: &mut Container) -> Result<()> {
        z.serve()
    }

    fn container_wait(&self, z: &mut Container) -> Result<ContainerExit> {
        z.wait()
    }

    fn seccomp_load(&self, flags: SeccompFlags) -> Result<()> {
        seccomp::load_strict(flags)
    }

    fn exit(&self, code: i32) -> ! {
        log::logger().flush();
        std::process::exit(code)
    }
}
