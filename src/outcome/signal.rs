//! SIGCONT relay for the shim.
//!
//! The shim runs as a different user than the monitor, so the monitor
//! can only reach it with SIGCONT. The handler classifies each delivery
//! by sender and writes one byte to a pipe read by the shim.

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use std::os::fd::{IntoRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};

/// SIGCONT came from the monitor: exit request.
pub const RELAY_REQUEST: u8 = 0;
/// The monitor is no longer the parent.
pub const RELAY_ORPHAN: u8 = 1;
/// The kernel handed over no sender.
pub const RELAY_BAD_INFO: u8 = 2;
/// SIGCONT from some other process.
pub const RELAY_FOREIGN: u8 = 3;

static MONITOR: AtomicI32 = AtomicI32::new(-1);
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

fn put(byte: u8) {
    let fd = WRITE_FD.load(Ordering::Relaxed);
    let buf = [byte];
    // async signal safe calls only
    unsafe {
        if libc::write(fd, buf.as_ptr().cast(), 1) != 1 {
            libc::_exit(1);
        }
    }
}

extern "C" fn handle(
    _signal: libc::c_int,
    info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    // the interrupted thread must find errno as it left it
    let saved = Errno::last_raw();
    classify(info);
    Errno::set_raw(saved);
}

fn classify(info: *mut libc::siginfo_t) {
    if info.is_null() {
        put(RELAY_BAD_INFO);
        return;
    }
    let monitor = MONITOR.load(Ordering::Relaxed);
    let sender = unsafe { (*info).si_pid() };
    if sender == monitor {
        put(RELAY_REQUEST);
        return;
    }
    put(RELAY_FOREIGN);
    if unsafe { libc::getppid() } != monitor {
        put(RELAY_ORPHAN);
    }
}

/** Installs the SIGCONT handler and returns the read end of its pipe.
 *
 * Refuses to replace a handler that is already installed.
 */
pub fn install(monitor: i32) -> Result<OwnedFd> {
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    if unsafe { libc::sigaction(libc::SIGCONT, std::ptr::null(), &mut current) }
        != 0
    {
        return Err(anyhow!(
            "cannot query SIGCONT handler: {}",
            std::io::Error::last_os_error()
        ));
    }
    if current.sa_sigaction != libc::SIG_DFL {
        return Err(Errno::ENOTRECOVERABLE)
            .context("SIGCONT handler already installed");
    }

    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .context("Creating SIGCONT relay pipe")?;
    MONITOR.store(monitor, Ordering::SeqCst);
    WRITE_FD.store(write.into_raw_fd(), Ordering::SeqCst);

    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handle as usize;
    // interrupted waits in the shim resume instead of failing with EINTR
    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    unsafe { libc::sigemptyset(&mut action.sa_mask) };
    if unsafe { libc::sigaction(libc::SIGCONT, &action, std::ptr::null_mut()) }
        != 0
    {
        return Err(anyhow!(
            "cannot install SIGCONT handler: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(read)
}
