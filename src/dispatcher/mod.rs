mod direct;

pub use direct::*;

use crate::container::{Container, ContainerExit, SeccompFlags};
use anyhow::Result;
use nix::sys::signal::Signal;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub is_dir: bool,
}

pub trait ChildWait: Send {
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

impl ChildWait for std::process::Child {
    fn wait(&mut self) -> io::Result<ExitStatus> {
        std::process::Child::wait(self)
    }
}

/** A freshly spawned setuid helper, about to become the shim. */
pub struct ShimProcess {
    pub pid: i32,
    pub setup: Box<dyn Write + Send>,
    pub child: Box<dyn ChildWait>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("{0} not set")]
    NotSet(String),
    #[error("invalid config descriptor")]
    BadDescriptor,
    #[error("cannot receive setup payload: {0}")]
    Io(#[from] io::Error),
}

/** Every externally observable effect of the monitor, the shim and the
 * outcome engine goes through here.
 *
 * `Direct` passes straight through to the operating system, tests build
 * their own scripted implementation.
 */
pub trait Dispatcher: Send + Sync {
    fn getpid(&self) -> i32;
    fn getuid(&self) -> u32;
    fn getgid(&self) -> u32;
    fn lookup_env(&self, key: &str) -> Option<String>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    /// Reads at most `limit` + 1 bytes so callers can detect oversized files.
    fn read_file(&self, path: &Path, limit: usize) -> io::Result<Vec<u8>>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;
    fn temp_dir(&self) -> PathBuf;
    fn eval_symlinks(&self, path: &Path) -> io::Result<PathBuf>;

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>>;
    fn helper_output(&self, helper: &Path) -> io::Result<Output>;
    fn overflow_uid(&self) -> u32;
    fn overflow_gid(&self) -> u32;

    fn start_shim(
        &self,
        helper: &Path,
        env: &[(String, String)],
    ) -> io::Result<ShimProcess>;
    fn kill(&self, pid: i32, signal: Signal) -> io::Result<()>;
    /// Catches `signals` in every thread and delivers them on a channel.
    fn notify(&self, signals: &[Signal]) -> Result<mpsc::Receiver<Signal>>;

    fn set_dumpable(&self, dumpable: bool) -> Result<()>;
    fn set_pdeathsig(&self, signal: Signal) -> Result<()>;
    fn receive(&self, key: &str) -> Result<Box<dyn Read + Send>, ReceiveError>;
    /// Installs the SIGCONT handler and returns its notification pipe.
    fn sigcont_relay(&self, monitor: i32) -> Result<Box<dyn Read + Send>>;

    fn container_start(&self, z: &mut Container) -> Result<()>;
    fn container_serve(&self, z: &mut Container) -> Result<()>;
    fn container_wait(&self, z: &mut Container) -> Result<ContainerExit>;
    fn seccomp_load(&self, flags: SeccompFlags) -> Result<()>;

    fn exit(&self, code: i32) -> !;
}
