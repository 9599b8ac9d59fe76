//! Scripted dispatchers shared by unit tests.

use crate::container::{Container, ContainerExit, SeccompFlags};
use crate::dispatcher::{
    ChildWait, Dispatcher, FileStat, ReceiveError, ShimProcess,
};
use crate::system::{AclPerms, Broker, SysDispatcher};
use anyhow::{Result, anyhow};
use nix::sys::signal::Signal;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

/** Records every call and answers from the tables it was built with. */
pub struct Recorder {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
    pub env: BTreeMap<String, String>,

    pub files: BTreeMap<PathBuf, Vec<u8>>,
    pub stats: BTreeMap<PathBuf, FileStat>,
    pub dirs: BTreeMap<PathBuf, Vec<String>>,
    pub symlinks: BTreeMap<PathBuf, PathBuf>,
    /// Paths `eval_symlinks` reports as missing.
    pub absent: BTreeSet<PathBuf>,
    pub groups: BTreeMap<String, u32>,

    pub helper: Result<(i32, String), io::ErrorKind>,
    pub temp: PathBuf,

    /// Returned by `receive`.
    pub payload: Vec<u8>,
    /// Returned by `sigcont_relay`.
    pub relay: Vec<u8>,

    pub shim_pid: i32,
    pub shim_exit: i32,
    pub shim_delay: Option<Duration>,
    pub shim_fails: bool,
    /// Everything the monitor wrote to the shim setup pipe.
    pub setup: Arc<Mutex<Vec<u8>>>,

    pub container_exit: ContainerExit,
    pub container_start_fails: bool,

    signals: Mutex<Option<mpsc::Sender<Signal>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            pid: 0xdead,
            uid: 1000,
            gid: 100,
            env: BTreeMap::new(),
            files: BTreeMap::new(),
            stats: BTreeMap::new(),
            dirs: BTreeMap::new(),
            symlinks: BTreeMap::new(),
            absent: BTreeSet::new(),
            groups: BTreeMap::new(),
            helper: Ok((0, "0\n".into())),
            temp: PathBuf::from("/tmp"),
            payload: Vec::new(),
            relay: Vec::new(),
            shim_pid: 0xbeef,
            shim_exit: 0,
            shim_delay: None,
            shim_fails: false,
            setup: Arc::new(Mutex::new(Vec::new())),
            container_exit: ContainerExit::Exited(0),
            container_start_fails: false,
            signals: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Recorder {
    fn record(&self, call: String) {
        self.calls.lock().expect("calls poisoned").push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Delivers `signal` to whoever called `notify`.
    pub fn deliver(&self, signal: Signal) -> bool {
        match &*self.signals.lock().expect("signals poisoned") {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    pub fn setup_bytes(&self) -> Vec<u8> {
        self.setup.lock().expect("setup poisoned").clone()
    }
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("setup poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct ScriptedChild {
    code: i32,
    delay: Option<Duration>,
}

impl ChildWait for ScriptedChild {
    fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(ExitStatus::from_raw(self.code << 8))
    }
}

impl Dispatcher for Recorder {
    fn getpid(&self) -> i32 {
        self.pid
    }

    fn getuid(&self) -> u32 {
        self.uid
    }

    fn getgid(&self) -> u32 {
        self.gid
    }

    fn lookup_env(&self, key: &str) -> Option<String> {
        self.record(format!("lookup_env {}", key));
        self.env.get(key).cloned()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.record(format!("stat {}", path.display()));
        if let Some(stat) = self.stats.get(path) {
            return Ok(*stat);
        }
        if self.dirs.contains_key(path) {
            return Ok(FileStat {
                mode: 0o40755,
                is_dir: true,
            });
        }
        if self.files.contains_key(path) {
            return Ok(FileStat {
                mode: 0o100644,
                is_dir: false,
            });
        }
        Err(io::ErrorKind::NotFound.into())
    }

    fn read_file(&self, path: &Path, limit: usize) -> io::Result<Vec<u8>> {
        self.record(format!("read_file {}", path.display()));
        let data = self
            .files
            .get(path)
            .ok_or(io::Error::from(io::ErrorKind::NotFound))?;
        Ok(data.iter().take(limit + 1).copied().collect())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        self.record(format!("read_dir {}", path.display()));
        self.dirs
            .get(path)
            .cloned()
            .ok_or(io::Error::from(io::ErrorKind::NotFound))
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp.clone()
    }

    fn eval_symlinks(&self, path: &Path) -> io::Result<PathBuf> {
        self.record(format!("eval_symlinks {}", path.display()));
        if self.absent.contains(path) {
            return Err(io::ErrorKind::NotFound.into());
        }
        Ok(self
            .symlinks
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_path_buf()))
    }

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>> {
        self.record(format!("lookup_group {}", name));
        Ok(self.groups.get(name).copied())
    }

    fn helper_output(&self, helper: &Path) -> io::Result<Output> {
        self.record(format!("helper_output {}", helper.display()));
        match &self.helper {
            Ok((code, stdout)) => Ok(Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.clone().into_bytes(),
                stderr: Vec::new(),
            }),
            Err(kind) => Err((*kind).into()),
        }
    }

    fn overflow_uid(&self) -> u32 {
        65534
    }

    fn overflow_gid(&self) -> u32 {
        65534
    }

    fn start_shim(
        &self,
        helper: &Path,
        env: &[(String, String)],
    ) -> io::Result<ShimProcess> {
        let env: Vec<String> =
            env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        self.record(format!("start_shim {} {}", helper.display(), env.join(" ")));
        if self.shim_fails {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        Ok(ShimProcess {
            pid: self.shim_pid,
            setup: Box::new(SharedWriter(self.setup.clone())),
            child: Box::new(ScriptedChild {
                code: self.shim_exit,
                delay: self.shim_delay,
            }),
        })
    }

    fn kill(&self, pid: i32, signal: Signal) -> io::Result<()> {
        self.record(format!("kill {} {}", pid, signal));
        Ok(())
    }

    fn notify(&self, signals: &[Signal]) -> Result<mpsc::Receiver<Signal>> {
        let names: Vec<String> = signals.iter().map(|s| s.to_string()).collect();
        self.record(format!("notify {}", names.join(" ")));
        let (tx, rx) = mpsc::channel();
        *self.signals.lock().expect("signals poisoned") = Some(tx);
        Ok(rx)
    }

    fn set_dumpable(&self, dumpable: bool) -> Result<()> {
        self.record(format!("set_dumpable {}", dumpable));
        Ok(())
    }

    fn set_pdeathsig(&self, signal: Signal) -> Result<()> {
        self.record(format!("set_pdeathsig {}", signal));
        Ok(())
    }

    fn receive(&self, key: &str) -> Result<Box<dyn Read + Send>, ReceiveError> {
        self.record(format!("receive {}", key));
        if self.payload.is_empty() {
            return Err(ReceiveError::NotSet(key.to_string()));
        }
        Ok(Box::new(Cursor::new(self.payload.clone())))
    }

    fn sigcont_relay(&self, monitor: i32) -> Result<Box<dyn Read + Send>> {
        self.record(format!("sigcont_relay {}", monitor));
        Ok(Box::new(Cursor::new(self.relay.clone())))
    }

    fn container_start(&self, z: &mut Container) -> Result<()> {
        self.record(format!("container_start {}", z.init.display()));
        if self.container_start_fails {
            return Err(anyhow!("cannot start container init"));
        }
        Ok(())
    }

    fn container_serve(&self, z: &mut Container) -> Result<()> {
        self.record(format!("container_serve {}", z.params.path.display()));
        Ok(())
    }

    fn container_wait(&self, _z: &mut Container) -> Result<ContainerExit> {
        self.record("container_wait".into());
        Ok(self.container_exit)
    }

    fn seccomp_load(&self, flags: SeccompFlags) -> Result<()> {
        self.record(format!("seccomp_load {}", flags.0));
        Ok(())
    }

    fn exit(&self, code: i32) -> ! {
        panic!("exit {}", code)
    }
}

/** Records host side effects of the tracker as short command lines. */
#[derive(Default)]
pub struct SysRecorder {
    calls: Arc<Mutex<Vec<String>>>,
    fail: Mutex<Vec<PathBuf>>,
}

struct RecordedBroker {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Broker for RecordedBroker {
    fn close(&mut self) -> Result<()> {
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(format!("close {}", self.name));
        Ok(())
    }
}

impl SysRecorder {
    pub fn failing(path: impl Into<PathBuf>) -> Self {
        let d = Self::default();
        d.fail_on(path);
        d
    }

    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.fail.lock().expect("fail poisoned").push(path.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().expect("calls poisoned"))
    }

    fn record(&self, call: String, path: &Path) -> io::Result<()> {
        self.calls.lock().expect("calls poisoned").push(call);
        if self.fail.lock().expect("fail poisoned").iter().any(|p| p == path) {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        Ok(())
    }

    fn broker(&self, name: String) -> Box<dyn Broker> {
        Box::new(RecordedBroker {
            name,
            calls: self.calls.clone(),
        })
    }
}

impl SysDispatcher for SysRecorder {
    fn mkdir(&self, path: &Path, perm: u32) -> io::Result<()> {
        self.record(format!("mkdir {} {:04o}", path.display(), perm), path)
    }

    fn chmod(&self, path: &Path, perm: u32) -> io::Result<()> {
        self.record(format!("chmod {} {:04o}", path.display(), perm), path)
    }

    fn link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        self.record(format!("link {} {}", src.display(), dst.display()), dst)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.record(format!("remove {}", path.display()), path)
    }

    fn acl_update(&self, path: &Path, uid: u32, perms: AclPerms) -> io::Result<()> {
        self.record(format!("acl {} {} {}", path.display(), uid, perms), path)
    }

    fn wayland_bind(
        &self,
        dst: &Path,
        src: &Path,
        app_id: &str,
        instance_id: &str,
    ) -> Result<Box<dyn Broker>> {
        self.record(
            format!(
                "wayland {} {} {} {}",
                dst.display(),
                src.display(),
                app_id,
                instance_id
            ),
            dst,
        )?;
        Ok(self.broker(format!("wayland {}", dst.display())))
    }

    fn dbus_proxy_start(&self, args: &[String]) -> Result<Box<dyn Broker>> {
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(format!("dbus {}", args.join(" ")));
        Ok(self.broker("dbus".into()))
    }
}
