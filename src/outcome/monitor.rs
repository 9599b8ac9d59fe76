//! The monitor: commits an outcome, starts the shim through the setuid
//! helper and cleans up once it is gone.

use super::{
    EXIT_FAILURE, GROUPS_ENV, IDENTITY_ENV, Outcome, PAYLOAD_VERSION, Payload,
    SHIM_SETUP_TIMEOUT, SHIM_WAIT_TIMEOUT,
};
use crate::dispatcher::{ChildWait, Dispatcher};
use crate::store::Store;
use crate::system::{Criteria, PROCESS, USER};
use crate::types::{Config, Enablement, InstanceRecord};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use log::{debug, error, info, trace};
use nix::sys::signal::Signal;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

/** Scope reverted by an exiting instance given the enablements of the
 * instances of its identity still alive.
 */
pub fn revert_scope(remaining: &[Enablement]) -> Enablement {
    let mut ec = PROCESS;
    if remaining.is_empty() {
        ec |= USER;
    }
    let rt = remaining
        .iter()
        .fold(Enablement::NONE, |rt, &et| rt | et);
    ec | (rt ^ Enablement::SERVICES)
}

enum Event {
    Signal(Signal),
    Exited(io::Result<ExitStatus>),
}

struct Monitor<'a> {
    d: Arc<dyn Dispatcher>,
    store: &'a Store,
    config: &'a Config,
    exit_code: i32,
}

impl Monitor<'_> {
    /// Reports `e`, failing the monitor unless it already failed.
    fn perror(&mut self, e: anyhow::Error) {
        error!("{:#}", e);
        if self.exit_code == 0 {
            self.exit_code = EXIT_FAILURE;
        }
    }

    fn lap(state: &str, start: &mut Instant) {
        debug!("State {} took {}ms", state, start.elapsed().as_millis());
        *start = Instant::now();
    }

    fn request_exit(&self, pid: i32) {
        trace!("Requesting exit of shim {}", pid);
        if let Err(e) = self.d.kill(pid, Signal::SIGCONT) {
            error!("cannot request shim exit: {}", e);
        }
    }

    fn shim_env(&self, supp: &[u32]) -> Vec<(String, String)> {
        let mut env =
            vec![(IDENTITY_ENV.to_string(), self.config.identity.to_string())];
        if !supp.is_empty() {
            let groups: Vec<String> =
                supp.iter().map(|gid| gid.to_string()).collect();
            env.push((GROUPS_ENV.to_string(), groups.join(" ")));
        }
        env
    }

    /// Writes the payload on a worker, bounded by the setup timeout.
    fn serve(&self, mut setup: Box<dyn Write + Send>, payload: Payload) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = serde_json::to_writer(&mut setup, &payload)
                .context("Encoding setup payload")
                .and_then(|()| setup.flush().context("Writing setup payload"));
            drop(setup);
            let _ = tx.send(result);
        });
        match rx.recv_timeout(SHIM_SETUP_TIMEOUT) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(anyhow!("timed out waiting for shim to accept its setup"))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(anyhow!("setup worker exited unexpectedly"))
            }
        }
    }

    fn record(&self, record: &InstanceRecord) -> Result<()> {
        let cursor = self.store.handle(self.config.identity).lock()?;
        cursor.save(record)?;
        cursor.unlock()?;
        Ok(())
    }

    /** Waits for the shim. `requested` is set when an exit was requested
     * before the lifecycle started.
     */
    fn lifecycle(
        &mut self,
        pid: i32,
        mut child: Box<dyn ChildWait>,
        signals: mpsc::Receiver<Signal>,
        wait_delay: Duration,
        mut requested: bool,
    ) {
        let (tx, rx) = mpsc::channel();
        {
            let tx = tx.clone();
            std::thread::spawn(move || {
                for signal in signals {
                    if tx.send(Event::Signal(signal)).is_err() {
                        break;
                    }
                }
            });
        }
        std::thread::spawn(move || {
            let _ = tx.send(Event::Exited(child.wait()));
        });

        let bound = wait_delay + SHIM_WAIT_TIMEOUT;
        let mut deadline = requested.then(|| Instant::now() + bound);
        loop {
            let event = match deadline {
                None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
                Some(deadline) => rx.recv_timeout(
                    deadline.saturating_duration_since(Instant::now()),
                ),
            };
            match event {
                Ok(Event::Signal(signal)) => {
                    if requested {
                        debug!("Ignoring {}, exit already requested", signal);
                        continue;
                    }
                    info!("Received {}, requesting shim exit", signal);
                    self.request_exit(pid);
                    requested = true;
                    deadline = Some(Instant::now() + bound);
                }
                Ok(Event::Exited(Ok(status))) => {
                    match (status.code(), status.signal()) {
                        (Some(0), _) => (),
                        (Some(code), _) => self.exit_code = code,
                        (None, Some(signal)) => self.perror(anyhow!(
                            "shim {} terminated by signal {}",
                            pid,
                            signal
                        )),
                        (None, None) => self.perror(anyhow!(
                            "shim {} exited with {}",
                            pid,
                            status
                        )),
                    }
                    return;
                }
                Ok(Event::Exited(Err(e))) => {
                    self.perror(anyhow!("cannot wait for shim {}: {}", pid, e));
                    return;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.perror(anyhow!("process {} did not terminate", pid));
                    return;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /** Destroys the own record and reverts whatever no remaining instance
     * depends on.
     */
    fn cleanup(&mut self, outcome: &mut Outcome, saved: bool) {
        let handle = self.store.handle(self.config.identity);
        let id = outcome.state.id;
        let mut revert = |m: &mut Self, ec: Enablement| {
            debug!("Reverting scope {:#x}", ec.bits());
            if let Err(errors) = outcome.sys.revert(&Criteria::new(ec)) {
                for e in errors {
                    m.perror(e);
                }
            }
        };

        let cursor = match handle.lock() {
            Ok(cursor) => cursor,
            Err(e) => {
                self.perror(e.into());
                revert(self, PROCESS);
                return;
            }
        };
        if saved {
            if let Err(e) = cursor.destroy(&id) {
                self.perror(e.into());
            }
        }
        match cursor.load_header() {
            Ok(headers) => {
                let mut remaining = Vec::with_capacity(headers.len());
                for header in headers {
                    match header {
                        Ok(et) => remaining.push(et),
                        Err(e) => self.perror(e.into()),
                    }
                }
                trace!("{} instances remain", remaining.len());
                revert(self, revert_scope(&remaining));
            }
            Err(e) => {
                self.perror(e.into());
                revert(self, PROCESS);
            }
        }
        if let Err(e) = cursor.unlock() {
            self.perror(e.into());
        }
    }
}

/** Runs `outcome` to completion and returns the monitor's exit code. */
pub fn run(
    d: Arc<dyn Dispatcher>,
    mut outcome: Outcome,
    store: &Store,
    hsu: &Path,
    config: &Config,
) -> i32 {
    let mut m = Monitor {
        d: d.clone(),
        store,
        config,
        exit_code: 0,
    };
    let mut start = Instant::now();

    // armed first, so a signal never interrupts committed state unhandled
    let signals = match d.notify(&[Signal::SIGINT, Signal::SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            m.perror(e);
            return m.exit_code;
        }
    };

    if let Err(e) = outcome.sys.commit() {
        m.perror(e.context("commit"));
        return m.exit_code;
    }
    Monitor::lap("commit", &mut start);
    let env = m.shim_env(&outcome.supp);
    let shim = match d.start_shim(hsu, &env) {
        Ok(shim) => shim,
        Err(e) => {
            m.perror(anyhow!("cannot start shim through {}: {}", hsu.display(), e));
            m.cleanup(&mut outcome, false);
            return m.exit_code;
        }
    };
    debug!("Started shim {}", shim.pid);
    Monitor::lap("start", &mut start);

    let payload = Payload {
        version: PAYLOAD_VERSION,
        state: outcome.state.clone(),
    };
    let mut requested = false;
    let mut saved = false;
    match m.serve(shim.setup, payload) {
        Ok(()) => {
            Monitor::lap("serve", &mut start);
            let record = InstanceRecord {
                id: outcome.state.id,
                pid: d.getpid(),
                shim_pid: shim.pid,
                config: config.clone(),
                time: Utc::now(),
            };
            match m.record(&record) {
                Ok(()) => saved = true,
                Err(e) => {
                    m.perror(e);
                    m.request_exit(shim.pid);
                    requested = true;
                }
            }
            Monitor::lap("record", &mut start);
        }
        Err(e) => {
            m.perror(e);
            m.request_exit(shim.pid);
            requested = true;
        }
    }

    let wait_delay = outcome.state.wait_delay();
    m.lifecycle(shim.pid, shim.child, signals, wait_delay, requested);
    Monitor::lap("lifecycle", &mut start);

    m.cleanup(&mut outcome, saved);
    Monitor::lap("cleanup", &mut start);
    m.exit_code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ops::test_support::{ID, config};
    use crate::outcome::{Hsu, finalise};
    use crate::store::Store;
    use crate::testing::{Recorder, SysRecorder};
    use crate::types::InstanceId;
    use rand::Rng;
    use rstest::*;
    use std::path::PathBuf;

    const HSU: &str = "/usr/libexec/rampart/rsu";

    #[rstest]
    #[case::last(vec![], PROCESS | USER | Enablement::SERVICES)]
    #[case::wayland(vec![Enablement::WAYLAND], PROCESS | Enablement::X11 | Enablement::DBUS | Enablement::PULSE)]
    #[case::overlap(vec![Enablement::WAYLAND, Enablement::DBUS | Enablement::WAYLAND], PROCESS | Enablement::X11 | Enablement::PULSE)]
    #[case::many(vec![Enablement::NONE, Enablement::PULSE, Enablement::X11, Enablement::DBUS], PROCESS | Enablement::WAYLAND)]
    fn test_revert_scope(#[case] remaining: Vec<Enablement>, #[case] want: Enablement) {
        assert_eq!(revert_scope(&remaining), want);
    }

    struct Scratch(PathBuf);

    impl Scratch {
        fn new() -> Self {
            let name: String = rand::rng()
                .sample_iter(rand::distr::Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();
            Self(std::env::temp_dir().join(format!("rampart-monitor-{}", name)))
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn recorder() -> Recorder {
        let mut d = Recorder::default();
        d.groups.insert("video".into(), 26);
        d.env.insert("XDG_RUNTIME_DIR".into(), "/run/user/1971".into());
        d.dirs.insert("/run/user/1971/pulse".into(), vec!["native".into()]);
        d.stats.insert(
            "/run/user/1971/pulse/native".into(),
            crate::dispatcher::FileStat {
                mode: 0o140666,
                is_dir: false,
            },
        );
        d
    }

    fn launch(
        d: Arc<Recorder>,
        sys_d: Arc<SysRecorder>,
        config: &Config,
        store: &Store,
    ) -> Result<i32> {
        let hsu = Hsu::new(HSU.into());
        let outcome = finalise(
            &*d,
            sys_d,
            &hsu,
            ID,
            config,
            Path::new("/usr/libexec/rampart/init"),
            false,
        )?;
        Ok(run(d, outcome, store, Path::new(HSU), config))
    }

    fn launch_config() -> Config {
        let mut config = config();
        config.enablements = Enablement::WAYLAND | Enablement::PULSE;
        config.direct_wayland = true;
        config
    }

    #[test]
    fn test_monitor_run() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        let d = Arc::new(recorder());
        let sys_d = Arc::new(SysRecorder::default());
        let config = launch_config();

        assert_eq!(launch(d.clone(), sys_d.clone(), &config, &store)?, 0);

        let setup: Payload = serde_json::from_slice(&d.setup_bytes())?;
        assert_eq!(setup.version, PAYLOAD_VERSION);
        assert_eq!(setup.state.id, ID);
        assert_eq!(d.calls_matching("start_shim"), 1);
        assert!(d.calls().contains(&format!(
            "start_shim {} RAMPART_IDENTITY=9 RAMPART_GROUPS=26",
            HSU
        )));
        assert_eq!(d.calls_matching("kill"), 0);
        assert!(store.all()?.is_empty());

        let calls = sys_d.calls();
        // last instance of the identity
        assert!(calls.contains(&"acl /run/user/1971/rampart 1000009 ---".to_string()));
        assert!(calls.contains(&"acl /run/user/1971/wayland-0 1000009 ---".to_string()));
        assert!(calls.contains(&format!("remove /run/user/1971/rampart/{}", ID)));
        Ok(())
    }

    #[test]
    fn test_monitor_keeps_shared_state() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        let mut other = launch_config();
        other.id = "org.freedesktop.Weston".into();
        let cursor = store.handle(9).lock()?;
        cursor.save(&InstanceRecord {
            id: InstanceId::generate()?,
            pid: 1,
            shim_pid: 2,
            config: other,
            time: Utc::now(),
        })?;
        cursor.unlock()?;

        let d = Arc::new(recorder());
        let sys_d = Arc::new(SysRecorder::default());
        assert_eq!(launch(d, sys_d.clone(), &launch_config(), &store)?, 0);

        let calls = sys_d.calls();
        assert!(!calls.contains(&"acl /run/user/1971/rampart 1000009 ---".to_string()));
        assert!(!calls.contains(&"acl /run/user/1971/wayland-0 1000009 ---".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("remove /run/user/1971/rampart/")));
        assert_eq!(store.all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_monitor_reverts_past_corrupt_entry() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        store.handle(9).lock()?.unlock()?;
        let corrupt = scratch.0.join("9").join(InstanceId::generate()?.to_string());
        std::fs::write(&corrupt, b"RMPT")?;

        let d = Arc::new(recorder());
        let sys_d = Arc::new(SysRecorder::default());
        assert_eq!(
            launch(d, sys_d.clone(), &launch_config(), &store)?,
            EXIT_FAILURE
        );

        let calls = sys_d.calls();
        assert!(calls.contains(&"acl /run/user/1971/rampart 1000009 ---".to_string()));
        assert!(calls.contains(&"acl /run/user/1971/wayland-0 1000009 ---".to_string()));
        assert!(corrupt.exists());
        Ok(())
    }

    #[test]
    fn test_monitor_shim_exit_code() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        let mut d = recorder();
        d.shim_exit = 5;
        assert_eq!(
            launch(Arc::new(d), Arc::new(SysRecorder::default()), &launch_config(), &store)?,
            5
        );
        Ok(())
    }

    #[test]
    fn test_monitor_start_failure() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        let mut d = recorder();
        d.shim_fails = true;
        let sys_d = Arc::new(SysRecorder::default());
        assert_eq!(
            launch(Arc::new(d), sys_d.clone(), &launch_config(), &store)?,
            EXIT_FAILURE
        );
        assert!(sys_d.calls().iter().any(|c| c.starts_with("remove ")));
        assert!(store.all()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_monitor_commit_failure() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        let d = Arc::new(recorder());
        let sys_d = Arc::new(SysRecorder::failing("/run/user/1971/wayland-0"));
        assert_eq!(
            launch(d.clone(), sys_d, &launch_config(), &store)?,
            EXIT_FAILURE
        );
        assert_eq!(d.calls_matching("notify"), 1);
        assert_eq!(d.calls_matching("start_shim"), 0);
        Ok(())
    }

    #[test]
    fn test_monitor_forwards_termination() -> Result<()> {
        let scratch = Scratch::new();
        let store = Store::new(&scratch.0);
        let mut d = recorder();
        d.shim_delay = Some(Duration::from_millis(300));
        let d = Arc::new(d);

        let deliver = d.clone();
        let signaller = std::thread::spawn(move || {
            while !deliver.deliver(Signal::SIGTERM) {
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        assert_eq!(
            launch(d.clone(), Arc::new(SysRecorder::default()), &launch_config(), &store)?,
            0
        );
        let _ = signaller.join();
        assert!(d.calls().contains(&"kill 48879 SIGCONT".to_string()));
        Ok(())
    }
}
