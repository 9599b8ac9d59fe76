use super::{Broker, ProxyBus, SysDispatcher};
use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

pub const SESSION_BUS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";
pub const SYSTEM_BUS_ENV: &str = "DBUS_SYSTEM_BUS_ADDRESS";
pub const SYSTEM_BUS_FALLBACK: &str =
    "unix:path=/var/run/dbus/system_bus_socket";

pub fn session_bus_fallback(uid: u32) -> String {
    format!("unix:path=/run/user/{}/bus", uid)
}

/** One `method:key=value,...` entry of a bus address. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    pub method: String,
    pub values: Vec<(String, String)>,
}

impl AddressEntry {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub fn parse_address(address: &str) -> Result<Vec<AddressEntry>> {
    let mut entries = Vec::new();
    for entry in address.split(';').filter(|s| !s.is_empty()) {
        let (method, rest) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("bus address {:?} has no method", entry))?;
        let mut values = Vec::new();
        for pair in rest.split(',').filter(|s| !s.is_empty()) {
            let (k, v) = pair.split_once('=').ok_or_else(|| {
                anyhow!("bus address {:?} has a key without value", entry)
            })?;
            values.push((k.to_string(), v.to_string()));
        }
        entries.push(AddressEntry {
            method: method.to_string(),
            values,
        });
    }
    Ok(entries)
}

/// Every absolute `unix:path=` socket named by `address`.
pub fn unix_paths(address: &str) -> Result<Vec<PathBuf>> {
    Ok(parse_address(address)?
        .iter()
        .filter(|e| e.method == "unix")
        .filter_map(|e| e.get("path"))
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .collect())
}

/* Runs one filtering proxy for the session bus and optionally the system
 * bus. Arguments are built and checked when the op is tracked.
 */
pub struct DBusOp {
    pub args: Vec<String>,
    pub sockets: Vec<PathBuf>,
    broker: Option<Box<dyn Broker>>,
}

impl DBusOp {
    pub(super) fn new(
        session: ProxyBus<'_>,
        system: Option<ProxyBus<'_>>,
    ) -> Result<Self> {
        let mut args = Vec::new();
        let mut sockets = Vec::new();
        for (segment, bus) in
            std::iter::once(("session", &session)).chain(system.iter().map(|b| ("system", b)))
        {
            if let Some(name) = bus.config.check_interfaces() {
                return Err(anyhow!(
                    "bad interface string {:?} in {} bus configuration",
                    name,
                    segment
                ));
            }
            let path = bus.path.to_str().ok_or_else(|| {
                anyhow!("{} bus socket path is not valid UTF-8", segment)
            })?;
            args.extend(bus.config.args(&bus.upstream, path));
            sockets.push(bus.path.clone());
        }

        if args.iter().any(|a| a.contains('\0')) {
            return Err(anyhow!(
                "message bus proxy configuration contains NUL byte"
            ));
        }

        Ok(Self {
            args,
            sockets,
            broker: None,
        })
    }

    pub(super) fn apply(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        if self.broker.is_some() {
            return Err(anyhow!("attempted to start multiple message bus proxies"));
        }
        self.broker = Some(
            d.dbus_proxy_start(&self.args)
                .context("cannot start message bus proxy")?,
        );
        Ok(())
    }

    pub(super) fn revert(&mut self, d: &dyn SysDispatcher) -> Result<()> {
        let mut errors = Vec::new();
        if let Some(mut broker) = self.broker.take() {
            debug!("Terminating message bus proxy");
            if let Err(e) = broker.close() {
                errors.push(format!("message bus proxy: {:#}", e));
            }
        }
        for socket in &self.sockets {
            match d.remove(socket) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => errors.push(format!(
                    "cannot remove {}: {}",
                    socket.display(),
                    e
                )),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(errors.join(", ")))
        }
    }
}

impl fmt::Display for DBusOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sockets: Vec<String> =
            self.sockets.iter().map(|s| s.display().to_string()).collect();
        write!(f, "message bus proxy on {}", sockets.join(", "))
    }
}

/** A running xdg-dbus-proxy. It exits once its sync pipe closes. */
pub struct ProxyBroker {
    child: Child,
    sync: Option<File>,
}

impl ProxyBroker {
    pub fn start(program: &Path, args: &[String]) -> Result<Self> {
        let (read, write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
            .context("Creating proxy sync pipe")?;
        let fd = write.as_raw_fd();

        let mut command = Command::new(program);
        command
            .arg(format!("--fd={}", fd))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        unsafe {
            command.pre_exec(move || {
                if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Spawning {}", program.display()))?;
        drop(write);

        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    warn!("(dbus) {}", line);
                }
            });
        }

        let mut sync = File::from(read);
        let mut ready = [0u8; 1];
        match sync.read(&mut ready) {
            Ok(1) if ready[0] == b'x' => (),
            Ok(_) | Err(_) => {
                let _ = child.kill();
                let status = child.wait();
                return Err(anyhow!(
                    "message bus proxy did not become ready: {:?}",
                    status.map(|s| s.to_string()).unwrap_or_default()
                ));
            }
        }
        debug!("Message bus proxy started as {}", child.id());

        Ok(Self {
            child,
            sync: Some(sync),
        })
    }
}

impl Broker for ProxyBroker {
    fn close(&mut self) -> Result<()> {
        drop(self.sync.take());
        let status = self.child.wait().context("Waiting for message bus proxy")?;
        if !status.success() {
            return Err(anyhow!("message bus proxy exited with {}", status));
        }
        Ok(())
    }
}
