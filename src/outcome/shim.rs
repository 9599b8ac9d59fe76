//! Second phase of an outcome, run inside the shim.
//!
//! The monitor starts the shim through the setuid helper and writes a
//! payload to the descriptor named by `RAMPART_SHIM`. From there the shim
//! builds the container params, supervises the container and exits with
//! the program's status.

use super::signal::{RELAY_BAD_INFO, RELAY_FOREIGN, RELAY_ORPHAN, RELAY_REQUEST};
use super::{
    EXIT_BAD_WAIT, EXIT_CANCEL, EXIT_FAILURE, EXIT_ORPHAN, EXIT_REQUEST,
    OutcomeState, PAYLOAD_VERSION, ParamsState, Payload,
};
use crate::container::{
    Canceller, Container, ContainerExit, Params, SeccompFlags,
};
use crate::dispatcher::{Dispatcher, SHIM_ENV};
use anyhow::{Context, Result, anyhow};
use log::{LevelFilter, debug, error, trace};
use nix::sys::signal::Signal;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Cancel handle of the running container, null until it has started.
type CancelSlot = Arc<AtomicPtr<Canceller>>;

fn registered(slot: &AtomicPtr<Canceller>) -> Option<&Canceller> {
    // written once from a leaked box and never freed
    unsafe { slot.load(Ordering::Acquire).as_ref() }
}

/** Receives the payload and runs every op's second phase.
 *
 * Returns the decoded state, the container params and the SIGCONT relay
 * pipe.
 */
pub fn prepare(
    d: &dyn Dispatcher,
) -> Result<(OutcomeState, Params, Box<dyn Read + Send>)> {
    d.set_dumpable(false)?;

    let setup = d.receive(SHIM_ENV)?;
    let payload: Payload =
        serde_json::from_reader(setup).context("Decoding setup payload")?;
    if payload.version != PAYLOAD_VERSION {
        return Err(anyhow!(
            "unsupported setup payload version {}",
            payload.version
        ));
    }
    let state = payload.state;
    if state.shim.verbose {
        crate::logger::set_level(LevelFilter::Debug);
    }
    trace!("Received setup payload for instance {}", state.id);

    let relay = d.sigcont_relay(state.shim.monitor_pid)?;
    d.set_pdeathsig(Signal::SIGCONT)?;

    let mut z = ParamsState::new(&state);
    for op in &state.shim.ops {
        op.to_container(&mut z)
            .with_context(|| format!("Applying {} op", op.name()))?;
    }
    let params = z.params;
    Ok((state, params, relay))
}

/** Consumes the SIGCONT relay pipe.
 *
 * Returns the exit code once one is decided, or `None` when the pipe
 * closes.
 */
pub fn relay(
    mut pipe: impl Read,
    slot: &AtomicPtr<Canceller>,
    forward_cancel: bool,
) -> Result<Option<i32>> {
    let mut buf = [0u8; 1];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => (),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Reading SIGCONT relay"),
        }

        match buf[0] {
            RELAY_REQUEST => match registered(slot) {
                Some(canceller) if forward_cancel => {
                    debug!("Forwarding exit request to container");
                    canceller.cancel();
                }
                _ => return Ok(Some(EXIT_REQUEST)),
            },
            RELAY_ORPHAN => return Ok(Some(EXIT_ORPHAN)),
            RELAY_BAD_INFO => debug!("Ignoring SIGCONT with invalid siginfo"),
            RELAY_FOREIGN => debug!("Ignoring SIGCONT from foreign process"),
            b => return Err(anyhow!("invalid SIGCONT relay byte {}", b)),
        }
    }
}

fn watch_signals(d: &Arc<dyn Dispatcher>, slot: CancelSlot) -> Result<()> {
    let rx = d.notify(&[Signal::SIGINT, Signal::SIGTERM])?;
    std::thread::spawn(move || {
        for signal in rx {
            match registered(&slot) {
                Some(canceller) => {
                    debug!("Cancelling container on {}", signal);
                    canceller.cancel();
                }
                None => debug!("Ignoring {} before container start", signal),
            }
        }
    });
    Ok(())
}

fn exit_code(result: Result<ContainerExit>) -> i32 {
    match result {
        Ok(ContainerExit::Exited(code)) => code,
        Ok(ContainerExit::Signaled(signal)) => 128 + signal,
        Ok(ContainerExit::Cancelled) => EXIT_CANCEL,
        Err(e) => {
            error!("{:#}", e);
            EXIT_BAD_WAIT
        }
    }
}

/** Shim entry point. Returns the code the shim exits with. */
pub fn run(d: Arc<dyn Dispatcher>) -> i32 {
    let (state, params, pipe) = match prepare(&*d) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_FAILURE;
        }
    };

    let slot: CancelSlot = Arc::new(AtomicPtr::new(std::ptr::null_mut()));
    // signal mask is inherited by threads spawned after this
    if let Err(e) = watch_signals(&d, slot.clone()) {
        error!("{:#}", e);
        return EXIT_FAILURE;
    }

    let forward_cancel = params.forward_cancel;
    {
        let d = d.clone();
        let slot = slot.clone();
        std::thread::spawn(move || match relay(pipe, &slot, forward_cancel) {
            Ok(Some(code)) => d.exit(code),
            Ok(None) => trace!("SIGCONT relay closed"),
            Err(e) => {
                error!("{:#}", e);
                d.exit(EXIT_FAILURE)
            }
        });
    }

    // the shim's own filter always tolerates foreign-arch syscalls
    let seccomp_flags = params.seccomp_flags | SeccompFlags::ALLOW_MULTIARCH;
    let mut z = Container::new(state.shim.init.clone(), params, state.wait_delay());
    if let Err(e) = d.container_start(&mut z) {
        error!("{:#}", e);
        return EXIT_FAILURE;
    }
    if let Some(canceller) = z.canceller() {
        slot.store(Box::into_raw(Box::new(canceller)), Ordering::Release);
    }

    if let Err(e) = d.container_serve(&mut z) {
        error!("{:#}", e);
        return EXIT_FAILURE;
    }
    if let Err(e) = d.seccomp_load(seccomp_flags) {
        error!("{:#}", e);
        return EXIT_FAILURE;
    }

    exit_code(d.container_wait(&mut z))
}
