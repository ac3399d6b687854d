//! Per-address heartbeat monitor: a dedicated OS thread that repeatedly probes one server and
//! feeds the resulting [`ServerDescription`] back into the topology updater.

use std::{
    sync::{mpsc::Sender, Arc},
    thread,
    time::{Duration, Instant},
};

use super::description::server::ServerDescription;
use crate::{
    cmap,
    options::{ClientOptions, ServerAddress},
};

/// One probe's outcome, sent to the topology updater's channel.
pub(crate) struct MonitorUpdate {
    pub(crate) address: ServerAddress,
    pub(crate) description: ServerDescription,
}

/// A handle used to request an immediate, out-of-turn probe (e.g. after a `NotMasterError`
/// sets the topology stale) without waiting for the next heartbeat tick.
#[derive(Clone)]
pub(crate) struct MonitorHandle {
    wake: Arc<std::sync::Condvar>,
    mutex: Arc<std::sync::Mutex<bool>>,
}

impl MonitorHandle {
    pub(crate) fn request_immediate_scan(&self) {
        let mut requested = self.mutex.lock().expect("monitor wake lock poisoned");
        *requested = true;
        self.wake.notify_one();
    }
}

/// Spawns the background thread that probes `address` on a loop until `options` is dropped
/// (signaled by the channel's receiver disconnecting, at which point `send` fails and the loop
/// exits).
pub(crate) fn spawn(
    address: ServerAddress,
    options: Arc<ClientOptions>,
    updates: Sender<MonitorUpdate>,
) -> MonitorHandle {
    let wake = Arc::new(std::sync::Condvar::new());
    let mutex = Arc::new(std::sync::Mutex::new(false));
    let handle = MonitorHandle {
        wake: wake.clone(),
        mutex: mutex.clone(),
    };

    thread::Builder::new()
        .name(format!("docking-monitor-{}", address))
        .spawn(move || run_loop(address, options, updates, wake, mutex))
        .expect("failed to spawn monitor thread");

    handle
}

fn run_loop(
    address: ServerAddress,
    options: Arc<ClientOptions>,
    updates: Sender<MonitorUpdate>,
    wake: Arc<std::sync::Condvar>,
    mutex: Arc<std::sync::Mutex<bool>>,
) {
    let heartbeat_frequency = options
        .heartbeat_freq
        .unwrap_or(Duration::from_secs(10));
    let mut cooldown_until: Option<Instant> = None;

    loop {
        if let Some(until) = cooldown_until {
            if Instant::now() < until {
                wait(&wake, &mutex, until - Instant::now());
                continue;
            }
        }

        let description = probe(&address, &options);
        let failed = description.error.is_some();

        if updates
            .send(MonitorUpdate {
                address: address.clone(),
                description,
            })
            .is_err()
        {
            // The updater (and thus the Topology) has been dropped; shut this thread down.
            return;
        }

        cooldown_until = if failed {
            Some(Instant::now() + super::COOLDOWN_DURATION)
        } else {
            None
        };

        wait(&wake, &mutex, heartbeat_frequency);
    }
}

/// Sleeps until either `timeout` elapses or an immediate-scan request arrives via the condvar.
fn wait(wake: &std::sync::Condvar, mutex: &std::sync::Mutex<bool>, timeout: Duration) {
    let guard = mutex.lock().expect("monitor wake lock poisoned");
    let (mut guard, _timed_out) = wake
        .wait_timeout_while(guard, timeout, |requested| !*requested)
        .expect("monitor wake lock poisoned");
    *guard = false;
}

/// Sends one `hello` handshake over a fresh connection and measures its round-trip time. A
/// failed probe always yields an `Unknown` descriptor carrying the error string; per §4.3, if
/// the previous type was a known replica-set type and the failure was network-level, one
/// immediate re-probe is attempted (bounded: the reset-to-Unknown happens first, so this never
/// recurses further).
fn probe(address: &ServerAddress, options: &ClientOptions) -> ServerDescription {
    match probe_once(address, options) {
        Ok(desc) => desc,
        Err(err) if err.is_network_error() => {
            // One bounded retry: a server that was reachable a moment ago may have just dropped
            // a long-idle connection.
            match probe_once(address, options) {
                Ok(desc) => desc,
                Err(err) => ServerDescription::from_error(address.clone(), &err),
            }
        }
        Err(err) => ServerDescription::from_error(address.clone(), &err),
    }
}

fn probe_once(
    address: &ServerAddress,
    options: &ClientOptions,
) -> crate::error::Result<ServerDescription> {
    let probe_options = {
        let mut o = options.clone();
        o.socket_timeout = o.connect_timeout;
        o
    };
    let start = Instant::now();
    let (_conn, reply) = cmap::establish(address, &probe_options)?;
    let rtt = start.elapsed();
    Ok(ServerDescription::from_hello_reply(address.clone(), reply, rtt))
}
