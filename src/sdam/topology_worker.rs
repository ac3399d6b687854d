//! The concurrency glue tying per-address [`monitor`](super::monitor) threads to a single
//! [`Topology`] snapshot: an updater thread owns the only mutable reference to the topology and
//! folds every monitor probe (and every operation-error-induced "mark unknown") through it one
//! at a time, publishing the result behind an `RwLock` for lock-free-ish concurrent reads.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

use super::{
    description::{
        server::ServerDescription,
        topology::Topology,
    },
    monitor::{self, MonitorHandle, MonitorUpdate},
    server_selection::{self, OperationIntent},
};
use crate::{
    error::{Error, Result},
    options::{ClientOptions, ServerAddress},
    read_preference::SelectionCriteria,
};

/// The EWMA smoothing factor applied to each fresh RTT sample, per the glossary's "EWMA RTT"
/// definition (default alpha 0.2: `new = alpha * sample + (1 - alpha) * old`).
const EWMA_ALPHA: f64 = 0.2;

/// The minimum gap enforced between two topology scans, even when selection is looping quickly
/// waiting for a suitable server to appear.
const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// An externally-triggered event fed into the updater's single critical section alongside
/// monitor probes: either a full descriptor replacement, or a request to mark one address
/// `Unknown` following an operation-dispatch error classification (§4.5).
enum UpdateEvent {
    Probe(MonitorUpdate),
    MarkUnknown { address: ServerAddress, error: String },
    MarkAllUnknown { error: String },
}

/// A cheap-to-clone, thread-shared view into the topology engine. Cloning shares the same
/// underlying state; this is the object the [`Client`](crate::client::Client) facade and
/// [`crate::operation`] dispatch hold on to.
#[derive(Clone)]
pub(crate) struct TopologyHandle {
    options: Arc<ClientOptions>,
    state: Arc<RwLock<Topology>>,
    ewma: Arc<RwLock<HashMap<ServerAddress, Duration>>>,
    monitors: Arc<Mutex<HashMap<ServerAddress, MonitorHandle>>>,
    events: Sender<UpdateEvent>,
    stale: Arc<AtomicBool>,
    last_scan_time: Arc<RwLock<Option<Instant>>>,
}

impl TopologyHandle {
    /// Builds the initial topology from the seed list and spawns one monitor thread per seed
    /// plus the updater thread that owns all subsequent mutation.
    pub(crate) fn start(options: ClientOptions) -> Self {
        let direct = matches!(options.direct_connection, Some(true));
        let topology = Topology::new(&options.hosts, options.repl_set_name.clone(), direct);
        let options = Arc::new(options);

        let (tx, rx) = mpsc::channel::<UpdateEvent>();
        let state = Arc::new(RwLock::new(topology));
        let ewma = Arc::new(RwLock::new(HashMap::new()));
        let monitors = Arc::new(Mutex::new(HashMap::new()));

        let handle = Self {
            options: options.clone(),
            state: state.clone(),
            ewma: ewma.clone(),
            monitors: monitors.clone(),
            events: tx.clone(),
            stale: Arc::new(AtomicBool::new(false)),
            last_scan_time: Arc::new(RwLock::new(None)),
        };

        for address in handle.state.read().expect("topology lock poisoned").addresses() {
            handle.spawn_monitor(address.clone(), tx.clone());
        }

        std::thread::Builder::new()
            .name("docking-topology-updater".to_string())
            .spawn(move || run_updater(rx, state, ewma, monitors, options, tx))
            .expect("failed to spawn topology updater thread");

        handle
    }

    fn spawn_monitor(&self, address: ServerAddress, events: Sender<UpdateEvent>) {
        let (probe_tx, probe_rx) = mpsc::channel::<MonitorUpdate>();
        let forward_events = events;
        std::thread::spawn(move || {
            while let Ok(update) = probe_rx.recv() {
                if forward_events.send(UpdateEvent::Probe(update)).is_err() {
                    return;
                }
            }
        });
        let monitor_handle = monitor::spawn(address.clone(), self.options.clone(), probe_tx);
        self.monitors
            .lock()
            .expect("monitor map lock poisoned")
            .insert(address, monitor_handle);
    }

    pub(crate) fn snapshot(&self) -> Topology {
        self.state.read().expect("topology lock poisoned").clone()
    }

    /// Marks the topology stale so the next selection attempt forces a rescan, per the
    /// `NotMasterError` classification rule (§4.5).
    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Feeds an operation-error-induced "mark this address Unknown" event through the same
    /// single critical section monitor probes go through.
    pub(crate) fn mark_unknown(&self, address: ServerAddress, error: impl Into<String>) {
        let _ = self.events.send(UpdateEvent::MarkUnknown {
            address,
            error: error.into(),
        });
        self.mark_stale();
    }

    /// Resets every currently-known address to `Unknown`, per §4.5's "`AuthError` during
    /// initialization → reset every server to Unknown and raise; no retry" rule. Unlike
    /// [`TopologyHandle::mark_unknown`] this doesn't imply a single bad server — an auth failure
    /// means the whole deployment's credentials may be in question, so every descriptor is
    /// discarded and a fresh scan is forced.
    pub(crate) fn mark_all_unknown(&self, error: impl Into<String>) {
        let _ = self.events.send(UpdateEvent::MarkAllUnknown {
            error: error.into(),
        });
        self.mark_stale();
    }

    /// Runs the §4.4 selection algorithm: rescans if stale/overdue, checks wire-version
    /// compatibility, then loops attempting selection until a server is found or the budget
    /// (`server_selection_timeout`, or a single attempt if `server_selection_try_once`) elapses.
    pub(crate) fn select(&self, intent: OperationIntent<'_>) -> Result<ServerAddress> {
        let timeout = self
            .options
            .server_selection_timeout
            .unwrap_or(Duration::from_secs(30));
        let try_once = self.options.server_selection_try_once.unwrap_or(false);
        let local_threshold = self.options.local_threshold.unwrap_or(Duration::from_millis(15));
        let heartbeat_frequency = self.options.heartbeat_freq.unwrap_or(Duration::from_secs(10));

        let deadline = Instant::now() + timeout;

        loop {
            self.rescan_if_due();

            let snapshot = self.snapshot();
            if !snapshot.compatible {
                return Err(Error::incompatible_server(
                    snapshot
                        .incompatibility_error
                        .unwrap_or_else(|| "incompatible server wire version".to_string()),
                ));
            }

            let ewma = self.ewma.read().expect("ewma lock poisoned").clone();
            let chosen =
                server_selection::select_one(&snapshot, &intent, &ewma, local_threshold, heartbeat_frequency)?;

            if let Some(chosen) = chosen {
                self.maybe_cache_primary(&snapshot, chosen);
                return Ok(chosen.address.clone());
            }

            if try_once {
                return Err(Error::server_selection(
                    "no suitable server found and serverSelectionTryOnce is set",
                ));
            }
            if Instant::now() >= deadline {
                return Err(Error::server_selection(format!(
                    "no server found matching selection criteria within {:?}",
                    timeout
                )));
            }

            let gap = self.time_since_last_scan();
            if gap < MIN_HEARTBEAT_FREQUENCY {
                std::thread::sleep(MIN_HEARTBEAT_FREQUENCY - gap);
            }
            self.mark_stale();
        }
    }

    fn maybe_cache_primary(&self, _snapshot: &Topology, _chosen: &ServerDescription) {
        // current_primary caching is maintained by the updater thread directly on the
        // Topology (see `Topology::update_current_primary`), which already implements the
        // post-selection side effect described in §4.4: the updater recomputes it from the
        // latest descriptor set on every fold, so there's nothing additional to do here for a
        // read-only snapshot.
    }

    fn time_since_last_scan(&self) -> Duration {
        self.last_scan_time
            .read()
            .expect("scan time lock poisoned")
            .map(|t| t.elapsed())
            .unwrap_or(MIN_HEARTBEAT_FREQUENCY)
    }

    fn rescan_if_due(&self) {
        let due = self.stale.load(Ordering::SeqCst)
            || self
                .last_scan_time
                .read()
                .expect("scan time lock poisoned")
                .map(|t| t.elapsed() >= self.options.heartbeat_freq.unwrap_or(Duration::from_secs(10)))
                .unwrap_or(true);
        if !due {
            return;
        }
        self.request_immediate_scan();
        *self.last_scan_time.write().expect("scan time lock poisoned") = Some(Instant::now());
        self.stale.store(false, Ordering::SeqCst);
    }

    fn request_immediate_scan(&self) {
        for handle in self.monitors.lock().expect("monitor map lock poisoned").values() {
            handle.request_immediate_scan();
        }
    }

    /// Resolves a read preference's `SelectionCriteria` default into a concrete selection.
    pub(crate) fn select_for_read(&self, criteria: &SelectionCriteria) -> Result<ServerAddress> {
        self.select(OperationIntent::Read(criteria))
    }

    pub(crate) fn select_for_write(&self) -> Result<ServerAddress> {
        self.select(OperationIntent::Write)
    }
}

/// The single critical section: owns `state` exclusively, applying every probe/error event to
/// it in arrival order, reconciling the monitor set against newly discovered/removed addresses,
/// and updating each address's EWMA RTT.
fn run_updater(
    rx: mpsc::Receiver<UpdateEvent>,
    state: Arc<RwLock<Topology>>,
    ewma: Arc<RwLock<HashMap<ServerAddress, Duration>>>,
    monitors: Arc<Mutex<HashMap<ServerAddress, MonitorHandle>>>,
    options: Arc<ClientOptions>,
    events_tx: Sender<UpdateEvent>,
) {
    while let Ok(event) = rx.recv() {
        if let UpdateEvent::MarkAllUnknown { error } = event {
            let err = Error::network(error);
            let addresses: Vec<ServerAddress> = {
                let guard = state.read().expect("topology lock poisoned");
                guard.addresses().cloned().collect()
            };
            let mut guard = state.write().expect("topology lock poisoned");
            let mut next = guard.clone();
            for address in addresses {
                next = next.apply(&address, ServerDescription::from_error(address.clone(), &err));
            }
            *guard = next;
            continue;
        }

        let (address, description) = match event {
            UpdateEvent::Probe(update) => (update.address, update.description),
            UpdateEvent::MarkUnknown { address, error } => {
                let err = Error::network(error);
                (address.clone(), ServerDescription::from_error(address, &err))
            }
            UpdateEvent::MarkAllUnknown { .. } => unreachable!("handled above"),
        };

        if let Some(rtt) = description.round_trip_time {
            let mut guard = ewma.write().expect("ewma lock poisoned");
            let entry = guard.entry(address.clone()).or_insert(rtt);
            let updated = rtt.mul_f64(EWMA_ALPHA) + (*entry).mul_f64(1.0 - EWMA_ALPHA);
            *entry = updated;
        }

        let before: std::collections::HashSet<ServerAddress> = {
            let guard = state.read().expect("topology lock poisoned");
            guard.addresses().cloned().collect()
        };

        let next = {
            let guard = state.read().expect("topology lock poisoned");
            guard.clone().apply(&address, description)
        };
        let after: std::collections::HashSet<ServerAddress> = next.addresses().cloned().collect();
        *state.write().expect("topology lock poisoned") = next;

        reconcile_monitors(&before, &after, &monitors, &options, &events_tx);
    }
}

/// Spawns monitors for newly-discovered addresses and tears down monitors for addresses the
/// topology removed (e.g. hosts dropped from a primary's member list).
fn reconcile_monitors(
    before: &std::collections::HashSet<ServerAddress>,
    after: &std::collections::HashSet<ServerAddress>,
    monitors: &Arc<Mutex<HashMap<ServerAddress, MonitorHandle>>>,
    options: &Arc<ClientOptions>,
    events_tx: &Sender<UpdateEvent>,
) {
    let mut guard = monitors.lock().expect("monitor map lock poisoned");

    for removed in before.difference(after) {
        guard.remove(removed);
    }

    for added in after.difference(before) {
        let (probe_tx, probe_rx) = mpsc::channel::<MonitorUpdate>();
        let forward_events = events_tx.clone();
        std::thread::spawn(move || {
            while let Ok(update) = probe_rx.recv() {
                if forward_events.send(UpdateEvent::Probe(update)).is_err() {
                    return;
                }
            }
        });
        let handle = monitor::spawn(added.clone(), options.clone(), probe_tx);
        guard.insert(added.clone(), handle);
    }
}
