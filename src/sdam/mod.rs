//! Server discovery and monitoring: the descriptor/topology state machine ([`description`]), the
//! per-address heartbeat threads ([`monitor`]), the algorithm that narrows a topology snapshot
//! down to one server ([`server_selection`]), and the concurrency glue tying them together into a
//! live, queryable handle ([`topology_worker`]).

use std::time::Duration;

use crate::options::ServerAddress;

pub(crate) mod description;
pub(crate) mod monitor;
pub(crate) mod server_selection;
pub(crate) mod topology_worker;

/// How long an address that just failed a probe is left alone before being re-probed, unless an
/// operation error forces an earlier rescan via [`topology_worker::TopologyHandle::mark_stale`].
pub(crate) const COOLDOWN_DURATION: Duration = Duration::from_secs(5);

pub(crate) use topology_worker::TopologyHandle;

/// A point-in-time view of one server, as last reported by [`Client::topology_status`]
/// (`crate::client::Client::topology_status`).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServerStatus {
    /// The server's address.
    pub address: ServerAddress,
    /// `"Unknown"`, `"Standalone"`, `"Mongos"`, `"RSPrimary"`, `"RSSecondary"`, `"RSArbiter"`,
    /// `"RSOther"`, or `"RSGhost"`.
    pub server_type: &'static str,
    /// The EWMA-smoothed round-trip time of this server's last successful probe.
    pub round_trip_time: Option<Duration>,
    /// The error from the last failed probe, if the server is currently `Unknown` because of
    /// one.
    pub error: Option<String>,
}

/// A point-in-time view of the whole deployment, returned by
/// [`Client::topology_status`](crate::client::Client::topology_status).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TopologyStatus {
    /// `"Unknown"`, `"Single"`, `"Sharded"`, `"ReplicaSetNoPrimary"`, or
    /// `"ReplicaSetWithPrimary"`.
    pub topology_type: &'static str,
    /// The replica set name, if this deployment is a replica set.
    pub replica_set_name: Option<String>,
    /// Every known server, in no particular order.
    pub servers: Vec<ServerStatus>,
}

impl From<description::topology::Topology> for TopologyStatus {
    fn from(topology: description::topology::Topology) -> Self {
        Self {
            topology_type: topology.topology_type.as_str(),
            replica_set_name: topology.set_name.clone(),
            servers: topology
                .servers
                .into_values()
                .map(|s| ServerStatus {
                    address: s.address,
                    server_type: s.server_type.as_str(),
                    round_trip_time: s.round_trip_time,
                    error: s.error,
                })
                .collect(),
        }
    }
}
