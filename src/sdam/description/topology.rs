//! The aggregate topology state machine: a set of [`ServerDescription`]s plus the cluster-wide
//! type, and the pure transition function that folds one new descriptor into it.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, SystemTime},
};

use super::server::{ServerDescription, ServerType};
use crate::{
    hello::{MAX_SUPPORTED_WIRE_VERSION, MIN_SUPPORTED_WIRE_VERSION},
    options::ServerAddress,
};

/// The cluster-wide topology type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TopologyType {
    /// No descriptor has been successfully probed yet.
    Unknown,
    /// A directly-addressed server (`directConnection=true`) whose first successful probe has
    /// not yet arrived. One-shot: the first descriptor applied converts this to `Sharded` (the
    /// seed turned out to be a `mongos`) or `Single` (anything else), per §4.3's `Direct` row.
    Direct,
    /// A single, directly-addressed server whose type never causes membership changes.
    Single,
    /// A sharded cluster: every known descriptor is `Mongos` or `Unknown`.
    Sharded,
    /// A replica set with no known primary.
    ReplicaSetNoPrimary,
    /// A replica set with exactly one known primary.
    ReplicaSetWithPrimary,
}

/// The full topology: every known server's descriptor, plus the aggregate state derived from
/// them. Immutable by convention — [`Topology::apply`] takes `self` by value and returns the
/// next state, so the caller (the single-threaded updater in
/// [`crate::sdam::topology_worker`]) can publish a fresh snapshot atomically.
#[derive(Clone, Debug)]
pub(crate) struct Topology {
    pub(crate) topology_type: TopologyType,
    /// Whether this topology was seeded with `directConnection=true`. Sticky across the
    /// `Direct` → `Single`/`Sharded` one-shot conversion so the post-conversion state keeps
    /// `Single`'s absorb-only, never-remove membership behavior even when it landed on
    /// `Sharded` instead.
    pub(crate) direct: bool,
    pub(crate) set_name: Option<String>,
    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,
    pub(crate) max_election_id: Option<bson::oid::ObjectId>,
    pub(crate) max_set_version: Option<i32>,
    pub(crate) compatible: bool,
    pub(crate) incompatibility_error: Option<String>,
    /// Cached per §4.4's post-selection side effect; invalidated whenever the topology changes
    /// in a way that could move the primary.
    pub(crate) current_primary: Option<ServerAddress>,
}

impl TopologyType {
    /// The label used in [`crate::client::TopologyStatus`] and log output.
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TopologyType::Unknown => "Unknown",
            TopologyType::Direct => "Direct",
            TopologyType::Single => "Single",
            TopologyType::Sharded => "Sharded",
            TopologyType::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            TopologyType::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
        }
    }
}

impl Topology {
    /// The initial topology for a freshly-parsed seed list: every address `Unknown`, topology
    /// type `Unknown` (or `Direct` if `direct_connection` was requested and there is exactly
    /// one seed; see [`TopologyType::Direct`] for the one-shot conversion this sets up).
    pub(crate) fn new(hosts: &[ServerAddress], set_name: Option<String>, direct: bool) -> Self {
        let topology_type = if direct {
            TopologyType::Direct
        } else if set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };
        let servers = hosts
            .iter()
            .map(|addr| (addr.clone(), ServerDescription::unknown(addr.clone())))
            .collect();
        Self {
            topology_type,
            direct,
            set_name,
            servers,
            max_election_id: None,
            max_set_version: None,
            compatible: true,
            incompatibility_error: None,
            current_primary: None,
        }
    }

    pub(crate) fn addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub(crate) fn get(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// Folds a newly-probed `ServerDescription` into the topology, per the §4.3 transition
    /// table. Addresses the new descriptor's reply lists that aren't yet tracked are added as
    /// `Unknown`; addresses no longer listed by an adopted primary are removed. No-ops if
    /// `address` was removed from the topology by an earlier update in the same scan (a late
    /// probe reply racing the removal).
    pub(crate) fn apply(mut self, address: &ServerAddress, new: ServerDescription) -> Self {
        if !self.servers.contains_key(address) {
            return self;
        }

        if self.topology_type == TopologyType::Direct {
            // One-shot conversion per §4.3's Direct row: the first descriptor this directly-
            // addressed topology sees locks its final type for good. A mongos reply means this
            // seed fronts a sharded cluster; anything else (standalone, replica set member,
            // even an unreachable/unknown probe) locks it to Single.
            self.topology_type = if new.server_type == ServerType::Mongos {
                TopologyType::Sharded
            } else {
                TopologyType::Single
            };
            self.servers.insert(address.clone(), new);
            self.recompute_compatibility();
            self.update_current_primary();
            return self;
        }
        if self.topology_type == TopologyType::Single {
            // A Single topology never changes membership or type; it just absorbs the latest
            // descriptor for its one address.
            self.servers.insert(address.clone(), new);
            self.recompute_compatibility();
            return self;
        }
        if self.direct && self.topology_type == TopologyType::Sharded {
            // A direct connection to a mongos is locked to Sharded the same way Single is
            // locked above: one address, absorb-only, no membership changes.
            self.servers.insert(address.clone(), new);
            self.recompute_compatibility();
            return self;
        }

        match new.server_type {
            // `PossiblePrimary` is never actually reported by a probe (it's a placeholder this
            // topology assigns itself to a not-yet-probed address); included here only so the
            // match is exhaustive, handled the same as a plain `Unknown` probe result.
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {
                self.servers.insert(address.clone(), new);
            }
            ServerType::Standalone => self.apply_standalone(address, new),
            ServerType::Mongos => self.apply_mongos(address, new),
            ServerType::RsPrimary => self.apply_rs_primary(address, new),
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.apply_rs_member(address, new)
            }
        }

        self.update_topology_type();
        self.recompute_compatibility();
        self.update_current_primary();
        self
    }

    fn apply_standalone(&mut self, address: &ServerAddress, new: ServerDescription) {
        match self.topology_type {
            TopologyType::Unknown if self.servers.len() == 1 => {
                self.servers.insert(address.clone(), new);
                self.topology_type = TopologyType::Single;
            }
            _ => {
                // A standalone appearing in a multi-seed or already-typed topology doesn't
                // belong; per the transition table this means "remove".
                self.servers.remove(address);
            }
        }
    }

    fn apply_mongos(&mut self, address: &ServerAddress, new: ServerDescription) {
        match self.topology_type {
            TopologyType::Unknown | TopologyType::Sharded => {
                self.servers.insert(address.clone(), new);
                self.topology_type = TopologyType::Sharded;
            }
            _ => {
                self.servers.remove(address);
            }
        }
    }

    fn apply_rs_primary(&mut self, address: &ServerAddress, new: ServerDescription) {
        if self.set_name.is_none() {
            self.set_name = new.set_name.clone();
        } else if self.set_name != new.set_name {
            // Reports a different replica set than the one this topology belongs to; drop it.
            self.servers.remove(address);
            return;
        }

        if self.is_stale_primary(&new) {
            let mut demoted = new;
            demoted.server_type = ServerType::Unknown;
            demoted.error = Some("stale primary: older (setVersion, electionId)".to_string());
            self.servers.insert(address.clone(), demoted);
            return;
        }

        // Invalidate any existing primary at a different address.
        for (addr, desc) in self.servers.iter_mut() {
            if addr != address && desc.server_type == ServerType::RsPrimary {
                desc.server_type = ServerType::Unknown;
            }
        }

        self.max_election_id = new.election_id.or(self.max_election_id);
        self.max_set_version = new.set_version.or(self.max_set_version);

        let advertised: HashSet<ServerAddress> = new.all_advertised_members().cloned().collect();
        self.insert_discovered_members(&advertised, new.primary.as_ref());
        self.servers
            .retain(|addr, _| addr == address || advertised.contains(addr));

        self.servers.insert(address.clone(), new);
    }

    /// Adds addresses from `advertised` that aren't yet tracked, per §4.3's "discovered addresses
    /// ... are added as Unknown and monitored." An address matching `reported_primary` (a
    /// member's view of the current primary) is seeded as `PossiblePrimary` instead of plain
    /// `Unknown`, per §3's data model and the §8 scenario 2 worked example, so scan ordering can
    /// prioritize probing it.
    fn insert_discovered_members(
        &mut self,
        advertised: &HashSet<ServerAddress>,
        reported_primary: Option<&ServerAddress>,
    ) {
        for member in advertised {
            self.servers.entry(member.clone()).or_insert_with(|| {
                let mut desc = ServerDescription::unknown(member.clone());
                if reported_primary == Some(member) {
                    desc.server_type = ServerType::PossiblePrimary;
                }
                desc
            });
        }
    }

    /// A primary report is stale if its `(set_version, election_id)` pair is older than the
    /// maximum this topology has already observed.
    fn is_stale_primary(&self, new: &ServerDescription) -> bool {
        match (self.max_set_version, self.max_election_id) {
            (Some(max_version), Some(max_election)) => match (new.set_version, new.election_id) {
                (Some(version), Some(election)) => {
                    version < max_version || (version == max_version && election < max_election)
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn apply_rs_member(&mut self, address: &ServerAddress, new: ServerDescription) {
        if self.set_name.is_none() {
            self.set_name = new.set_name.clone();
        } else if self.set_name != new.set_name {
            self.servers.remove(address);
            return;
        }
        if let Some(me) = &new.me {
            if me != address {
                // The server disagrees with the address we dialed; drop the report.
                self.servers.remove(address);
                return;
            }
        }

        // A member's own hosts/passives/arbiters list is also a discovery source (not just the
        // primary's): §4.3's "discovered addresses ... are added as Unknown and monitored" isn't
        // limited to primary reports. Unlike `apply_rs_primary`, membership is never pruned here
        // — "adopt member" does not touch primary-owned removal.
        let advertised: HashSet<ServerAddress> = new.all_advertised_members().cloned().collect();
        self.insert_discovered_members(&advertised, new.primary.as_ref());

        self.servers.insert(address.clone(), new);
    }

    fn update_topology_type(&mut self) {
        if self.topology_type == TopologyType::Single || self.topology_type == TopologyType::Sharded
        {
            return;
        }
        let has_primary = self
            .servers
            .values()
            .any(|s| s.server_type == ServerType::RsPrimary);
        self.topology_type = if has_primary {
            TopologyType::ReplicaSetWithPrimary
        } else if self.servers.values().any(|s| s.server_type.is_replica_set_member()) {
            TopologyType::ReplicaSetNoPrimary
        } else if self.topology_type == TopologyType::ReplicaSetWithPrimary
            || self.topology_type == TopologyType::ReplicaSetNoPrimary
        {
            TopologyType::ReplicaSetNoPrimary
        } else {
            self.topology_type
        };
    }

    fn update_current_primary(&mut self) {
        self.current_primary = match self.topology_type {
            TopologyType::ReplicaSetWithPrimary => self
                .servers
                .iter()
                .find(|(_, s)| s.server_type == ServerType::RsPrimary)
                .map(|(addr, _)| addr.clone()),
            TopologyType::Single if self.servers.len() == 1 => self
                .servers
                .iter()
                .find(|(_, s)| {
                    matches!(
                        s.server_type,
                        ServerType::RsPrimary | ServerType::Standalone | ServerType::Mongos
                    )
                })
                .map(|(addr, _)| addr.clone()),
            _ => None,
        };
    }

    /// Recomputes the driver/server wire-version compatibility flag across every data-bearing
    /// server: each such server's `[minWireVersion, maxWireVersion]` must intersect
    /// `[MIN_SUPPORTED_WIRE_VERSION, MAX_SUPPORTED_WIRE_VERSION]`.
    fn recompute_compatibility(&mut self) {
        for server in self.servers.values() {
            if !server.is_data_bearing() {
                continue;
            }
            if server.min_wire_version > MAX_SUPPORTED_WIRE_VERSION {
                self.compatible = false;
                self.incompatibility_error = Some(format!(
                    "server at {} requires wire version >= {}, but this driver only supports up \
                     to {}; server must be upgraded",
                    server.address, server.min_wire_version, MAX_SUPPORTED_WIRE_VERSION
                ));
                return;
            }
            if server.max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
                self.compatible = false;
                self.incompatibility_error = Some(format!(
                    "server at {} only supports wire versions up to {}, but this driver requires \
                     at least {}; server is too old",
                    server.address, server.max_wire_version, MIN_SUPPORTED_WIRE_VERSION
                ));
                return;
            }
        }
        self.compatible = true;
        self.incompatibility_error = None;
    }

    /// The minimum `heartbeatFrequencyMS`-derived staleness budget the tests/§8 property assume.
    pub(crate) fn min_heartbeat_frequency() -> Duration {
        Duration::from_millis(500)
    }

    pub(crate) fn now() -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hello::HelloReply;

    fn addr(s: &str) -> ServerAddress {
        s.parse().unwrap()
    }

    fn primary_reply(set_name: &str, hosts: Vec<&str>) -> HelloReply {
        HelloReply {
            is_writable_primary: true,
            set_name: Some(set_name.to_string()),
            hosts: hosts.into_iter().map(str::to_string).collect(),
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        }
    }

    fn secondary_reply(set_name: &str, primary: &str, hosts: Vec<&str>) -> HelloReply {
        HelloReply {
            secondary: true,
            set_name: Some(set_name.to_string()),
            primary: Some(primary.to_string()),
            hosts: hosts.into_iter().map(str::to_string).collect(),
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        }
    }

    #[test]
    fn single_seed_secondary_becomes_replica_set_no_primary() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], None, false);
        assert_eq!(topo.topology_type, TopologyType::Unknown);

        let reply = secondary_reply("rs0", "h2:27017", vec!["h1:27017", "h2:27017"]);
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);

        assert_eq!(topo.topology_type, TopologyType::ReplicaSetNoPrimary);
        assert_eq!(topo.set_name.as_deref(), Some("rs0"));
        assert!(topo.servers.contains_key(&addr("h2:27017")));
        // §8 scenario 2: a newly-discovered address named as the reporting member's `primary`
        // is added with the `PossiblePrimary` flag, not plain `Unknown`.
        assert_eq!(
            topo.servers[&addr("h2:27017")].server_type,
            ServerType::PossiblePrimary
        );
    }

    #[test]
    fn adopting_primary_invalidates_old_primary_at_different_address() {
        let h1 = addr("h1:27017");
        let h2 = addr("h2:27017");
        let topo = Topology::new(&[h1.clone(), h2.clone()], Some("rs0".to_string()), false);

        let reply1 = primary_reply("rs0", vec!["h1:27017", "h2:27017"]);
        let desc1 = ServerDescription::from_hello_reply(h1.clone(), reply1, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc1);
        assert_eq!(topo.topology_type, TopologyType::ReplicaSetWithPrimary);
        assert_eq!(topo.current_primary.as_ref(), Some(&h1));

        let reply2 = primary_reply("rs0", vec!["h1:27017", "h2:27017"]);
        let desc2 = ServerDescription::from_hello_reply(h2.clone(), reply2, Duration::from_millis(1));
        let topo = topo.apply(&h2, desc2);

        assert_eq!(topo.current_primary.as_ref(), Some(&h2));
        assert_eq!(topo.servers[&h1].server_type, ServerType::Unknown);
    }

    #[test]
    fn removes_addresses_not_in_new_primarys_host_list() {
        let h1 = addr("h1:27017");
        let h2 = addr("h2:27017");
        let topo = Topology::new(&[h1.clone(), h2.clone()], Some("rs0".to_string()), false);

        let reply = primary_reply("rs0", vec!["h1:27017"]);
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);

        assert!(!topo.servers.contains_key(&h2));
    }

    #[test]
    fn stale_primary_is_demoted_to_unknown() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], Some("rs0".to_string()), false);

        let mut reply = primary_reply("rs0", vec!["h1:27017"]);
        reply.set_version = Some(5);
        reply.election_id = Some(bson::oid::ObjectId::new());
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply.clone(), Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);
        let recorded_election = topo.max_election_id;

        let mut stale_reply = reply.clone();
        stale_reply.set_version = Some(4);
        let stale_desc =
            ServerDescription::from_hello_reply(h1.clone(), stale_reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, stale_desc);

        assert_eq!(topo.servers[&h1].server_type, ServerType::Unknown);
        assert_eq!(topo.max_election_id, recorded_election);
    }

    #[test]
    fn mongos_reports_build_sharded_topology() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], None, false);
        let mut reply = HelloReply {
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        };
        reply.msg = Some("isdbgrid".to_string());
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);
        assert_eq!(topo.topology_type, TopologyType::Sharded);
    }

    #[test]
    fn direct_connection_to_mongos_converts_to_sharded() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], None, true);
        assert_eq!(topo.topology_type, TopologyType::Direct);

        let mut reply = HelloReply {
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        };
        reply.msg = Some("isdbgrid".to_string());
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);

        assert_eq!(topo.topology_type, TopologyType::Sharded);
        assert_eq!(topo.servers[&h1].server_type, ServerType::Mongos);
    }

    #[test]
    fn direct_connection_to_replica_set_member_converts_to_single_and_locks() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], None, true);

        let reply = secondary_reply("rs0", "h2:27017", vec!["h1:27017", "h2:27017"]);
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);

        assert_eq!(topo.topology_type, TopologyType::Single);
        // Unlike a real replica-set discovery, a Direct connection never adopts the other
        // members the secondary reported.
        assert!(!topo.servers.contains_key(&addr("h2:27017")));

        // Once locked, later descriptors for the same address are absorbed without changing
        // type or membership, exactly like a non-direct Single topology.
        let reply2 = HelloReply {
            is_writable_primary: true,
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        };
        let desc2 = ServerDescription::from_hello_reply(h1.clone(), reply2, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc2);
        assert_eq!(topo.topology_type, TopologyType::Single);
        assert_eq!(topo.servers[&h1].server_type, ServerType::Standalone);
    }

    #[test]
    fn direct_connection_to_mongos_stays_locked_to_sharded() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], None, true);
        let mut reply = HelloReply {
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        };
        reply.msg = Some("isdbgrid".to_string());
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);
        assert_eq!(topo.topology_type, TopologyType::Sharded);

        // A later probe of the same seed reporting a different type (e.g. a restart as
        // standalone) still just gets absorbed; a direct-to-mongos topology never discovers
        // other shard routers or reverts type.
        let reply2 = HelloReply {
            is_writable_primary: true,
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        };
        let desc2 = ServerDescription::from_hello_reply(h1.clone(), reply2, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc2);
        assert_eq!(topo.topology_type, TopologyType::Sharded);
        assert_eq!(topo.servers[&h1].server_type, ServerType::Standalone);
    }

    #[test]
    fn incompatible_wire_version_marks_topology_incompatible() {
        let h1 = addr("h1:27017");
        let topo = Topology::new(&[h1.clone()], None, false);
        let reply = HelloReply {
            is_writable_primary: true,
            min_wire_version: MAX_SUPPORTED_WIRE_VERSION + 1,
            max_wire_version: MAX_SUPPORTED_WIRE_VERSION + 5,
            ..Default::default()
        };
        let desc = ServerDescription::from_hello_reply(h1.clone(), reply, Duration::from_millis(1));
        let topo = topo.apply(&h1, desc);
        assert!(!topo.compatible);
        assert!(topo.incompatibility_error.is_some());
    }
}
