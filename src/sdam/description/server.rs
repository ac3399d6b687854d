//! The server descriptor: an immutable snapshot of one server as observed by one monitor probe.

use std::time::{Duration, SystemTime};

use crate::{
    error::Error,
    hello::HelloReply,
    options::ServerAddress,
    read_preference::TagSet,
};

/// The classification of a server, inferred from its `hello` reply.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum ServerType {
    /// A server that has never been successfully probed, or whose last probe failed.
    #[default]
    Unknown,
    /// A single, unreplicated `mongod`.
    Standalone,
    /// A `mongos` router in front of a sharded cluster.
    Mongos,
    /// The current primary of a replica set.
    RsPrimary,
    /// A readable secondary of a replica set.
    RsSecondary,
    /// A non-data-bearing voting member.
    RsArbiter,
    /// A replica set member that is hidden, starting up, or recovering.
    RsOther,
    /// A member of an unconfigured replica set, or one removed from the config.
    RsGhost,
    /// A newly-discovered address named as another member's `primary`, not yet itself probed.
    /// Behaves like `Unknown` for availability/compatibility purposes; exists only so scan
    /// ordering (§4.3: "else any PossiblePrimary") can prioritize probing it.
    PossiblePrimary,
}

impl ServerType {
    /// The label used in [`crate::client::TopologyStatus`] and log output.
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ServerType::Unknown => "Unknown",
            ServerType::Standalone => "Standalone",
            ServerType::Mongos => "Mongos",
            ServerType::RsPrimary => "RSPrimary",
            ServerType::RsSecondary => "RSSecondary",
            ServerType::RsArbiter => "RSArbiter",
            ServerType::RsOther => "RSOther",
            ServerType::RsGhost => "RSGhost",
            ServerType::PossiblePrimary => "PossiblePrimary",
        }
    }

    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone | ServerType::Mongos | ServerType::RsPrimary | ServerType::RsSecondary
        )
    }

    /// Whether this type still counts as "never successfully probed" for availability purposes.
    /// `PossiblePrimary` is exactly `Unknown` plus a scan-priority hint, so it's available
    /// nowhere `Unknown` wouldn't be.
    pub(crate) fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown | ServerType::PossiblePrimary)
    }

    pub(crate) fn is_replica_set_member(self) -> bool {
        matches!(
            self,
            ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::RsArbiter
                | ServerType::RsOther
                | ServerType::RsGhost
        )
    }

    /// Classifies a server from its handshake reply, per the SDAM rules: `isreplicaset`/ghost
    /// states are inferred from the absence of both `setName` and `msg: "isdbgrid"`, arbiters
    /// from `arbiterOnly`, and primaries/secondaries from the boolean hello fields.
    pub(crate) fn from_hello_reply(reply: &HelloReply) -> Self {
        if reply.msg.as_deref() == Some("isdbgrid") {
            return ServerType::Mongos;
        }
        if let Some(set_name) = &reply.set_name {
            if set_name.is_empty() {
                return ServerType::RsGhost;
            }
            if reply.is_primary() {
                return ServerType::RsPrimary;
            }
            if reply.secondary {
                return ServerType::RsSecondary;
            }
            if reply.arbiter_only {
                return ServerType::RsArbiter;
            }
            return ServerType::RsOther;
        }
        if reply.is_primary() {
            return ServerType::Standalone;
        }
        if reply.hosts.is_empty() && reply.passives.is_empty() && reply.arbiters.is_empty() {
            ServerType::Standalone
        } else {
            ServerType::RsGhost
        }
    }
}

/// An immutable snapshot of one server, rebuilt from scratch on every monitor probe. Per the
/// data-model invariant, a descriptor of type `Unknown` never carries an RTT or wire-version
/// window.
#[derive(Clone, Debug)]
pub(crate) struct ServerDescription {
    pub(crate) address: ServerAddress,
    pub(crate) server_type: ServerType,
    pub(crate) last_update_time: SystemTime,
    pub(crate) round_trip_time: Option<Duration>,
    pub(crate) set_name: Option<String>,
    pub(crate) hosts: Vec<ServerAddress>,
    pub(crate) passives: Vec<ServerAddress>,
    pub(crate) arbiters: Vec<ServerAddress>,
    pub(crate) primary: Option<ServerAddress>,
    pub(crate) me: Option<ServerAddress>,
    pub(crate) min_wire_version: i32,
    pub(crate) max_wire_version: i32,
    pub(crate) max_bson_object_size: i32,
    pub(crate) max_write_batch_size: i32,
    pub(crate) max_message_size_bytes: i32,
    pub(crate) election_id: Option<bson::oid::ObjectId>,
    pub(crate) set_version: Option<i32>,
    pub(crate) logical_session_timeout_minutes: Option<i64>,
    pub(crate) tags: TagSet,
    pub(crate) last_write_date: Option<SystemTime>,
    pub(crate) compressors: Vec<String>,
    /// Set when the last probe of this address failed; implies `server_type == Unknown`.
    pub(crate) error: Option<String>,
}

impl ServerDescription {
    /// The initial, never-probed descriptor for a newly-discovered address.
    pub(crate) fn unknown(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            last_update_time: SystemTime::now(),
            round_trip_time: None,
            set_name: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            primary: None,
            me: None,
            min_wire_version: 0,
            max_wire_version: 0,
            max_bson_object_size: 16 * 1024 * 1024,
            max_write_batch_size: 100_000,
            max_message_size_bytes: 48 * 1024 * 1024,
            election_id: None,
            set_version: None,
            logical_session_timeout_minutes: None,
            tags: TagSet::new(),
            last_write_date: None,
            compressors: Vec::new(),
            error: None,
        }
    }

    /// The descriptor produced by a failed probe: always `Unknown`, carrying the error string.
    pub(crate) fn from_error(address: ServerAddress, error: &Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::unknown(address)
        }
    }

    /// Builds a descriptor from a successful `hello` reply and the measured round-trip time.
    pub(crate) fn from_hello_reply(
        address: ServerAddress,
        reply: HelloReply,
        round_trip_time: Duration,
    ) -> Self {
        let server_type = ServerType::from_hello_reply(&reply);
        // Sourced from the server's own `lastWrite.lastWriteDate`, not `$clusterTime` (a
        // cluster-wide gossiped logical clock every member converges on, not a per-server
        // write-lag signal the §4.4/§8 staleness formula needs).
        let last_write_date = reply
            .last_write
            .as_ref()
            .map(|lw| lw.last_write_date.to_system_time());

        Self {
            address,
            server_type,
            last_update_time: SystemTime::now(),
            round_trip_time: Some(round_trip_time),
            set_name: reply.set_name,
            hosts: parse_addresses(&reply.hosts),
            passives: parse_addresses(&reply.passives),
            arbiters: parse_addresses(&reply.arbiters),
            primary: reply.primary.and_then(|p| p.parse().ok()),
            me: reply.me.and_then(|p| p.parse().ok()),
            min_wire_version: reply.min_wire_version,
            max_wire_version: reply.max_wire_version,
            max_bson_object_size: 16 * 1024 * 1024,
            max_write_batch_size: 100_000,
            max_message_size_bytes: 48 * 1024 * 1024,
            election_id: reply.election_id,
            set_version: reply.set_version,
            logical_session_timeout_minutes: reply.logical_session_timeout_minutes,
            tags: reply.tags,
            last_write_date,
            compressors: reply.compression,
            error: None,
        }
    }

    pub(crate) fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    /// All addresses this server's reply advertises as replica-set members: `hosts` ∪
    /// `passives` ∪ `arbiters`.
    pub(crate) fn all_advertised_members(&self) -> impl Iterator<Item = &ServerAddress> {
        self.hosts
            .iter()
            .chain(self.passives.iter())
            .chain(self.arbiters.iter())
    }
}

fn parse_addresses(raw: &[String]) -> Vec<ServerAddress> {
    raw.iter()
        .filter_map(|s| s.parse::<ServerAddress>().ok())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn reply(set_name: Option<&str>, is_primary: bool, secondary: bool) -> HelloReply {
        HelloReply {
            is_writable_primary: is_primary,
            secondary,
            set_name: set_name.map(str::to_string),
            min_wire_version: 0,
            max_wire_version: 21,
            ..Default::default()
        }
    }

    #[test]
    fn classifies_standalone() {
        let r = reply(None, true, false);
        assert_eq!(ServerType::from_hello_reply(&r), ServerType::Standalone);
    }

    #[test]
    fn classifies_rs_primary() {
        let r = reply(Some("rs0"), true, false);
        assert_eq!(ServerType::from_hello_reply(&r), ServerType::RsPrimary);
    }

    #[test]
    fn classifies_rs_secondary() {
        let r = reply(Some("rs0"), false, true);
        assert_eq!(ServerType::from_hello_reply(&r), ServerType::RsSecondary);
    }

    #[test]
    fn classifies_mongos() {
        let mut r = reply(None, false, false);
        r.msg = Some("isdbgrid".to_string());
        assert_eq!(ServerType::from_hello_reply(&r), ServerType::Mongos);
    }
}
