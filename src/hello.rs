//! The handshake command (`hello`, with a legacy `isMaster` fallback for servers that predate
//! it) and its reply, which seeds a server's initial [`ServerDescription`](crate::sdam::description::server::ServerDescription).

use serde::{Deserialize, Serialize};

use crate::{compression::Compressor, options::ClientOptions};

/// The minimum wire version this crate negotiates down to. Servers whose `maxWireVersion` falls
/// below this are reported as [`ErrorKind::IncompatibleServer`](crate::error::ErrorKind::IncompatibleServer).
pub const MIN_SUPPORTED_WIRE_VERSION: i32 = 7;
/// The maximum wire version this crate understands.
pub const MAX_SUPPORTED_WIRE_VERSION: i32 = 25;

/// Metadata about the driver and its runtime environment, sent on every handshake so the server
/// can log/attribute the connection.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct ClientMetadata {
    pub(crate) driver: DriverMetadata,
    pub(crate) os: OsMetadata,
    pub(crate) platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) application: Option<ApplicationMetadata>,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct DriverMetadata {
    pub(crate) name: String,
    pub(crate) version: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct OsMetadata {
    #[serde(rename = "type")]
    pub(crate) os_type: String,
    pub(crate) architecture: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct ApplicationMetadata {
    pub(crate) name: String,
}

impl ClientMetadata {
    pub(crate) fn new(app_name: Option<&str>) -> Self {
        Self {
            driver: DriverMetadata {
                name: "docking".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            os: OsMetadata {
                os_type: std::env::consts::OS.to_string(),
                architecture: std::env::consts::ARCH.to_string(),
            },
            platform: format!("rustc (unknown version)"),
            application: app_name.map(|name| ApplicationMetadata {
                name: name.to_string(),
            }),
        }
    }
}

/// Builds the `hello` command document sent to open (or re-establish) a link's handshake.
pub(crate) fn build_hello_command(
    options: &ClientOptions,
    compressors: Option<&[Compressor]>,
) -> bson::Document {
    let mut cmd = bson::doc! {
        "hello": 1,
        "client": bson::to_bson(&ClientMetadata::new(options.app_name.as_deref()))
            .unwrap_or(bson::Bson::Null),
    };
    if let Some(compressors) = compressors {
        let names: Vec<bson::Bson> = compressors
            .iter()
            .map(|c| bson::Bson::String(c.name().to_string()))
            .collect();
        cmd.insert("compression", names);
    }
    if let Some(cred) = &options.credential {
        cred.append_needed_mechanism_negotiation(&mut cmd);
    }
    cmd
}

/// The parsed reply to a `hello`/`isMaster` command, used to build a
/// [`ServerDescription`](crate::sdam::description::server::ServerDescription).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct HelloReply {
    /// Whether this server is the current primary of its replica set.
    #[serde(default)]
    pub is_writable_primary: bool,
    /// Legacy equivalent of `is_writable_primary`, reported by servers older than 4.2.
    #[serde(default, rename = "ismaster")]
    pub is_master: bool,
    /// Whether this node is currently a secondary.
    #[serde(default)]
    pub secondary: bool,
    /// Present (and true) on arbiter nodes.
    #[serde(default)]
    pub arbiter_only: bool,
    /// Present (and true) on hidden nodes.
    #[serde(default)]
    pub hidden: bool,
    /// Present on `mongos` replies.
    #[serde(default)]
    pub msg: Option<String>,
    /// The replica set name, if this node is part of one.
    #[serde(default)]
    pub set_name: Option<String>,
    /// The replica set version, monotonically increasing on reconfiguration.
    #[serde(default)]
    pub set_version: Option<i32>,
    /// The address of the current primary, as reported by this node.
    #[serde(default)]
    pub primary: Option<String>,
    /// This node's own address, as it advertises itself to the rest of the set.
    #[serde(default)]
    pub me: Option<String>,
    /// The lowest wire protocol version this server supports.
    #[serde(default)]
    pub min_wire_version: i32,
    /// The highest wire protocol version this server supports.
    #[serde(default)]
    pub max_wire_version: i32,
    /// Voting/non-hidden members of the replica set.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Passive (non-voting) members of the replica set.
    #[serde(default)]
    pub passives: Vec<String>,
    /// Arbiter members of the replica set.
    #[serde(default)]
    pub arbiters: Vec<String>,
    /// This node's user-defined tags, used for read-preference tag-set matching.
    #[serde(default)]
    pub tags: std::collections::BTreeMap<String, String>,
    /// A logical session timeout in minutes, if sessions are supported.
    #[serde(default)]
    pub logical_session_timeout_minutes: Option<i64>,
    /// The last election id, used to detect stale primaries.
    #[serde(default)]
    pub election_id: Option<bson::oid::ObjectId>,
    /// The current topology version, used to dedupe stale monitoring responses.
    #[serde(default)]
    pub topology_version: Option<TopologyVersion>,
    /// Names of compressors the server will accept.
    #[serde(default)]
    pub compression: Vec<String>,
    /// Whether this server understands the `hello` command, as opposed to only `isMaster`.
    #[serde(default)]
    pub hello_ok: bool,
    /// The highest `$clusterTime` this server has observed.
    #[serde(default, rename = "$clusterTime")]
    pub cluster_time: Option<bson::Document>,
    /// Mechanisms the server reports as available for the user named in the handshake's
    /// `saslSupportedMechs`, present only when that field was sent.
    #[serde(default)]
    pub sasl_supported_mechs: Vec<String>,
    /// The server's own last-write timestamp, used for read-preference staleness estimation.
    /// Distinct from `$clusterTime`: that field is a cluster-wide gossiped logical clock every
    /// member converges on, while this one reflects how far behind *this* server's data is.
    #[serde(default)]
    pub last_write: Option<LastWrite>,
}

/// The `lastWrite` subdocument of a `hello` reply.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastWrite {
    /// The timestamp of the last write this server applied.
    pub last_write_date: bson::DateTime,
}

/// A server-reported marker used to discard out-of-order monitoring responses: only a
/// `TopologyVersion` with a strictly greater `counter` (for the same `process_id`) replaces the
/// one currently recorded for a server.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyVersion {
    /// Identifies the server process; changes across restarts.
    pub process_id: bson::oid::ObjectId,
    /// Monotonically increasing within a single `process_id`.
    pub counter: i64,
}

impl HelloReply {
    /// Whether this is effectively a primary, accounting for the legacy `ismaster` field.
    pub(crate) fn is_primary(&self) -> bool {
        self.is_writable_primary || self.is_master
    }
}
