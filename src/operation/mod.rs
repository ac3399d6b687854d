//! The `Operation` contract: every command this crate sends to a server implements it, giving
//! the dispatch loop in [`crate::client::Client`] a uniform way to build a command document,
//! parse its reply, and decide whether a failure is retryable.

use bson::Document;

use crate::{
    concern::{ReadConcern, WriteConcern},
    error::{Error, Result},
    options::Namespace,
    read_preference::SelectionCriteria,
};

pub(crate) mod aggregate;
pub(crate) mod count;
pub(crate) mod delete;
pub(crate) mod find;
pub(crate) mod get_more;
pub(crate) mod insert;
pub(crate) mod list_collections;
pub(crate) mod list_databases;
pub(crate) mod run_command;
pub(crate) mod update;

/// Whether an operation may be safely resent to a different server after a retryable failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Retryability {
    /// Never retried (e.g. an arbitrary `runCommand`, or a write with an explicit unacknowledged
    /// write concern).
    None,
    /// Retried once, only against servers that advertise `retryable reads` support.
    Read,
    /// Retried once, only against servers that advertise `retryable writes` support, and only
    /// when the write concern is acknowledged.
    Write,
}

/// One command this crate can send. `T` is the type `handle_response` extracts from the raw
/// server reply.
pub(crate) trait Operation {
    /// The value extracted from a successful reply.
    type O;

    /// The namespace (database + collection) this operation targets, if any — commands that run
    /// against a whole database (e.g. `listCollections`) or no database at all return `None`.
    fn namespace(&self) -> Option<&Namespace>;

    /// Builds the command document, not yet carrying `$db`/`$clusterTime`/`lsid` (the dispatch
    /// loop adds those uniformly).
    fn build_command(&self, description_max_wire_version: i32) -> Result<Document>;

    /// Parses a successful (`ok: 1`) reply into this operation's output type.
    fn handle_response(&self, response: Document) -> Result<Self::O>;

    /// The read preference governing server selection, for read operations. `None` for writes
    /// (which always select a writable server) and for operations pinned to an address already.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// Whether this operation may be retried, and under what category.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    /// The read concern to attach, if this is a read.
    fn read_concern(&self) -> Option<&ReadConcern> {
        None
    }

    /// The write concern to attach, if this is a write.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// The database the command runs against, overriding `namespace().db` (used by
    /// database-level commands like `listCollections`/`listDatabases`).
    fn database(&self) -> Option<&str> {
        self.namespace().map(|ns| ns.db.as_str())
    }
}

/// Parses a `{cursor: {id, ns, firstBatch}}`-shaped reply, shared by every operation that opens
/// a cursor (`find`, `aggregate`, `listCollections`).
pub(crate) fn parse_cursor_response(response: &Document) -> Result<(i64, Vec<Document>)> {
    let cursor = response
        .get_document("cursor")
        .map_err(|_| Error::invalid_response("reply missing cursor field"))?;
    let id = cursor
        .get_i64("id")
        .map_err(|_| Error::invalid_response("cursor reply missing id"))?;
    let batch_key = if cursor.contains_key("firstBatch") {
        "firstBatch"
    } else {
        "nextBatch"
    };
    let batch = cursor
        .get_array(batch_key)
        .map_err(|_| Error::invalid_response("cursor reply missing batch"))?
        .iter()
        .filter_map(|b| b.as_document().cloned())
        .collect();
    Ok((id, batch))
}
