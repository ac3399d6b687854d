//! Cluster time bookkeeping and transaction-session address pinning.
//!
//! This crate does not implement multi-statement transactions (see Non-goals in
//! `DESIGN.md`), but it still carries the session-consistency bookkeeping the core wire
//! protocol and error-classification layers are specified against: a monotonic `$clusterTime`
//! token, and the notion of a session "pinned" to the address that started a transaction so a
//! retry or commit can be routed back to it.

use std::sync::{Arc, RwLock};

use bson::Document;

use crate::options::ServerAddress;

/// An opaque, monotonically-increasing (by embedded timestamp) logical clock token echoed back
/// to the server on every subsequent command once observed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClusterTime {
    document: Document,
    timestamp: bson::Timestamp,
}

impl ClusterTime {
    fn from_document(document: Document) -> Option<Self> {
        let timestamp = match document.get("clusterTime")? {
            bson::Bson::Timestamp(ts) => *ts,
            _ => return None,
        };
        Some(Self {
            document,
            timestamp,
        })
    }

    pub(crate) fn as_document(&self) -> &Document {
        &self.document
    }
}

/// Thread-safe holder for a [`Client`](crate::client::Client)'s cluster time, updated from every
/// reply that carries a `$clusterTime` and read back onto every outgoing command.
#[derive(Clone, Default)]
pub(crate) struct ClusterTimeTracker {
    current: Arc<RwLock<Option<ClusterTime>>>,
}

impl ClusterTimeTracker {
    /// Updates the tracked cluster time from a server reply, iff the reply's embedded timestamp
    /// is strictly greater than the one already recorded.
    pub(crate) fn advance(&self, reply: &Document) {
        let Some(candidate) = reply
            .get_document("$clusterTime")
            .ok()
            .and_then(|doc| ClusterTime::from_document(doc.clone()))
        else {
            return;
        };

        let mut current = self.current.write().expect("cluster time lock poisoned");
        let should_replace = match current.as_ref() {
            Some(existing) => candidate.timestamp > existing.timestamp,
            None => true,
        };
        if should_replace {
            *current = Some(candidate);
        }
    }

    /// Echoes the tracked cluster time onto an outgoing command, if one has been observed and
    /// the target server supports it (wire version >= 6, i.e. sessions-supporting).
    pub(crate) fn append_to(&self, command: &mut Document, server_supports_sessions: bool) {
        if !server_supports_sessions {
            return;
        }
        if let Some(current) = self.current.read().expect("cluster time lock poisoned").as_ref() {
            command.insert("$clusterTime", current.as_document().clone());
        }
    }
}

/// The lifecycle state of a (logical, non-transactional) client session with respect to an
/// in-progress transaction. This crate does not execute multi-statement transactions, but error
/// classification (`TransientTransactionError` / `UnknownTransactionCommitResult` labeling, see
/// `crate::error`) is specified in terms of this state, so it is modeled as a first-class value
/// a caller may attach to an [`crate::operation::Operation`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    /// No transaction is in progress.
    None,
    /// `startTransaction` has been sent but no statement has completed yet.
    Starting,
    /// At least one statement of the transaction has completed successfully.
    InProgress,
    /// `commitTransaction` has been sent and a result is pending or was lost to a retryable
    /// error.
    Committed,
}

/// A session's pinned address (the server that began its transaction), plus its transaction
/// state. Sessions that have never started a transaction are always unpinned.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pinned_address: Option<ServerAddress>,
    transaction_state: Option<TransactionState>,
}

impl SessionState {
    /// A fresh, unpinned session with no transaction in progress.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn transaction_state(&self) -> TransactionState {
        self.transaction_state.unwrap_or(TransactionState::None)
    }

    pub(crate) fn set_transaction_state(&mut self, state: TransactionState) {
        self.transaction_state = Some(state);
    }

    pub(crate) fn pinned_address(&self) -> Option<&ServerAddress> {
        self.pinned_address.as_ref()
    }

    pub(crate) fn pin(&mut self, address: ServerAddress) {
        self.pinned_address = Some(address);
    }

    /// Clears the pinned address. Done when a transaction ends (commit/abort) or when a
    /// transient transaction error is classified against this session, per the error
    /// classification rules in `crate::error`.
    pub(crate) fn unpin(&mut self) {
        self.pinned_address = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cluster_time_only_advances_forward() {
        let tracker = ClusterTimeTracker::default();

        let earlier = bson::doc! {
            "$clusterTime": { "clusterTime": bson::Timestamp { time: 10, increment: 0 }, "signature": {} }
        };
        let later = bson::doc! {
            "$clusterTime": { "clusterTime": bson::Timestamp { time: 20, increment: 0 }, "signature": {} }
        };

        tracker.advance(&later);
        tracker.advance(&earlier);

        let mut command = Document::new();
        tracker.append_to(&mut command, true);
        let recorded = command.get_document("$clusterTime").unwrap();
        assert_eq!(
            recorded.get("clusterTime").unwrap(),
            &bson::Bson::Timestamp(bson::Timestamp {
                time: 20,
                increment: 0
            })
        );
    }

    #[test]
    fn transient_transaction_error_unpins_session() {
        let mut session = SessionState::new();
        session.pin(ServerAddress::new("a".into(), Some(27017)));
        session.set_transaction_state(TransactionState::InProgress);

        session.unpin();
        assert!(session.pinned_address().is_none());
    }
}
