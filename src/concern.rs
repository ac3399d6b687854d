//! Read and write concern value objects.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How many replica set members must acknowledge a write (or `"majority"`/a custom tag-set name)
/// before the server replies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Acknowledgment {
    /// Acknowledgment from this many voting members, including the primary.
    Nodes(u32),
    /// `"majority"`, or a custom getLastErrorMode name configured on the replica set.
    Custom(String),
}

impl Acknowledgment {
    /// Whether this acknowledgment level is `w: 0` (fire-and-forget).
    pub fn is_unacknowledged(&self) -> bool {
        matches!(self, Acknowledgment::Nodes(0))
    }
}

impl Serialize for Acknowledgment {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Acknowledgment::Nodes(n) => serializer.serialize_u32(*n),
            Acknowledgment::Custom(s) => serializer.serialize_str(s),
        }
    }
}

/// The write concern requested for a write operation: how many nodes must acknowledge it, whether
/// they must have journaled it, and how long the server should wait before giving up.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WriteConcern {
    /// The acknowledgment level. Defaults to the server's configured default when unset.
    pub w: Option<Acknowledgment>,
    /// How long the server waits for acknowledgment before returning a write concern error.
    pub w_timeout: Option<Duration>,
    /// Whether the write must be committed to the on-disk journal before being acknowledged.
    pub journal: Option<bool>,
}

impl WriteConcern {
    /// The unacknowledged write concern (`w: 0`).
    pub fn unacknowledged() -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(0)),
            ..Default::default()
        }
    }

    /// The majority write concern (`w: "majority"`).
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Custom("majority".to_string())),
            ..Default::default()
        }
    }

    /// Whether this is the unacknowledged (`w: 0`) write concern.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(&self.w, Some(w) if w.is_unacknowledged())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if matches!(self.journal, Some(true)) {
            if let Some(w) = &self.w {
                if w.is_unacknowledged() {
                    return Err(Error::invalid_argument(
                        "write concern cannot request an unacknowledged write with journal: true",
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn to_document(&self) -> Option<bson::Document> {
        if self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none() {
            return None;
        }
        let mut doc = bson::Document::new();
        match &self.w {
            Some(Acknowledgment::Nodes(n)) => {
                doc.insert("w", *n as i32);
            }
            Some(Acknowledgment::Custom(s)) => {
                doc.insert("w", s.clone());
            }
            None => {}
        }
        if let Some(timeout) = self.w_timeout {
            doc.insert("wtimeout", timeout.as_millis() as i64);
        }
        if let Some(j) = self.journal {
            doc.insert("j", j);
        }
        Some(doc)
    }
}

/// The minimum consistency/isolation guarantee requested for a read operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadConcernLevel {
    /// Returns the most recent copy of data available on the queried node, no durability
    /// guarantee.
    Local,
    /// Guarantees the data has been acknowledged by a majority of replica set members.
    Majority,
    /// Guarantees the data reflects the results of all majority-committed writes that completed
    /// prior to the read.
    Linearizable,
    /// Returns data from a snapshot that does not include any writes that happened after the
    /// read began.
    Snapshot,
    /// Same as `Local` but only valid within transactions.
    Available,
}

/// The read concern requested for a read operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadConcern {
    /// The requested consistency level.
    pub level: ReadConcernLevel,
}

impl ReadConcern {
    /// Shorthand for `ReadConcern { level: ReadConcernLevel::Local }`.
    pub fn local() -> Self {
        Self {
            level: ReadConcernLevel::Local,
        }
    }

    /// Shorthand for `ReadConcern { level: ReadConcernLevel::Majority }`.
    pub fn majority() -> Self {
        Self {
            level: ReadConcernLevel::Majority,
        }
    }

    pub(crate) fn to_document(&self) -> bson::Document {
        bson::doc! { "level": bson::to_bson(&self.level).unwrap_or_default() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_unacknowledged_with_journal() {
        let wc = WriteConcern {
            w: Some(Acknowledgment::Nodes(0)),
            journal: Some(true),
            ..Default::default()
        };
        assert!(wc.validate().is_err());
    }

    #[test]
    fn majority_write_concern_document() {
        let wc = WriteConcern::majority();
        let doc = wc.to_document().unwrap();
        assert_eq!(doc.get_str("w").unwrap(), "majority");
    }
}
