//! The `update` command: applies a batch of update statements (possibly `multi`/`upsert`).

use bson::Document;

use super::{Operation, Retryability};
use crate::{concern::WriteConcern, error::Result, options::Namespace};

/// One entry of an `update` command's `updates` array.
#[derive(Clone, Debug)]
pub(crate) struct UpdateStatement {
    pub(crate) query: Document,
    pub(crate) update: Document,
    pub(crate) multi: bool,
    pub(crate) upsert: bool,
    pub(crate) collation: Option<Document>,
    pub(crate) array_filters: Option<Vec<Document>>,
}

pub(crate) struct UpdateResult {
    pub(crate) n: i64,
    pub(crate) n_modified: i64,
    pub(crate) upserted: Vec<Document>,
    pub(crate) write_errors: Vec<Document>,
    pub(crate) write_concern_error: Option<Document>,
}

pub(crate) struct Update {
    pub(crate) ns: Namespace,
    pub(crate) updates: Vec<UpdateStatement>,
    pub(crate) ordered: bool,
    pub(crate) write_concern: Option<WriteConcern>,
}

impl Operation for Update {
    type O = UpdateResult;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let updates: Vec<Document> = self
            .updates
            .iter()
            .map(|u| {
                let mut doc = bson::doc! {
                    "q": u.query.clone(),
                    "u": u.update.clone(),
                    "multi": u.multi,
                    "upsert": u.upsert,
                };
                if let Some(collation) = &u.collation {
                    doc.insert("collation", collation.clone());
                }
                if let Some(array_filters) = &u.array_filters {
                    doc.insert("arrayFilters", array_filters.clone());
                }
                doc
            })
            .collect();

        let mut cmd = bson::doc! {
            "update": self.ns.coll.clone(),
            "updates": updates,
            "ordered": self.ordered,
        };
        if let Some(wc) = self.write_concern.as_ref().and_then(|wc| wc.to_document()) {
            cmd.insert("writeConcern", wc);
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        Ok(UpdateResult {
            n: response.get_i32("n").map(|n| n as i64).unwrap_or(0),
            n_modified: response.get_i32("nModified").map(|n| n as i64).unwrap_or(0),
            upserted: response
                .get_array("upserted")
                .ok()
                .map(|a| a.iter().filter_map(|e| e.as_document().cloned()).collect())
                .unwrap_or_default(),
            write_errors: response
                .get_array("writeErrors")
                .ok()
                .map(|a| a.iter().filter_map(|e| e.as_document().cloned()).collect())
                .unwrap_or_default(),
            write_concern_error: response.get_document("writeConcernError").ok().cloned(),
        })
    }

    fn retryability(&self) -> Retryability {
        if self.write_concern.as_ref().is_some_and(|wc| !wc.is_acknowledged()) {
            return Retryability::None;
        }
        // A multi-document update isn't retryable: a retry after a network error that actually
        // succeeded server-side could double-apply to documents beyond the first match.
        if self.updates.iter().any(|u| u.multi) {
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}
