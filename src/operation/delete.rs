//! The `delete` command: applies a batch of delete statements.

use bson::Document;

use super::{Operation, Retryability};
use crate::{concern::WriteConcern, error::Result, options::Namespace};

/// One entry of a `delete` command's `deletes` array. `limit` is `0` for "delete all matches" or
/// `1` for "delete the first match".
#[derive(Clone, Debug)]
pub(crate) struct DeleteStatement {
    pub(crate) query: Document,
    pub(crate) limit: u32,
    pub(crate) collation: Option<Document>,
}

pub(crate) struct DeleteResult {
    pub(crate) n: i64,
    pub(crate) write_errors: Vec<Document>,
    pub(crate) write_concern_error: Option<Document>,
}

pub(crate) struct Delete {
    pub(crate) ns: Namespace,
    pub(crate) deletes: Vec<DeleteStatement>,
    pub(crate) ordered: bool,
    pub(crate) write_concern: Option<WriteConcern>,
}

impl Operation for Delete {
    type O = DeleteResult;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let deletes: Vec<Document> = self
            .deletes
            .iter()
            .map(|d| {
                let mut doc = bson::doc! {
                    "q": d.query.clone(),
                    "limit": d.limit,
                };
                if let Some(collation) = &d.collation {
                    doc.insert("collation", collation.clone());
                }
                doc
            })
            .collect();

        let mut cmd = bson::doc! {
            "delete": self.ns.coll.clone(),
            "deletes": deletes,
            "ordered": self.ordered,
        };
        if let Some(wc) = self.write_concern.as_ref().and_then(|wc| wc.to_document()) {
            cmd.insert("writeConcern", wc);
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        Ok(DeleteResult {
            n: response.get_i32("n").map(|n| n as i64).unwrap_or(0),
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
        if self.deletes.iter().any(|d| d.limit == 0) {
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}
