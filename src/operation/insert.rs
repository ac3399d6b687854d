//! The `insert` command: inserts a batch of documents (already split to respect
//! `max_write_batch_size`/`max_bson_object_size` by [`crate::bulk_write`]).

use bson::Document;

use super::{Operation, Retryability};
use crate::{concern::WriteConcern, error::Result, options::Namespace};

pub(crate) struct InsertResult {
    pub(crate) n: i64,
    pub(crate) write_errors: Vec<Document>,
    pub(crate) write_concern_error: Option<Document>,
}

pub(crate) struct Insert {
    pub(crate) ns: Namespace,
    pub(crate) documents: Vec<Document>,
    pub(crate) ordered: bool,
    pub(crate) write_concern: Option<WriteConcern>,
}

impl Operation for Insert {
    type O = InsertResult;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cmd = bson::doc! {
            "insert": self.ns.coll.clone(),
            "documents": self.documents.clone(),
            "ordered": self.ordered,
        };
        if let Some(wc) = self.write_concern.as_ref().and_then(|wc| wc.to_document()) {
            cmd.insert("writeConcern", wc);
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        Ok(InsertResult {
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
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}
