//! The `find` command: opens a cursor over documents matching a filter.

use bson::Document;

use super::{parse_cursor_response, Operation, Retryability};
use crate::{
    concern::ReadConcern,
    error::Result,
    options::Namespace,
    read_preference::SelectionCriteria,
};

/// The result of a `find` command: the id of the opened cursor (0 if exhausted already) and its
/// first batch of documents.
pub(crate) struct FindResult {
    pub(crate) cursor_id: i64,
    pub(crate) first_batch: Vec<Document>,
}

pub(crate) struct Find {
    pub(crate) ns: Namespace,
    pub(crate) filter: Document,
    pub(crate) sort: Option<Document>,
    pub(crate) projection: Option<Document>,
    pub(crate) limit: Option<i64>,
    pub(crate) skip: Option<u64>,
    pub(crate) batch_size: Option<u32>,
    pub(crate) selection_criteria: Option<SelectionCriteria>,
    pub(crate) read_concern: Option<ReadConcern>,
}

impl Operation for Find {
    type O = FindResult;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cmd = bson::doc! {
            "find": self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };
        if let Some(sort) = &self.sort {
            cmd.insert("sort", sort.clone());
        }
        if let Some(projection) = &self.projection {
            cmd.insert("projection", projection.clone());
        }
        if let Some(limit) = self.limit {
            cmd.insert("limit", limit);
        }
        if let Some(skip) = self.skip {
            cmd.insert("skip", skip as i64);
        }
        if let Some(batch_size) = self.batch_size {
            cmd.insert("batchSize", batch_size as i32);
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        let (cursor_id, first_batch) = parse_cursor_response(&response)?;
        Ok(FindResult {
            cursor_id,
            first_batch,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }
}
