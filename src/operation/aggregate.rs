//! The `aggregate` command, used directly for pipelines and (with a `$match`/`$count` stage) as
//! the implementation of `count_documents`.

use bson::Document;

use super::{parse_cursor_response, Operation, Retryability};
use crate::{
    concern::ReadConcern,
    error::Result,
    options::Namespace,
    read_preference::SelectionCriteria,
};

pub(crate) struct AggregateResult {
    pub(crate) cursor_id: i64,
    pub(crate) first_batch: Vec<Document>,
}

pub(crate) struct Aggregate {
    pub(crate) ns: Namespace,
    pub(crate) pipeline: Vec<Document>,
    pub(crate) batch_size: Option<u32>,
    pub(crate) selection_criteria: Option<SelectionCriteria>,
    pub(crate) read_concern: Option<ReadConcern>,
}

impl Operation for Aggregate {
    type O = AggregateResult;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cursor_opts = Document::new();
        if let Some(batch_size) = self.batch_size {
            cursor_opts.insert("batchSize", batch_size as i32);
        }
        Ok(bson::doc! {
            "aggregate": self.ns.coll.clone(),
            "pipeline": self.pipeline.clone(),
            "cursor": cursor_opts,
        })
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        let (cursor_id, first_batch) = parse_cursor_response(&response)?;
        Ok(AggregateResult {
            cursor_id,
            first_batch,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        // A pipeline containing a writing stage (`$out`/`$merge`) is not retryable; this crate's
        // Non-goals exclude `$out`/`$merge` awareness, so conservatively always treat aggregate
        // as a read-retry candidate, matching the common case of a read-only pipeline.
        Retryability::Read
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }
}
