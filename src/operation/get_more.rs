//! The `getMore` command: fetches the next batch from an already-open cursor.

use bson::Document;

use super::{parse_cursor_response, Operation, Retryability};
use crate::{error::Result, options::Namespace, read_preference::SelectionCriteria};

pub(crate) struct GetMoreResult {
    pub(crate) cursor_id: i64,
    pub(crate) batch: Vec<Document>,
}

/// Targets the specific server that owns the cursor, via a [`SelectionCriteria::PinnedAddress`].
pub(crate) struct GetMore {
    pub(crate) ns: Namespace,
    pub(crate) cursor_id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) selection_criteria: SelectionCriteria,
}

impl Operation for GetMore {
    type O = GetMoreResult;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cmd = bson::doc! {
            "getMore": self.cursor_id,
            "collection": self.ns.coll.clone(),
        };
        if let Some(batch_size) = self.batch_size {
            cmd.insert("batchSize", batch_size as i32);
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        let (cursor_id, batch) = parse_cursor_response(&response)?;
        Ok(GetMoreResult { cursor_id, batch })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }

    fn retryability(&self) -> Retryability {
        // getMore is explicitly excluded from retryable reads: a retry would silently skip or
        // duplicate a batch of results, since the cursor's server-side position has already
        // advanced.
        Retryability::None
    }
}

/// The `killCursors` command, sent from a cursor's `Drop` impl to release server-side resources
/// for a cursor the caller didn't exhaust.
pub(crate) struct KillCursors {
    pub(crate) ns: Namespace,
    pub(crate) cursor_ids: Vec<i64>,
    pub(crate) selection_criteria: SelectionCriteria,
}

impl Operation for KillCursors {
    type O = ();

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        Ok(bson::doc! {
            "killCursors": self.ns.coll.clone(),
            "cursors": self.cursor_ids.clone(),
        })
    }

    fn handle_response(&self, _response: Document) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}
