//! The `listCollections` command.

use bson::Document;

use super::{parse_cursor_response, Operation, Retryability};
use crate::{error::Result, options::Namespace, read_preference::SelectionCriteria};

pub(crate) struct ListCollectionsResult {
    pub(crate) cursor_id: i64,
    pub(crate) first_batch: Vec<Document>,
}

pub(crate) struct ListCollections {
    pub(crate) db: String,
    pub(crate) filter: Option<Document>,
    pub(crate) name_only: bool,
}

impl Operation for ListCollections {
    type O = ListCollectionsResult;

    fn namespace(&self) -> Option<&Namespace> {
        None
    }

    fn database(&self) -> Option<&str> {
        Some(&self.db)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cmd = bson::doc! {
            "listCollections": 1,
            "nameOnly": self.name_only,
        };
        if let Some(filter) = &self.filter {
            cmd.insert("filter", filter.clone());
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        let (cursor_id, first_batch) = parse_cursor_response(&response)?;
        Ok(ListCollectionsResult {
            cursor_id,
            first_batch,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
