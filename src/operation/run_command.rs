//! An arbitrary, application-supplied command, run as-is against a database with no response
//! shape assumed.

use bson::Document;

use super::{Operation, Retryability};
use crate::{error::Result, options::Namespace, read_preference::SelectionCriteria};

pub(crate) struct RunCommand {
    pub(crate) db: String,
    pub(crate) command: Document,
    pub(crate) selection_criteria: Option<SelectionCriteria>,
}

impl Operation for RunCommand {
    type O = Document;

    fn namespace(&self) -> Option<&Namespace> {
        None
    }

    fn database(&self) -> Option<&str> {
        Some(&self.db)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        Ok(self.command.clone())
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        Ok(response)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        // The driver has no way to know whether an arbitrary command is idempotent.
        Retryability::None
    }
}
