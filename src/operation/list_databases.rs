//! The `listDatabases` command, always run against the `admin` database.

use bson::Document;

use super::{Operation, Retryability};
use crate::{error::{Error, Result}, options::Namespace};

pub(crate) struct ListDatabases {
    pub(crate) filter: Option<Document>,
    pub(crate) name_only: bool,
}

impl Operation for ListDatabases {
    type O = Vec<Document>;

    fn namespace(&self) -> Option<&Namespace> {
        None
    }

    fn database(&self) -> Option<&str> {
        Some("admin")
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cmd = bson::doc! {
            "listDatabases": 1,
            "nameOnly": self.name_only,
        };
        if let Some(filter) = &self.filter {
            cmd.insert("filter", filter.clone());
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        response
            .get_array("databases")
            .map_err(|_| Error::invalid_response("listDatabases reply missing databases array"))
            .map(|a| a.iter().filter_map(|d| d.as_document().cloned()).collect())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
