//! The `count` command (used for `estimated_document_count`/`count_documents`'s server-side
//! half; client-side, `count_documents` is implemented as an `aggregate` per driver convention,
//! but a direct `count` remains useful for `estimated_document_count`, which tolerates the
//! command's well-known inaccuracy under sharding in exchange for not scanning the collection).

use bson::Document;

use super::{Operation, Retryability};
use crate::{error::Result, options::Namespace, read_preference::SelectionCriteria};

pub(crate) struct Count {
    pub(crate) ns: Namespace,
    pub(crate) filter: Document,
    pub(crate) limit: Option<i64>,
    pub(crate) skip: Option<u64>,
    pub(crate) selection_criteria: Option<SelectionCriteria>,
}

impl Operation for Count {
    type O = i64;

    fn namespace(&self) -> Option<&Namespace> {
        Some(&self.ns)
    }

    fn build_command(&self, _max_wire_version: i32) -> Result<Document> {
        let mut cmd = bson::doc! {
            "count": self.ns.coll.clone(),
            "query": self.filter.clone(),
        };
        if let Some(limit) = self.limit {
            cmd.insert("limit", limit);
        }
        if let Some(skip) = self.skip {
            cmd.insert("skip", skip as i64);
        }
        Ok(cmd)
    }

    fn handle_response(&self, response: Document) -> Result<Self::O> {
        Ok(response.get_i32("n").map(|n| n as i64).unwrap_or(0))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
