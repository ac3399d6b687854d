//! Database-scoped handles: a value-object factory for [`Collection`] handles and a thin
//! wrapper for running commands against a specific database.

use bson::Document;

use crate::{
    client::Client,
    coll::Collection,
    concern::{ReadConcern, WriteConcern},
    cursor::Cursor,
    error::Result,
    options::Namespace,
    read_preference::SelectionCriteria,
};

/// A handle to one database on a deployment. Carries its own optional overrides for read
/// preference, read concern, and write concern; any left unset fall back to the owning
/// [`Client`]'s defaults.
#[derive(Clone)]
pub struct Database<'a> {
    client: &'a Client,
    name: String,
    selection_criteria: Option<SelectionCriteria>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl<'a> Database<'a> {
    pub(crate) fn new(client: &'a Client, name: String) -> Self {
        Self {
            client,
            name,
            selection_criteria: None,
            read_concern: None,
            write_concern: None,
        }
    }

    /// This database's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns an equivalent handle that uses `criteria` for operations that don't specify one
    /// of their own.
    pub fn with_selection_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.selection_criteria = Some(criteria);
        self
    }

    /// Returns an equivalent handle that uses `read_concern` for reads that don't specify one of
    /// their own.
    pub fn with_read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    /// Returns an equivalent handle that uses `write_concern` for writes that don't specify one
    /// of their own.
    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    pub(crate) fn selection_criteria(&self) -> Option<SelectionCriteria> {
        self.selection_criteria
            .clone()
            .or_else(|| self.client.default_selection_criteria())
    }

    pub(crate) fn read_concern(&self) -> Option<ReadConcern> {
        self.read_concern
            .clone()
            .or_else(|| self.client.default_read_concern())
    }

    pub(crate) fn write_concern(&self) -> Option<WriteConcern> {
        self.write_concern
            .clone()
            .or_else(|| self.client.default_write_concern())
    }

    /// Returns a handle to `name` within this database, inheriting its selection criteria,
    /// read concern, and write concern.
    pub fn collection(&self, name: &str) -> Collection<'a> {
        Collection::new(
            self.client,
            self.name.clone(),
            name.to_string(),
            self.selection_criteria.clone(),
            self.read_concern.clone(),
            self.write_concern.clone(),
        )
    }

    /// Lists the collections of this database.
    pub fn list_collections(&self, filter: Option<Document>) -> Result<Cursor<'a>> {
        let op = crate::operation::list_collections::ListCollections {
            db: self.name.clone(),
            filter,
            name_only: false,
        };
        let (address, result) = self.client.execute_read_returning_address(&op)?;
        let ns = Namespace {
            db: self.name.clone(),
            coll: "$cmd.listCollections".to_string(),
        };
        Ok(Cursor::new(
            self.client,
            ns,
            result.cursor_id,
            address,
            result.first_batch,
            None,
        ))
    }

    /// Runs an arbitrary command against this database.
    pub fn run_command(&self, command: Document) -> Result<Document> {
        self.client
            .run_command(&self.name, command, self.selection_criteria())
    }
}
