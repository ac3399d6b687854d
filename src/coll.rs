//! Collection-scoped CRUD, aggregation, and bulk-write operations.

use bson::{Bson, Document};

use crate::{
    bulk_write::{self, WriteModel},
    client::Client,
    concern::{ReadConcern, WriteConcern},
    cursor::Cursor,
    error::{Error, Result},
    operation::{
        aggregate::Aggregate,
        count::Count,
        delete::{Delete, DeleteStatement},
        find::Find,
        insert::Insert,
        update::{Update, UpdateStatement},
    },
    options::Namespace,
    read_preference::SelectionCriteria,
    results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
};

/// A handle to one collection. Inherits its owning [`crate::db::Database`]'s selection
/// criteria, read concern, and write concern unless overridden.
#[derive(Clone)]
pub struct Collection<'a> {
    client: &'a Client,
    ns: Namespace,
    selection_criteria: Option<SelectionCriteria>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

/// Options narrowing a [`Collection::find`] query. Left at their defaults (`None`/`false`),
/// every field behaves per its documented server-side default.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct FindOptions {
    /// Sort order, as a document of field-to-direction pairs.
    pub sort: Option<Document>,
    /// A projection restricting which fields are returned.
    pub projection: Option<Document>,
    /// The maximum number of documents to return.
    pub limit: Option<i64>,
    /// The number of matching documents to skip before returning any.
    pub skip: Option<u64>,
    /// The number of documents to return per batch.
    pub batch_size: Option<u32>,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(
        client: &'a Client,
        db: String,
        coll: String,
        selection_criteria: Option<SelectionCriteria>,
        read_concern: Option<ReadConcern>,
        write_concern: Option<WriteConcern>,
    ) -> Self {
        Self {
            client,
            ns: Namespace { db, coll },
            selection_criteria,
            read_concern,
            write_concern,
        }
    }

    /// The namespace (`db.coll`) this handle addresses.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Returns an equivalent handle that uses `write_concern` for writes that don't specify one
    /// of their own.
    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    fn write_concern(&self) -> Option<WriteConcern> {
        self.write_concern
            .clone()
            .or_else(|| self.client.default_write_concern())
    }

    /// Inserts a single document, returning its (possibly driver-generated) `_id`.
    pub fn insert_one(&self, mut document: Document) -> Result<InsertOneResult> {
        let inserted_id = ensure_id(&mut document);
        let result = self.client.execute_write(&Insert {
            ns: self.ns.clone(),
            documents: vec![document],
            ordered: true,
            write_concern: self.write_concern(),
        })?;
        if let Some(errors) = first_write_error(&result.write_errors) {
            return Err(errors);
        }
        Ok(InsertOneResult { inserted_id })
    }

    /// Inserts every document in `documents`, in one command if possible (subject to
    /// `maxWriteBatchSize`, handled transparently by [`crate::bulk_write`]'s batching). Any
    /// document missing an `_id` has a fresh [`bson::oid::ObjectId`] assigned to it before being
    /// sent, matching `insert_one`'s behavior.
    pub fn insert_many(
        &self,
        documents: impl IntoIterator<Item = Document>,
        ordered: bool,
    ) -> Result<InsertManyResult> {
        let mut documents: Vec<Document> = documents.into_iter().collect();
        let inserted_ids = documents
            .iter_mut()
            .enumerate()
            .map(|(i, d)| (i, ensure_id(d)))
            .collect();
        let models: Vec<WriteModel> = documents
            .into_iter()
            .map(|document| WriteModel::InsertOne { document })
            .collect();
        bulk_write::execute(self.client, &self.ns, &models, ordered)?;
        Ok(InsertManyResult { inserted_ids })
    }

    /// Updates the first document matching `filter`.
    pub fn update_one(&self, filter: Document, update: Document, upsert: bool) -> Result<UpdateResult> {
        self.run_update(vec![UpdateStatement {
            query: filter,
            update,
            multi: false,
            upsert,
            collation: None,
            array_filters: None,
        }])
    }

    /// Updates every document matching `filter`.
    pub fn update_many(&self, filter: Document, update: Document, upsert: bool) -> Result<UpdateResult> {
        self.run_update(vec![UpdateStatement {
            query: filter,
            update,
            multi: true,
            upsert,
            collation: None,
            array_filters: None,
        }])
    }

    /// Replaces the first document matching `filter` with `replacement`.
    pub fn replace_one(&self, filter: Document, replacement: Document, upsert: bool) -> Result<UpdateResult> {
        self.run_update(vec![UpdateStatement {
            query: filter,
            update: replacement,
            multi: false,
            upsert,
            collation: None,
            array_filters: None,
        }])
    }

    fn run_update(&self, updates: Vec<UpdateStatement>) -> Result<UpdateResult> {
        let outcome = self.client.execute_write(&Update {
            ns: self.ns.clone(),
            updates,
            ordered: true,
            write_concern: self.write_concern(),
        })?;
        if let Some(error) = first_write_error(&outcome.write_errors) {
            return Err(error);
        }
        let upserted_id = outcome
            .upserted
            .first()
            .and_then(|doc| doc.get("_id").cloned());
        Ok(UpdateResult {
            matched_count: outcome.n,
            modified_count: outcome.n_modified,
            upserted_id,
        })
    }

    /// Deletes the first document matching `filter`.
    pub fn delete_one(&self, filter: Document) -> Result<DeleteResult> {
        self.run_delete(vec![DeleteStatement {
            query: filter,
            limit: 1,
            collation: None,
        }])
    }

    /// Deletes every document matching `filter`.
    pub fn delete_many(&self, filter: Document) -> Result<DeleteResult> {
        self.run_delete(vec![DeleteStatement {
            query: filter,
            limit: 0,
            collation: None,
        }])
    }

    fn run_delete(&self, deletes: Vec<DeleteStatement>) -> Result<DeleteResult> {
        let outcome = self.client.execute_write(&Delete {
            ns: self.ns.clone(),
            deletes,
            ordered: true,
            write_concern: self.write_concern(),
        })?;
        if let Some(error) = first_write_error(&outcome.write_errors) {
            return Err(error);
        }
        Ok(DeleteResult {
            deleted_count: outcome.n,
        })
    }

    /// Runs a heterogeneous batch of inserts/updates/deletes against this collection.
    pub fn bulk_write(&self, models: Vec<WriteModel>, ordered: bool) -> Result<crate::results::BulkWriteResult> {
        self.client.bulk_write(&self.ns, &models, ordered)
    }

    /// Opens a cursor over every document matching `filter`.
    pub fn find(&self, filter: Document, options: FindOptions) -> Result<Cursor<'a>> {
        let op = Find {
            ns: self.ns.clone(),
            filter,
            sort: options.sort,
            projection: options.projection,
            limit: options.limit,
            skip: options.skip,
            batch_size: options.batch_size,
            selection_criteria: self.selection_criteria.clone(),
            read_concern: self.read_concern.clone(),
        };
        let (address, result) = self.client.execute_read_returning_address(&op)?;
        Ok(Cursor::new(
            self.client,
            self.ns.clone(),
            result.cursor_id,
            address,
            result.first_batch,
            options.batch_size,
        ))
    }

    /// Returns the first document matching `filter`, if any.
    pub fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        let mut options = FindOptions::default();
        options.limit = Some(1);
        let mut cursor = self.find(filter, options)?;
        cursor.next().transpose()
    }

    /// Runs an aggregation pipeline, opening a cursor over its output documents.
    pub fn aggregate(&self, pipeline: Vec<Document>, batch_size: Option<u32>) -> Result<Cursor<'a>> {
        let op = Aggregate {
            ns: self.ns.clone(),
            pipeline,
            batch_size,
            selection_criteria: self.selection_criteria.clone(),
            read_concern: self.read_concern.clone(),
        };
        let (address, result) = self.client.execute_read_returning_address(&op)?;
        Ok(Cursor::new(
            self.client,
            self.ns.clone(),
            result.cursor_id,
            address,
            result.first_batch,
            batch_size,
        ))
    }

    /// The exact count of documents matching `filter`, computed via an aggregation pipeline
    /// (`$match` + `$count`), per driver convention (the legacy `count` command does not
    /// account for an in-progress multi-document transaction or a sharded deployment's
    /// orphaned documents).
    pub fn count_documents(&self, filter: Document) -> Result<u64> {
        let pipeline = vec![
            bson::doc! { "$match": filter },
            bson::doc! { "$group": { "_id": Bson::Null, "n": { "$sum": 1 } } },
        ];
        let mut cursor = self.aggregate(pipeline, None)?;
        match cursor.next().transpose()? {
            Some(doc) => Ok(doc.get_i32("n").map(|n| n as u64).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// A fast, potentially-inaccurate estimate of the collection's total document count via the
    /// legacy `count` command (no filter).
    pub fn estimated_document_count(&self) -> Result<u64> {
        let op = Count {
            ns: self.ns.clone(),
            filter: Document::new(),
            limit: None,
            skip: None,
            selection_criteria: self.selection_criteria.clone(),
        };
        Ok(self.client.execute_read(&op)?.max(0) as u64)
    }
}

/// Returns `document`'s `_id`, generating and inserting a fresh [`bson::oid::ObjectId`] first if
/// it doesn't already have one.
fn ensure_id(document: &mut Document) -> Bson {
    if let Some(id) = document.get("_id") {
        return id.clone();
    }
    let id = Bson::ObjectId(bson::oid::ObjectId::new());
    document.insert("_id", id.clone());
    id
}

fn first_write_error(raw_errors: &[Document]) -> Option<Error> {
    let doc = raw_errors.first()?;
    Some(
        crate::error::ErrorKind::Write(crate::error::WriteFailure::WriteError(
            crate::error::WriteError {
                code: doc.get_i32("code").unwrap_or(-1),
                code_name: doc.get_str("codeName").ok().map(str::to_string),
                message: doc.get_str("errmsg").unwrap_or("write error").to_string(),
            },
        ))
        .into(),
    )
}
