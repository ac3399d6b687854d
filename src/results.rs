//! Public result types returned by [`crate::coll::Collection`] methods.

use std::collections::HashMap;

use bson::Bson;

/// The outcome of [`Collection::insert_one`](crate::coll::Collection::insert_one).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` of the inserted document.
    pub inserted_id: Bson,
}

/// The outcome of [`Collection::insert_many`](crate::coll::Collection::insert_many).
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` of each successfully inserted document, keyed by its index in the input slice.
    pub inserted_ids: HashMap<usize, Bson>,
}

/// The outcome of an update operation
/// ([`Collection::update_one`](crate::coll::Collection::update_one)/
/// [`Collection::update_many`](crate::coll::Collection::update_many)/
/// [`Collection::replace_one`](crate::coll::Collection::replace_one)).
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct UpdateResult {
    /// The number of documents that matched the filter.
    pub matched_count: i64,
    /// The number of documents actually modified (may be less than `matched_count` if an update
    /// document made no effective change).
    pub modified_count: i64,
    /// The `_id` of the document created by an upsert, if one occurred.
    pub upserted_id: Option<Bson>,
}

/// The outcome of a delete operation
/// ([`Collection::delete_one`](crate::coll::Collection::delete_one)/
/// [`Collection::delete_many`](crate::coll::Collection::delete_many)).
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct DeleteResult {
    /// The number of documents deleted.
    pub deleted_count: i64,
}

/// The outcome of [`Collection::bulk_write`](crate::coll::Collection::bulk_write), aggregated
/// across every batch the request was split into.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// Documents inserted.
    pub inserted_count: i64,
    /// Documents matched by update/replace statements.
    pub matched_count: i64,
    /// Documents actually modified by update/replace statements. `None` if any batch was served
    /// by a pre-2.6 server (which reports `n` but not `nModified`), making the total unknowable.
    pub modified_count: Option<i64>,
    /// Documents upserted.
    pub upserted_count: i64,
    /// Documents deleted.
    pub deleted_count: i64,
    /// The `_id` of each document created by an upsert, keyed by the index of its statement in
    /// the original request.
    pub upserted_ids: HashMap<usize, Bson>,
}
