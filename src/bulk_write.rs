//! Bulk write batching: splits a list of write models into the fewest `insert`/`update`/`delete`
//! commands that respect a server's advertised `maxWriteBatchSize`, dispatches each batch, and
//! merges the per-batch results into one [`BulkWriteResult`].
//!
//! Per the ordered/unordered contract: an ordered bulk write stops at (and reports) the first
//! batch containing an error; an unordered one runs every batch regardless and aggregates all
//! errors.

use bson::Document;

use crate::{
    client::Client,
    error::{BulkWriteError, BulkWriteFailure, Error, ErrorKind, Result},
    operation::{
        delete::{Delete, DeleteResult, DeleteStatement},
        insert::{Insert, InsertResult},
        update::{Update, UpdateResult, UpdateStatement},
        Operation,
    },
    options::Namespace,
    results::BulkWriteResult,
};

/// One write to apply as part of a bulk operation.
#[derive(Clone, Debug)]
pub enum WriteModel {
    /// Insert a single document.
    InsertOne {
        /// The document to insert.
        document: Document,
    },
    /// Update the first document matching `filter`.
    UpdateOne {
        /// The query selecting documents to consider.
        filter: Document,
        /// The update document or pipeline.
        update: Document,
        /// Whether to insert a new document if nothing matches.
        upsert: bool,
    },
    /// Update every document matching `filter`.
    UpdateMany {
        /// The query selecting documents to consider.
        filter: Document,
        /// The update document or pipeline.
        update: Document,
        /// Whether to insert a new document if nothing matches.
        upsert: bool,
    },
    /// Replace the first document matching `filter` with `replacement`.
    ReplaceOne {
        /// The query selecting documents to consider.
        filter: Document,
        /// The replacement document.
        replacement: Document,
        /// Whether to insert a new document if nothing matches.
        upsert: bool,
    },
    /// Delete the first document matching `filter`.
    DeleteOne {
        /// The query selecting documents to delete.
        filter: Document,
    },
    /// Delete every document matching `filter`.
    DeleteMany {
        /// The query selecting documents to delete.
        filter: Document,
    },
}

/// A command category a [`WriteModel`] belongs to. Consecutive models of the same kind are
/// merged into one command's array; a change of kind always starts a new batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ModelKind {
    Insert,
    Update,
    Delete,
}

impl WriteModel {
    fn kind(&self) -> ModelKind {
        match self {
            WriteModel::InsertOne { .. } => ModelKind::Insert,
            WriteModel::UpdateOne { .. }
            | WriteModel::UpdateMany { .. }
            | WriteModel::ReplaceOne { .. } => ModelKind::Update,
            WriteModel::DeleteOne { .. } | WriteModel::DeleteMany { .. } => ModelKind::Delete,
        }
    }
}

/// One same-kind run of models, identified by the original indices of its members (so results
/// can be reported back against the caller's input order).
struct Batch {
    kind: ModelKind,
    indices: Vec<usize>,
}

/// Groups `models` into maximal same-kind runs, then splits each run so no resulting command
/// exceeds `max_write_batch_size` entries. This bounds batches by count only; a batch that still
/// serializes past the negotiated `maxMessageSizeBytes` is caught downstream by
/// [`dispatch_with_size_retry`], which halves it and retries rather than surfacing a raw
/// `CommandSizeError` to the caller.
fn group_batches(models: &[WriteModel], max_write_batch_size: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Option<Batch> = None;

    for (i, model) in models.iter().enumerate() {
        let kind = model.kind();
        let start_new = match &current {
            Some(batch) => batch.kind != kind || batch.indices.len() >= max_write_batch_size,
            None => true,
        };
        if start_new {
            if let Some(batch) = current.take() {
                batches.push(batch);
            }
            current = Some(Batch {
                kind,
                indices: vec![i],
            });
        } else if let Some(batch) = current.as_mut() {
            batch.indices.push(i);
        }
    }
    if let Some(batch) = current {
        batches.push(batch);
    }
    batches
}

/// Runs every batch in `models` against `ns` over `client`, returning the merged result. A
/// `BulkWrite` error is returned (carrying every write error collected so far) if any batch
/// reported one; the partial result up to that point is discarded, matching how a single-command
/// write error is surfaced (the caller inspects the error's [`BulkWriteFailure`], not a partial
/// success value).
pub(crate) fn execute(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    ordered: bool,
) -> Result<BulkWriteResult> {
    let write_concern = client.write_concern_for(ns);
    let max_write_batch_size = client.max_write_batch_size();
    let batches = group_batches(models, max_write_batch_size);

    let mut result = BulkWriteResult::default();
    let mut write_errors = Vec::new();
    let mut write_concern_error = None;

    for batch in &batches {
        if ordered && !write_errors.is_empty() {
            break;
        }
        match batch.kind {
            ModelKind::Insert => {
                let outcome = run_insert_batch_sized(client, ns, models, &batch.indices, ordered, write_concern.clone())?;
                result.inserted_count += outcome.n;
                write_errors.extend(translate_write_errors(&batch.indices, outcome.write_errors));
                write_concern_error = write_concern_error.or(outcome.write_concern_error);
            }
            ModelKind::Update => {
                let outcome = run_update_batch_sized(client, ns, models, &batch.indices, ordered, write_concern.clone())?;
                // The server's reported `n` counts matched documents *and* upserted inserts
                // together; matched_count must only count the former, or an upsert-insert gets
                // counted twice (once here, once via upserted_count below).
                result.matched_count += outcome.n - outcome.upserted.len() as i64;
                result.modified_count = Some(
                    result.modified_count.unwrap_or(0) + outcome.n_modified,
                );
                for upserted in &outcome.upserted {
                    if let Some((local, id)) = upserted_id(upserted) {
                        if let Some(&original) = batch.indices.get(local) {
                            result.upserted_ids.insert(original, id);
                            result.upserted_count += 1;
                        }
                    }
                }
                write_errors.extend(translate_write_errors(&batch.indices, outcome.write_errors));
                write_concern_error = write_concern_error.or(outcome.write_concern_error);
            }
            ModelKind::Delete => {
                let outcome = run_delete_batch_sized(client, ns, models, &batch.indices, ordered, write_concern.clone())?;
                result.deleted_count += outcome.n;
                write_errors.extend(translate_write_errors(&batch.indices, outcome.write_errors));
                write_concern_error = write_concern_error.or(outcome.write_concern_error);
            }
        }
    }

    if !write_errors.is_empty() || write_concern_error.is_some() {
        return Err(bulk_write_error(write_errors, write_concern_error));
    }
    Ok(result)
}

fn run_insert_batch(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    indices: &[usize],
    ordered: bool,
    write_concern: Option<crate::concern::WriteConcern>,
) -> Result<InsertResult> {
    let documents: Vec<Document> = indices
        .iter()
        .map(|&i| match &models[i] {
            WriteModel::InsertOne { document } => document.clone(),
            _ => unreachable!("group_batches only groups models of matching kind"),
        })
        .collect();

    client.execute_write(&Insert {
        ns: ns.clone(),
        documents,
        ordered,
        write_concern,
    })
}

fn run_update_batch(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    indices: &[usize],
    ordered: bool,
    write_concern: Option<crate::concern::WriteConcern>,
) -> Result<UpdateResult> {
    let updates: Vec<UpdateStatement> = indices
        .iter()
        .map(|&i| match &models[i] {
            WriteModel::UpdateOne { filter, update, upsert } => UpdateStatement {
                query: filter.clone(),
                update: update.clone(),
                multi: false,
                upsert: *upsert,
                collation: None,
                array_filters: None,
            },
            WriteModel::UpdateMany { filter, update, upsert } => UpdateStatement {
                query: filter.clone(),
                update: update.clone(),
                multi: true,
                upsert: *upsert,
                collation: None,
                array_filters: None,
            },
            WriteModel::ReplaceOne { filter, replacement, upsert } => UpdateStatement {
                query: filter.clone(),
                update: replacement.clone(),
                multi: false,
                upsert: *upsert,
                collation: None,
                array_filters: None,
            },
            _ => unreachable!("group_batches only groups models of matching kind"),
        })
        .collect();

    client.execute_write(&Update {
        ns: ns.clone(),
        updates,
        ordered,
        write_concern,
    })
}

fn run_delete_batch(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    indices: &[usize],
    ordered: bool,
    write_concern: Option<crate::concern::WriteConcern>,
) -> Result<DeleteResult> {
    let deletes: Vec<DeleteStatement> = indices
        .iter()
        .map(|&i| match &models[i] {
            WriteModel::DeleteOne { filter } => DeleteStatement {
                query: filter.clone(),
                limit: 1,
                collation: None,
            },
            WriteModel::DeleteMany { filter } => DeleteStatement {
                query: filter.clone(),
                limit: 0,
                collation: None,
            },
            _ => unreachable!("group_batches only groups models of matching kind"),
        })
        .collect();

    client.execute_write(&Delete {
        ns: ns.clone(),
        deletes,
        ordered,
        write_concern,
    })
}

/// Runs `indices` through [`run_insert_batch`], and on a `CommandSizeError` halves it and retries
/// each half rather than surfacing the raw size error. Per §4.6: a batch within
/// `max_write_batch_size` entries can still serialize past `maxMessageSizeBytes`, so count-based
/// grouping alone isn't enough. A single index that still overflows on its own becomes a
/// [`DocumentSizeError`](ErrorKind::DocumentSizeError) — no amount of splitting fixes that.
fn run_insert_batch_sized(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    indices: &[usize],
    ordered: bool,
    write_concern: Option<crate::concern::WriteConcern>,
) -> Result<InsertResult> {
    match run_insert_batch(client, ns, models, indices, ordered, write_concern.clone()) {
        Err(e) if e.is_command_size_error() && indices.len() > 1 => {
            let (left_idx, right_idx) = indices.split_at(indices.len() / 2);
            let mut left = run_insert_batch_sized(client, ns, models, left_idx, ordered, write_concern.clone())?;
            if ordered && !left.write_errors.is_empty() {
                return Ok(left);
            }
            let right = run_insert_batch_sized(client, ns, models, right_idx, ordered, write_concern)?;
            merge_insert_result(&mut left, right, left_idx.len());
            Ok(left)
        }
        Err(e) if e.is_command_size_error() => Err(Error::document_size_error(indices[0])),
        other => other,
    }
}

fn run_update_batch_sized(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    indices: &[usize],
    ordered: bool,
    write_concern: Option<crate::concern::WriteConcern>,
) -> Result<UpdateResult> {
    match run_update_batch(client, ns, models, indices, ordered, write_concern.clone()) {
        Err(e) if e.is_command_size_error() && indices.len() > 1 => {
            let (left_idx, right_idx) = indices.split_at(indices.len() / 2);
            let mut left = run_update_batch_sized(client, ns, models, left_idx, ordered, write_concern.clone())?;
            if ordered && !left.write_errors.is_empty() {
                return Ok(left);
            }
            let right = run_update_batch_sized(client, ns, models, right_idx, ordered, write_concern)?;
            merge_update_result(&mut left, right, left_idx.len());
            Ok(left)
        }
        Err(e) if e.is_command_size_error() => Err(Error::document_size_error(indices[0])),
        other => other,
    }
}

fn run_delete_batch_sized(
    client: &Client,
    ns: &Namespace,
    models: &[WriteModel],
    indices: &[usize],
    ordered: bool,
    write_concern: Option<crate::concern::WriteConcern>,
) -> Result<DeleteResult> {
    match run_delete_batch(client, ns, models, indices, ordered, write_concern.clone()) {
        Err(e) if e.is_command_size_error() && indices.len() > 1 => {
            let (left_idx, right_idx) = indices.split_at(indices.len() / 2);
            let mut left = run_delete_batch_sized(client, ns, models, left_idx, ordered, write_concern.clone())?;
            if ordered && !left.write_errors.is_empty() {
                return Ok(left);
            }
            let right = run_delete_batch_sized(client, ns, models, right_idx, ordered, write_concern)?;
            merge_delete_result(&mut left, right, left_idx.len());
            Ok(left)
        }
        Err(e) if e.is_command_size_error() => Err(Error::document_size_error(indices[0])),
        other => other,
    }
}

/// Adds `offset` to every `"index"` field in `docs`, so a second half's batch-local indices line
/// up with the first half's frame before the two are merged.
fn offset_indices(docs: &mut [Document], offset: usize) {
    for doc in docs.iter_mut() {
        if let Ok(i) = doc.get_i32("index") {
            doc.insert("index", i + offset as i32);
        }
    }
}

fn merge_insert_result(left: &mut InsertResult, mut right: InsertResult, offset: usize) {
    left.n += right.n;
    offset_indices(&mut right.write_errors, offset);
    left.write_errors.extend(right.write_errors);
    left.write_concern_error = left.write_concern_error.take().or(right.write_concern_error);
}

fn merge_update_result(left: &mut UpdateResult, mut right: UpdateResult, offset: usize) {
    left.n += right.n;
    left.n_modified += right.n_modified;
    offset_indices(&mut right.write_errors, offset);
    left.write_errors.extend(right.write_errors);
    offset_indices(&mut right.upserted, offset);
    left.upserted.extend(right.upserted);
    left.write_concern_error = left.write_concern_error.take().or(right.write_concern_error);
}

fn merge_delete_result(left: &mut DeleteResult, mut right: DeleteResult, offset: usize) {
    left.n += right.n;
    offset_indices(&mut right.write_errors, offset);
    left.write_errors.extend(right.write_errors);
    left.write_concern_error = left.write_concern_error.take().or(right.write_concern_error);
}

/// Translates a batch's raw `writeErrors` documents into [`BulkWriteError`]s, offsetting each
/// error's in-batch index to the caller's original `models` indexing.
fn translate_write_errors(indices: &[usize], raw_errors: Vec<Document>) -> Vec<BulkWriteError> {
    raw_errors
        .into_iter()
        .filter_map(|doc| {
            let local_index = doc.get_i32("index").ok()? as usize;
            let original_index = *indices.get(local_index)?;
            Some(BulkWriteError {
                index: original_index,
                code: doc.get_i32("code").unwrap_or(-1),
                code_name: doc.get_str("codeName").ok().map(str::to_string),
                message: doc.get_str("errmsg").unwrap_or("write error").to_string(),
            })
        })
        .collect()
}

fn bulk_write_error(write_errors: Vec<BulkWriteError>, write_concern_error: Option<Document>) -> Error {
    let write_concern_error = write_concern_error.map(|doc| crate::error::WriteConcernError {
        code: doc.get_i32("code").unwrap_or(-1),
        code_name: doc.get_str("codeName").unwrap_or("").to_string(),
        message: doc.get_str("errmsg").unwrap_or("write concern error").to_string(),
    });
    ErrorKind::BulkWrite(BulkWriteFailure {
        write_errors: if write_errors.is_empty() {
            None
        } else {
            Some(write_errors)
        },
        write_concern_error,
    })
    .into()
}

/// Extracts the `_id` an upserted-document report carries, for folding into
/// [`BulkWriteResult::upserted_ids`].
fn upserted_id(doc: &Document) -> Option<(usize, bson::Bson)> {
    let index = doc.get_i32("index").ok()? as usize;
    let id = doc.get("_id")?.clone();
    Some((index, id))
}

#[cfg(test)]
mod test {
    use super::*;
    use bson::doc;

    fn insert_models(n: usize) -> Vec<WriteModel> {
        (0..n)
            .map(|i| WriteModel::InsertOne {
                document: doc! { "i": i as i32 },
            })
            .collect()
    }

    #[test]
    fn group_batches_splits_on_kind_change() {
        let models = vec![
            WriteModel::InsertOne { document: doc! {} },
            WriteModel::InsertOne { document: doc! {} },
            WriteModel::DeleteOne { filter: doc! {} },
            WriteModel::InsertOne { document: doc! {} },
        ];
        let batches = group_batches(&models, 1000);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].kind, ModelKind::Insert);
        assert_eq!(batches[0].indices, vec![0, 1]);
        assert_eq!(batches[1].kind, ModelKind::Delete);
        assert_eq!(batches[1].indices, vec![2]);
        assert_eq!(batches[2].kind, ModelKind::Insert);
        assert_eq!(batches[2].indices, vec![3]);
    }

    #[test]
    fn group_batches_splits_on_max_write_batch_size() {
        let models = insert_models(5);
        let batches = group_batches(&models, 2);
        assert_eq!(
            batches.iter().map(|b| b.indices.clone()).collect::<Vec<_>>(),
            vec![vec![0, 1], vec![2, 3], vec![4]]
        );
    }

    #[test]
    fn offset_indices_shifts_index_field() {
        let mut docs = vec![doc! { "index": 0, "code": 11000 }, doc! { "index": 2 }];
        offset_indices(&mut docs, 3);
        assert_eq!(docs[0].get_i32("index").unwrap(), 3);
        assert_eq!(docs[1].get_i32("index").unwrap(), 5);
    }

    #[test]
    fn merge_insert_result_sums_counts_and_offsets_errors() {
        let mut left = InsertResult {
            n: 2,
            write_errors: vec![doc! { "index": 1, "code": 11000 }],
            write_concern_error: None,
        };
        let right = InsertResult {
            n: 3,
            write_errors: vec![doc! { "index": 0, "code": 11000 }],
            write_concern_error: None,
        };
        merge_insert_result(&mut left, right, 2);
        assert_eq!(left.n, 5);
        assert_eq!(left.write_errors.len(), 2);
        assert_eq!(left.write_errors[1].get_i32("index").unwrap(), 2);
    }

    #[test]
    fn merge_update_result_offsets_upserted_indices_too() {
        let mut left = UpdateResult {
            n: 1,
            n_modified: 1,
            upserted: vec![doc! { "index": 0, "_id": 1 }],
            write_errors: vec![],
            write_concern_error: None,
        };
        let right = UpdateResult {
            n: 1,
            n_modified: 0,
            upserted: vec![doc! { "index": 0, "_id": 2 }],
            write_errors: vec![],
            write_concern_error: None,
        };
        merge_update_result(&mut left, right, 1);
        assert_eq!(left.n, 2);
        assert_eq!(left.upserted.len(), 2);
        assert_eq!(left.upserted[1].get_i32("index").unwrap(), 1);
    }
}
