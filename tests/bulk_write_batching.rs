//! Bulk-write batching/result-merging against a live deployment. The batch-splitting logic
//! itself (`group_batches`, same-kind run grouping capped at `maxWriteBatchSize`) is private and
//! covered by inline unit tests in `src/bulk_write.rs`; this suite only checks the
//! publicly-observable outcome of a mixed insert/update/delete request.

mod common;

use docking::WriteModel;

#[test]
fn mixed_bulk_write_reports_merged_counts() {
    let Some(uri) = common::test_uri() else {
        eprintln!("skipping: MONGODB_URI not set");
        return;
    };
    let client = docking::Client::with_uri_str(&uri).unwrap();
    let coll_name = format!("bulk_write_batching_{}", std::process::id());
    let coll = client.collection("docking_test", &coll_name);

    let models = vec![
        WriteModel::InsertOne {
            document: bson::doc! { "_id": 1, "k": "a" },
        },
        WriteModel::InsertOne {
            document: bson::doc! { "_id": 2, "k": "b" },
        },
        WriteModel::UpdateOne {
            filter: bson::doc! { "_id": 1 },
            update: bson::doc! { "$set": { "k": "updated" } },
            upsert: false,
        },
        WriteModel::DeleteOne {
            filter: bson::doc! { "_id": 2 },
        },
    ];

    let result = coll.bulk_write(models, true).unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.deleted_count, 1);

    coll.delete_many(bson::doc! {}).unwrap();
}
