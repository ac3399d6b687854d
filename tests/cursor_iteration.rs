//! `Cursor` iteration against a live deployment, including a batch size small enough to force at
//! least one `getMore`. The pinned-address routing and `killCursors`-on-drop behavior are
//! exercised implicitly: dropping `cursor` below before it's exhausted must not panic or hang.

mod common;

use docking::FindOptions;

#[test]
fn find_paginates_across_get_more_and_cleans_up_on_drop() {
    let Some(uri) = common::test_uri() else {
        eprintln!("skipping: MONGODB_URI not set");
        return;
    };
    let client = docking::Client::with_uri_str(&uri).unwrap();
    let coll_name = format!("cursor_iteration_{}", std::process::id());
    let coll = client.collection("docking_test", &coll_name);
    coll.delete_many(bson::doc! {}).unwrap();

    let docs: Vec<bson::Document> = (0..25).map(|i| bson::doc! { "_id": i }).collect();
    coll.insert_many(docs, true).unwrap();

    let mut options = FindOptions::default();
    options.batch_size = Some(10);
    let cursor = coll.find(bson::doc! {}, options).unwrap();

    let fetched: Vec<_> = cursor.take(15).collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(fetched.len(), 15);
    // `cursor` drops here, unexhausted, issuing killCursors against its pinned server.

    coll.delete_many(bson::doc! {}).unwrap();
}
