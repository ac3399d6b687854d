//! `maxStalenessSeconds` validation at the URI layer. The staleness *filtering* formula itself
//! is exercised by the inline unit tests in `src/sdam/server_selection.rs`, which has access to
//! the private `ServerDescription`/`Topology` types this black-box suite cannot reach.

use docking::options::ClientOptions;

#[test]
fn rejects_staleness_below_the_smallest_allowed_value() {
    let err = ClientOptions::parse(
        "mongodb://host1,host2/?replicaSet=rs0&readPreference=secondary&maxStalenessSeconds=1",
        None,
    )
    .expect_err("1s is below the 90s floor");
    assert!(err.to_string().contains("maxStalenessSeconds"));
}

#[test]
fn accepts_staleness_at_the_floor() {
    let options = ClientOptions::parse(
        "mongodb://host1,host2/?replicaSet=rs0&readPreference=secondary&maxStalenessSeconds=90",
        None,
    )
    .unwrap();
    assert_eq!(
        options
            .read_preference
            .unwrap()
            .max_staleness()
            .unwrap()
            .as_secs(),
        90
    );
}

#[test]
fn primary_mode_ignores_staleness_entirely() {
    // maxStalenessSeconds is meaningless for the primary-only mode; the parser accepts the URI
    // without error since `ReadPreference::Primary` never reports a staleness value to validate.
    let options = ClientOptions::parse(
        "mongodb://localhost/?readPreference=primary",
        None,
    )
    .unwrap();
    assert_eq!(options.read_preference.unwrap().max_staleness(), None);
}
