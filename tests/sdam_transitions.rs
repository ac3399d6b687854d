//! End-to-end SDAM behavior through the public `Client` facade. The transition table itself
//! (`apply_rs_primary`/`apply_rs_member`/stale-primary detection) has dedicated inline unit tests
//! in `src/sdam/description/topology.rs`, which can construct `Topology`/`ServerDescription`
//! values directly; this suite only has the public surface to work with, so it checks the
//! observable shape of [`docking::TopologyStatus`] instead.

mod common;

use docking::Client;

#[test]
fn topology_status_is_available_before_any_successful_scan() {
    // Constructing a Client starts background monitoring but never blocks on it, so a status
    // snapshot is always obtainable immediately, even against an address nothing is listening on.
    let client = Client::with_uri_str("mongodb://127.0.0.1:1/?directConnection=true&serverSelectionTimeoutMS=100")
        .expect("parsing and starting monitoring does not require reachability");

    let status = client.topology_status(false);
    assert_eq!(status.topology_type, "Single");
    assert_eq!(status.servers.len(), 1);
}

#[test]
fn live_deployment_eventually_reports_an_available_server() {
    let Some(uri) = common::test_uri() else {
        eprintln!("skipping: MONGODB_URI not set");
        return;
    };
    let client = Client::with_uri_str(&uri).unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let status = client.topology_status(false);
        if status.servers.iter().any(|s| s.round_trip_time.is_some()) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "no server became available in time");
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
}
