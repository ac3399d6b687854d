//! Shared helpers for integration tests that need a live deployment.

/// Returns the connection string to test against, or `None` if the caller should skip.
///
/// Anything that needs a real `mongod`/`mongos` is gated behind the `MONGODB_URI` environment
/// variable rather than requiring one for every test run.
#[allow(dead_code)]
pub fn test_uri() -> Option<String> {
    std::env::var("MONGODB_URI").ok()
}
