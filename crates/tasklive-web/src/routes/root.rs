//! Liveness endpoint.

/// Static text confirming the process is up. Does not touch the store.
pub async fn index() -> &'static str {
    "tasklive is running"
}
