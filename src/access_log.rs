//! One structured log line per inbound request, emitted after the response has been chosen.

use std::time::Duration;

use http::{Method, StatusCode};

pub fn record(
    method: &Method,
    path: &str,
    chosen_backend: &str,
    status: StatusCode,
    duration: Duration,
) {
    tracing::info!(
        method = %method,
        path,
        backend = chosen_backend,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "request handled"
    );
}
