//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Registered method names (sorted).
    pub methods: Vec<String>,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    connections: usize,
    methods: Vec<String>,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        methods,
    }
}
