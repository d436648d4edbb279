//! Millisecond wall-clock timestamps.

/// Milliseconds since the Unix epoch.
pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
