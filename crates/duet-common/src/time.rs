//! Wall-clock helpers. Every timestamp stored by duet is epoch milliseconds.

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
