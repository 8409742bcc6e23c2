//! Time utilities for warden
//!
//! Persisted timestamps (catalog refresh, diagnostic checks) are stored in UTC
//! so files stay comparable across hosts and restarts. Polling cadence uses
//! `tokio::time` directly and never goes through these helpers.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Current wall-clock time in UTC.
#[allow(clippy::disallowed_methods)] // This is the one wrapper around Utc::now()
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// How long ago `then` was, saturating to zero for timestamps in the future.
pub fn age_of(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Whether `then` is older than `max_age` at `now`.
pub fn is_older_than(then: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    age_of(then, now) > max_age
}
