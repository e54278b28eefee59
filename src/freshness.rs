//! Freshness gate
//!
//! Decides whether the cached aggregate is still usable based on the
//! upstream's last-modification timestamp. Independent of the result cache's
//! TTL: the gate asks "is the upstream data still current", the TTL asks "is
//! the slot still populated".

use chrono::{DateTime, Duration, Utc};

/// Default staleness window in minutes: data modified more recently is current
pub const DEFAULT_STALENESS_WINDOW_MINUTES: i64 = 5;

/// The default staleness window as a `chrono::Duration`
pub fn default_staleness_window() -> Duration {
    Duration::minutes(DEFAULT_STALENESS_WINDOW_MINUTES)
}

/// Returns true when cached data derived from `last_modified` is still usable
///
/// False when no modification timestamp is known, when the data is at least
/// `window` old, or when the timestamp lies in the future (clock skew on either
/// side) — a future-dated timestamp forces a re-fetch rather than pinning the
/// cache valid indefinitely.
pub fn cache_is_valid(
    last_modified: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    let Some(last_modified) = last_modified else {
        return false;
    };
    let age = now - last_modified;
    age >= Duration::zero() && age < window
}

/// Age of the upstream data in whole minutes, for logging and debug output
pub fn age_minutes(last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    last_modified.map(|lm| (now - lm).num_minutes())
}
