//! Timestamp normalization for payment record reports.
//!
//! The remote ledger API rejects timestamps that lie in the future. Event
//! clocks and the local clock can disagree by small amounts, so any
//! event-derived timestamp about to be written into a payment record
//! (`initiated_at`, `guaranteed_at`, `failed_at`, `refunded_at`) is clamped
//! backwards before the call.

use chrono::Utc;

/// Seconds subtracted when clamping a future timestamp.
const CLAMP_BACKOFF_SECS: i64 = 10;

/// Clamp `ts` so it never lies after `now`. Past timestamps pass through
/// unchanged; future ones become `now - 10s` (never below zero).
pub fn normalize(ts: i64, now: i64) -> i64 {
    if ts > now {
        (now - CLAMP_BACKOFF_SECS).max(0)
    } else {
        ts
    }
}

/// `normalize` against the current wall clock.
pub fn normalize_now(ts: i64) -> i64 {
    normalize(ts, Utc::now().timestamp())
}
