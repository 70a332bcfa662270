//! Timestamp normalisation shared by both store adapters.

use chrono::{DateTime, SubsecRound, Utc};
use mockable::Clock;

/// Number of fractional-second digits `PostgreSQL` keeps for `timestamptz`.
const STORED_SUBSEC_DIGITS: u16 = 6;

/// Truncates a timestamp to the microsecond precision the database stores.
///
/// Comparing a caller-side timestamp with one read back from the database is
/// only meaningful once both are truncated the same way.
#[must_use]
pub fn to_stored_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(STORED_SUBSEC_DIGITS)
}

/// Returns the clock's current UTC time at stored precision.
#[must_use]
pub fn stored_now(clock: &(impl Clock + ?Sized)) -> DateTime<Utc> {
    to_stored_precision(clock.utc())
}

/// Returns `true` when a record timestamp has never been set.
///
/// Unset timestamps hold the Unix epoch, the `Default` value of
/// [`DateTime<Utc>`].
#[must_use]
pub fn is_unset(timestamp: DateTime<Utc>) -> bool {
    timestamp == DateTime::<Utc>::default()
}

/// Fills the timestamps of a record about to be created: an unset
/// `created_at` becomes `now` and an unset `updated_at` follows `created_at`.
pub fn stamp_creation(
    created_at: &mut DateTime<Utc>,
    updated_at: &mut DateTime<Utc>,
    now: DateTime<Utc>,
) {
    if is_unset(*created_at) {
        *created_at = now;
    }
    if is_unset(*updated_at) {
        *updated_at = *created_at;
    }
}
