//! Transaction-scoped advisory locks.

use crate::campaign::{
    domain::AdvisoryLockKey,
    ports::{StoreError, StoreResult},
};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Int4};

#[derive(QueryableByName)]
struct LockAttempt {
    #[diesel(sql_type = Bool)]
    acquired: bool,
}

/// Tries to take the lock without waiting; it is released when the
/// surrounding transaction ends.
pub(super) fn try_acquire(conn: &mut PgConnection, key: AdvisoryLockKey) -> StoreResult<bool> {
    diesel::sql_query("SELECT pg_try_advisory_xact_lock($1, $2) AS acquired")
        .bind::<Int4, _>(key.namespace())
        .bind::<Int4, _>(key.id())
        .get_result::<LockAttempt>(conn)
        .map(|attempt| attempt.acquired)
        .map_err(StoreError::persistence)
}
