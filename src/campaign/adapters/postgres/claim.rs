//! Exclusive claim of pending changeset jobs.
//!
//! Rows locked by a concurrent claimer are skipped rather than waited on,
//! so any number of workers can poll the same table and each pending job is
//! handed to exactly one of them. The row lock is held until the claiming
//! transaction ends; a rollback therefore also reverts `started_at`.

use super::models::{ChangesetJobRow, row_to_changeset_job};
use crate::campaign::{
    domain::ChangesetJob,
    ports::{StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Timestamptz;

const CLAIM_PENDING_CHANGESET_JOB: &str = concat!(
    "UPDATE changeset_jobs SET started_at = $1, updated_at = $1 ",
    "WHERE id = (",
    "SELECT j.id FROM changeset_jobs j ",
    "JOIN campaigns c ON c.id = j.campaign_id ",
    "WHERE j.started_at IS NULL AND c.patch_set_id IS NOT NULL ",
    "ORDER BY j.id ASC ",
    "FOR UPDATE OF j SKIP LOCKED ",
    "LIMIT 1",
    ") ",
    "RETURNING id, campaign_id, patch_id, changeset_id, branch, error, ",
    "started_at, finished_at, created_at, updated_at",
);

/// Claims the lowest-id unlocked pending job. Must run inside a transaction.
pub(super) fn claim_pending(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> StoreResult<Option<ChangesetJob>> {
    diesel::sql_query(CLAIM_PENDING_CHANGESET_JOB)
        .bind::<Timestamptz, _>(now)
        .get_result::<ChangesetJobRow>(conn)
        .optional()
        .map(|row| row.map(row_to_changeset_job))
        .map_err(StoreError::persistence)
}
