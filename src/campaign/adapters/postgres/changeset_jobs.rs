//! Changeset job persistence, progress resets, and scheduling queries.

use super::{
    models::{ChangesetJobChanges, ChangesetJobRow, row_to_changeset_job},
    schema::{campaigns, changeset_jobs},
};
use crate::campaign::{
    domain::{CampaignId, ChangesetJob, ChangesetJobId, PatchId},
    ports::{
        ChangesetJobFilter, GetChangesetJobOpts, Page, PageRequest, StoreError, StoreResult,
    },
};
use chrono::{DateTime, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Int8, Nullable, Timestamptz};

const CAMPAIGN_PATCH_UNIQUE: &str = "changeset_jobs_campaign_patch_unique";

fn map_write_error(err: DieselError, changes: &ChangesetJobChanges) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
            if info.constraint_name() == Some(CAMPAIGN_PATCH_UNIQUE) =>
        {
            StoreError::DuplicateChangesetJob {
                campaign_id: CampaignId::new(changes.campaign_id),
                patch_id: PatchId::new(changes.patch_id),
            }
        }
        _ => StoreError::persistence(err),
    }
}

/// Inserts a job while holding a share lock on its campaign, so the campaign
/// cannot be closed between the check and the insert.
pub(super) fn insert(
    conn: &mut PgConnection,
    changes: &ChangesetJobChanges,
) -> StoreResult<ChangesetJob> {
    let inserted = conn.transaction::<_, DieselError, _>(|conn| {
        let closed_at: Option<Option<DateTime<Utc>>> = campaigns::table
            .find(changes.campaign_id)
            .select(campaigns::closed_at)
            .for_share()
            .get_result(conn)
            .optional()?;
        if closed_at.flatten().is_some() {
            return Ok(None);
        }
        diesel::insert_into(changeset_jobs::table)
            .values(changes)
            .returning(ChangesetJobRow::as_returning())
            .get_result(conn)
            .map(Some)
    });
    match inserted {
        Ok(Some(row)) => Ok(row_to_changeset_job(row)),
        Ok(None) => Err(StoreError::CampaignClosed(CampaignId::new(
            changes.campaign_id,
        ))),
        Err(err) => Err(map_write_error(err, changes)),
    }
}

pub(super) fn update(
    conn: &mut PgConnection,
    id: ChangesetJobId,
    changes: &ChangesetJobChanges,
) -> StoreResult<ChangesetJob> {
    diesel::update(changeset_jobs::table.find(id.into_inner()))
        .set(changes)
        .returning(ChangesetJobRow::as_returning())
        .get_result(conn)
        .optional()
        .map_err(|err| map_write_error(err, changes))?
        .map(row_to_changeset_job)
        .ok_or(StoreError::NotFound)
}

pub(super) fn delete(conn: &mut PgConnection, id: ChangesetJobId) -> StoreResult<()> {
    let deleted = diesel::delete(changeset_jobs::table.find(id.into_inner()))
        .execute(conn)
        .map_err(StoreError::persistence)?;
    if deleted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub(super) fn get(conn: &mut PgConnection, opts: GetChangesetJobOpts) -> StoreResult<ChangesetJob> {
    let mut query = changeset_jobs::table
        .select(ChangesetJobRow::as_select())
        .order(changeset_jobs::id.asc())
        .into_boxed();
    if let Some(id) = opts.id {
        query = query.filter(changeset_jobs::id.eq(id.into_inner()));
    }
    if let Some(campaign_id) = opts.campaign_id {
        query = query.filter(changeset_jobs::campaign_id.eq(campaign_id.into_inner()));
    }
    if let Some(patch_id) = opts.patch_id {
        query = query.filter(changeset_jobs::patch_id.eq(patch_id.into_inner()));
    }
    if let Some(changeset_id) = opts.changeset_id {
        query = query.filter(changeset_jobs::changeset_id.eq(changeset_id.into_inner()));
    }
    query
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .map(row_to_changeset_job)
        .ok_or(StoreError::NotFound)
}

fn filtered<'a>(filter: ChangesetJobFilter) -> changeset_jobs::BoxedQuery<'a, Pg> {
    let mut query = changeset_jobs::table.into_boxed();
    if let Some(campaign_id) = filter.campaign_id {
        query = query.filter(changeset_jobs::campaign_id.eq(campaign_id.into_inner()));
    }
    if let Some(patch_set_id) = filter.patch_set_id {
        let publishing = campaigns::table
            .select(campaigns::id)
            .filter(campaigns::patch_set_id.eq(patch_set_id.into_inner()));
        query = query.filter(changeset_jobs::campaign_id.eq_any(publishing));
    }
    query
}

pub(super) fn list(
    conn: &mut PgConnection,
    filter: ChangesetJobFilter,
    page: PageRequest,
) -> StoreResult<Page<ChangesetJob>> {
    let mut query = filtered(filter)
        .filter(changeset_jobs::id.ge(page.cursor))
        .order(changeset_jobs::id.asc())
        .select(ChangesetJobRow::as_select());
    if let Some(fetch) = page.fetch_limit() {
        query = query.limit(fetch);
    }
    let rows = query.load(conn).map_err(StoreError::persistence)?;
    let items = rows.into_iter().map(row_to_changeset_job).collect();
    Ok(Page::from_overfetch(items, page, |job: &ChangesetJob| {
        job.id.into_inner()
    }))
}

pub(super) fn count(conn: &mut PgConnection, filter: ChangesetJobFilter) -> StoreResult<i64> {
    filtered(filter)
        .count()
        .get_result(conn)
        .map_err(StoreError::persistence)
}

#[derive(QueryableByName)]
struct LatestCreatedAt {
    #[diesel(sql_type = Nullable<Timestamptz>)]
    latest: Option<DateTime<Utc>>,
}

/// Newest job creation time of a campaign, or `None` while any patch of its
/// patch set still lacks a job.
pub(super) fn latest_created_at(
    conn: &mut PgConnection,
    campaign_id: CampaignId,
) -> StoreResult<Option<DateTime<Utc>>> {
    let row = diesel::sql_query(concat!(
        "SELECT MAX(changeset_jobs.created_at) AS latest ",
        "FROM patches ",
        "INNER JOIN campaigns ON patches.patch_set_id = campaigns.patch_set_id ",
        "LEFT JOIN changeset_jobs ON changeset_jobs.patch_id = patches.id ",
        "AND changeset_jobs.campaign_id = campaigns.id ",
        "WHERE campaigns.id = $1 ",
        "HAVING COUNT(*) FILTER (WHERE changeset_jobs.created_at IS NULL) = 0",
    ))
    .bind::<Int8, _>(campaign_id.into_inner())
    .get_result::<LatestCreatedAt>(conn)
    .optional()
    .map_err(StoreError::persistence)?;
    Ok(row.and_then(|found| found.latest))
}

/// Which jobs of a campaign a reset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResetScope {
    All,
    Failed,
}

/// Clears progress of a campaign's jobs so they can be claimed again.
pub(super) fn reset(
    conn: &mut PgConnection,
    campaign_id: CampaignId,
    scope: ResetScope,
    now: DateTime<Utc>,
) -> StoreResult<u64> {
    let of_campaign = changeset_jobs::table
        .filter(changeset_jobs::campaign_id.eq(campaign_id.into_inner()));
    let cleared = (
        changeset_jobs::error.eq(None::<String>),
        changeset_jobs::started_at.eq(None::<DateTime<Utc>>),
        changeset_jobs::finished_at.eq(None::<DateTime<Utc>>),
        changeset_jobs::updated_at.eq(now),
    );
    let updated = match scope {
        ResetScope::All => diesel::update(of_campaign).set(cleared).execute(conn),
        ResetScope::Failed => diesel::update(of_campaign.filter(changeset_jobs::error.ne("")))
            .set(cleared)
            .execute(conn),
    }
    .map_err(StoreError::persistence)?;
    u64::try_from(updated).map_err(StoreError::persistence)
}
