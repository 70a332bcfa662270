//! Changeset reads and deletes. Writes go through the batch engine.

use super::{
    models::{ChangesetRow, row_to_changeset},
    schema::changesets,
};
use crate::campaign::{
    domain::{Changeset, ChangesetId, ChangesetSyncData},
    ports::{
        ChangesetFilter, ChangesetHeadRefs, GetChangesetOpts, Page, PageRequest, StoreError,
        StoreResult,
    },
};
use chrono::{DateTime, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::{Int8, Nullable, Timestamptz};

pub(super) fn delete(conn: &mut PgConnection, id: ChangesetId) -> StoreResult<()> {
    let deleted = diesel::delete(changesets::table.find(id.into_inner()))
        .execute(conn)
        .map_err(StoreError::persistence)?;
    if deleted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub(super) fn get(conn: &mut PgConnection, opts: &GetChangesetOpts) -> StoreResult<Changeset> {
    let mut query = changesets::table
        .select(ChangesetRow::as_select())
        .order(changesets::id.asc())
        .into_boxed();
    if let Some(id) = opts.id {
        query = query.filter(changesets::id.eq(id.into_inner()));
    }
    if let Some(repo_id) = opts.repo_id {
        query = query.filter(changesets::repo_id.eq(repo_id.into_inner()));
    }
    if let Some(external) = &opts.external {
        query = query
            .filter(changesets::external_id.eq(external.external_id.clone()))
            .filter(changesets::external_service_type.eq(external.service_type.as_str()));
    }
    let row = query
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .ok_or(StoreError::NotFound)?;
    row_to_changeset(row)
}

fn filtered<'a>(filter: &ChangesetFilter) -> changesets::BoxedQuery<'a, Pg> {
    let mut query = changesets::table.into_boxed();
    if let Some(campaign_id) = filter.campaign_id {
        query = query.filter(changesets::campaign_ids.has_key(campaign_id.to_string()));
    }
    if !filter.ids.is_empty() {
        let ids: Vec<i64> = filter.ids.iter().map(|id| id.into_inner()).collect();
        query = query.filter(changesets::id.eq_any(ids));
    }
    if filter.without_deleted {
        query = query.filter(changesets::external_deleted_at.is_null());
    }
    if let Some(state) = filter.external_state {
        query = query.filter(changesets::external_state.eq(state.as_str()));
    }
    if let Some(state) = filter.external_review_state {
        query = query.filter(changesets::external_review_state.eq(state.as_str()));
    }
    if let Some(state) = filter.external_check_state {
        query = query.filter(changesets::external_check_state.eq(state.as_str()));
    }
    query
}

pub(super) fn list(
    conn: &mut PgConnection,
    filter: &ChangesetFilter,
    page: PageRequest,
) -> StoreResult<Page<Changeset>> {
    let mut query = filtered(filter)
        .filter(changesets::id.ge(page.cursor))
        .order(changesets::id.asc())
        .select(ChangesetRow::as_select());
    if let Some(fetch) = page.fetch_limit() {
        query = query.limit(fetch);
    }
    let rows = query.load(conn).map_err(StoreError::persistence)?;
    let items = rows
        .into_iter()
        .map(row_to_changeset)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(Page::from_overfetch(items, page, |changeset: &Changeset| {
        changeset.id.into_inner()
    }))
}

pub(super) fn count(conn: &mut PgConnection, filter: &ChangesetFilter) -> StoreResult<i64> {
    filtered(filter)
        .count()
        .get_result(conn)
        .map_err(StoreError::persistence)
}

#[derive(QueryableByName)]
struct SyncDataRow {
    #[diesel(sql_type = Int8)]
    id: i64,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    latest_event: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    external_updated_at: Option<DateTime<Utc>>,
}

pub(super) fn sync_data(conn: &mut PgConnection) -> StoreResult<Vec<ChangesetSyncData>> {
    let rows = diesel::sql_query(concat!(
        "SELECT changesets.id, changesets.updated_at, ",
        "MAX(changeset_events.updated_at) AS latest_event, changesets.external_updated_at ",
        "FROM changesets ",
        "LEFT JOIN changeset_events ON changeset_events.changeset_id = changesets.id ",
        "GROUP BY changesets.id ",
        "ORDER BY changesets.id ASC",
    ))
    .load::<SyncDataRow>(conn)
    .map_err(StoreError::persistence)?;

    Ok(rows
        .into_iter()
        .map(|row| ChangesetSyncData {
            changeset_id: ChangesetId::new(row.id),
            updated_at: row.updated_at,
            latest_event: row.latest_event,
            external_updated_at: row.external_updated_at,
        })
        .collect())
}

pub(super) fn external_ids(
    conn: &mut PgConnection,
    head_refs: &ChangesetHeadRefs,
) -> StoreResult<Vec<String>> {
    let branches: Vec<&str> = head_refs.branches().collect();
    if branches.is_empty() {
        return Ok(Vec::new());
    }
    changesets::table
        .filter(changesets::repo_id.eq(head_refs.repo_id.into_inner()))
        .filter(changesets::external_service_type.eq(head_refs.service_type.as_str()))
        .filter(changesets::external_branch.eq_any(branches))
        .order(changesets::id.asc())
        .select(changesets::external_id)
        .load(conn)
        .map_err(StoreError::persistence)
}
