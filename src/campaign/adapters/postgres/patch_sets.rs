//! Patch set persistence and expiry.

use super::{
    models::{PatchSetChanges, PatchSetRow, row_to_patch_set},
    schema::patch_sets,
};
use crate::campaign::{
    domain::{PatchSet, PatchSetId},
    ports::{Page, PageRequest, StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Timestamptz;

pub(super) fn insert(conn: &mut PgConnection, changes: &PatchSetChanges) -> StoreResult<PatchSet> {
    diesel::insert_into(patch_sets::table)
        .values(changes)
        .returning(PatchSetRow::as_returning())
        .get_result(conn)
        .map(row_to_patch_set)
        .map_err(StoreError::persistence)
}

pub(super) fn update(
    conn: &mut PgConnection,
    id: PatchSetId,
    changes: &PatchSetChanges,
) -> StoreResult<PatchSet> {
    diesel::update(patch_sets::table.find(id.into_inner()))
        .set(changes)
        .returning(PatchSetRow::as_returning())
        .get_result(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .map(row_to_patch_set)
        .ok_or(StoreError::NotFound)
}

pub(super) fn delete(conn: &mut PgConnection, id: PatchSetId) -> StoreResult<()> {
    let deleted = diesel::delete(patch_sets::table.find(id.into_inner()))
        .execute(conn)
        .map_err(StoreError::persistence)?;
    if deleted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Deletes patch sets created before `cutoff` that no campaign references.
pub(super) fn delete_created_before(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> StoreResult<u64> {
    let deleted = diesel::sql_query(concat!(
        "DELETE FROM patch_sets WHERE created_at < $1 ",
        "AND NOT EXISTS (SELECT 1 FROM campaigns WHERE campaigns.patch_set_id = patch_sets.id)",
    ))
    .bind::<Timestamptz, _>(cutoff)
    .execute(conn)
    .map_err(StoreError::persistence)?;
    u64::try_from(deleted).map_err(StoreError::persistence)
}

pub(super) fn get(conn: &mut PgConnection, id: PatchSetId) -> StoreResult<PatchSet> {
    patch_sets::table
        .find(id.into_inner())
        .select(PatchSetRow::as_select())
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .map(row_to_patch_set)
        .ok_or(StoreError::NotFound)
}

pub(super) fn list(conn: &mut PgConnection, page: PageRequest) -> StoreResult<Page<PatchSet>> {
    let mut query = patch_sets::table
        .filter(patch_sets::id.ge(page.cursor))
        .order(patch_sets::id.asc())
        .select(PatchSetRow::as_select())
        .into_boxed();
    if let Some(fetch) = page.fetch_limit() {
        query = query.limit(fetch);
    }
    let rows = query.load(conn).map_err(StoreError::persistence)?;
    let items = rows.into_iter().map(row_to_patch_set).collect();
    Ok(Page::from_overfetch(items, page, |patch_set: &PatchSet| {
        patch_set.id.into_inner()
    }))
}

pub(super) fn count(conn: &mut PgConnection) -> StoreResult<i64> {
    patch_sets::table
        .count()
        .get_result(conn)
        .map_err(StoreError::persistence)
}
