//! Patch persistence.

use super::{
    models::{PatchChanges, PatchRow, row_to_patch},
    schema::{changeset_jobs, patches},
};
use crate::campaign::{
    domain::{Patch, PatchId},
    ports::{Page, PageRequest, PatchFilter, StoreError, StoreResult},
};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;

pub(super) fn insert(conn: &mut PgConnection, changes: &PatchChanges) -> StoreResult<Patch> {
    diesel::insert_into(patches::table)
        .values(changes)
        .returning(PatchRow::as_returning())
        .get_result(conn)
        .map(row_to_patch)
        .map_err(StoreError::persistence)
}

pub(super) fn update(
    conn: &mut PgConnection,
    id: PatchId,
    changes: &PatchChanges,
) -> StoreResult<Patch> {
    diesel::update(patches::table.find(id.into_inner()))
        .set(changes)
        .returning(PatchRow::as_returning())
        .get_result(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .map(row_to_patch)
        .ok_or(StoreError::NotFound)
}

pub(super) fn delete(conn: &mut PgConnection, id: PatchId) -> StoreResult<()> {
    let deleted = diesel::delete(patches::table.find(id.into_inner()))
        .execute(conn)
        .map_err(StoreError::persistence)?;
    if deleted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub(super) fn get(conn: &mut PgConnection, id: PatchId) -> StoreResult<Patch> {
    patches::table
        .find(id.into_inner())
        .select(PatchRow::as_select())
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .map(row_to_patch)
        .ok_or(StoreError::NotFound)
}

fn filtered<'a>(filter: PatchFilter) -> patches::BoxedQuery<'a, Pg> {
    let mut query = patches::table.into_boxed();
    if let Some(patch_set_id) = filter.patch_set_id {
        query = query.filter(patches::patch_set_id.eq(patch_set_id.into_inner()));
    }
    if filter.only_with_diff {
        query = query.filter(patches::diff.ne(""));
    }
    if let Some(campaign_id) = filter.only_unpublished_in_campaign {
        // Published means a job of this campaign already produced a changeset.
        let published = changeset_jobs::table
            .select(changeset_jobs::patch_id)
            .filter(changeset_jobs::campaign_id.eq(campaign_id.into_inner()))
            .filter(changeset_jobs::changeset_id.is_not_null());
        query = query.filter(patches::id.ne_all(published));
    }
    query
}

pub(super) fn list(
    conn: &mut PgConnection,
    filter: PatchFilter,
    page: PageRequest,
) -> StoreResult<Page<Patch>> {
    let mut query = filtered(filter)
        .filter(patches::id.ge(page.cursor))
        .order(patches::id.asc())
        .select(PatchRow::as_select());
    if let Some(fetch) = page.fetch_limit() {
        query = query.limit(fetch);
    }
    let rows = query.load(conn).map_err(StoreError::persistence)?;
    let items = rows.into_iter().map(row_to_patch).collect();
    Ok(Page::from_overfetch(items, page, |patch: &Patch| {
        patch.id.into_inner()
    }))
}

pub(super) fn count(conn: &mut PgConnection, filter: PatchFilter) -> StoreResult<i64> {
    filtered(filter)
        .count()
        .get_result(conn)
        .map_err(StoreError::persistence)
}
