//! Campaign persistence.

use super::{
    models::{CampaignChanges, CampaignRow, row_to_campaign},
    schema::campaigns,
};
use crate::campaign::{
    domain::{Campaign, CampaignId, CampaignState},
    ports::{CampaignFilter, GetCampaignOpts, Page, PageRequest, StoreError, StoreResult},
};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;

pub(super) fn insert(conn: &mut PgConnection, changes: &CampaignChanges) -> StoreResult<Campaign> {
    let row = diesel::insert_into(campaigns::table)
        .values(changes)
        .returning(CampaignRow::as_returning())
        .get_result(conn)
        .map_err(StoreError::persistence)?;
    row_to_campaign(row)
}

pub(super) fn update(
    conn: &mut PgConnection,
    id: CampaignId,
    changes: &CampaignChanges,
) -> StoreResult<Campaign> {
    let row = diesel::update(campaigns::table.find(id.into_inner()))
        .set(changes)
        .returning(CampaignRow::as_returning())
        .get_result(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .ok_or(StoreError::NotFound)?;
    row_to_campaign(row)
}

pub(super) fn delete(conn: &mut PgConnection, id: CampaignId) -> StoreResult<()> {
    let deleted = diesel::delete(campaigns::table.find(id.into_inner()))
        .execute(conn)
        .map_err(StoreError::persistence)?;
    if deleted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub(super) fn get(conn: &mut PgConnection, opts: GetCampaignOpts) -> StoreResult<Campaign> {
    let mut query = campaigns::table
        .select(CampaignRow::as_select())
        .order(campaigns::id.asc())
        .into_boxed();
    if let Some(id) = opts.id {
        query = query.filter(campaigns::id.eq(id.into_inner()));
    }
    if let Some(patch_set_id) = opts.patch_set_id {
        query = query.filter(campaigns::patch_set_id.eq(patch_set_id.into_inner()));
    }
    let row = query
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .ok_or(StoreError::NotFound)?;
    row_to_campaign(row)
}

fn filtered<'a>(filter: &CampaignFilter) -> campaigns::BoxedQuery<'a, Pg> {
    let mut query = campaigns::table.into_boxed();
    if let Some(changeset_id) = filter.changeset_id {
        query = query.filter(campaigns::changeset_ids.has_key(changeset_id.to_string()));
    }
    match filter.state {
        CampaignState::Any => {}
        CampaignState::Open => query = query.filter(campaigns::closed_at.is_null()),
        CampaignState::Closed => query = query.filter(campaigns::closed_at.is_not_null()),
    }
    match filter.has_patch_set {
        None => {}
        Some(true) => query = query.filter(campaigns::patch_set_id.is_not_null()),
        Some(false) => query = query.filter(campaigns::patch_set_id.is_null()),
    }
    query
}

pub(super) fn list(
    conn: &mut PgConnection,
    filter: &CampaignFilter,
    page: PageRequest,
) -> StoreResult<Page<Campaign>> {
    let mut query = filtered(filter)
        .filter(campaigns::id.ge(page.cursor))
        .order(campaigns::id.asc())
        .select(CampaignRow::as_select());
    if let Some(fetch) = page.fetch_limit() {
        query = query.limit(fetch);
    }
    let rows = query.load(conn).map_err(StoreError::persistence)?;
    let items = rows
        .into_iter()
        .map(row_to_campaign)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(Page::from_overfetch(items, page, |campaign| {
        campaign.id.into_inner()
    }))
}

pub(super) fn count(conn: &mut PgConnection, filter: &CampaignFilter) -> StoreResult<i64> {
    filtered(filter)
        .count()
        .get_result(conn)
        .map_err(StoreError::persistence)
}
