//! Changeset event reads. Writes go through the batch engine.

use super::{
    models::{ChangesetEventRow, row_to_changeset_event},
    schema::changeset_events,
};
use crate::campaign::{
    domain::ChangesetEvent,
    ports::{
        ChangesetEventFilter, GetChangesetEventOpts, Page, PageRequest, StoreError, StoreResult,
    },
};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;

pub(super) fn get(
    conn: &mut PgConnection,
    opts: &GetChangesetEventOpts,
) -> StoreResult<ChangesetEvent> {
    let mut query = changeset_events::table
        .select(ChangesetEventRow::as_select())
        .order(changeset_events::id.asc())
        .into_boxed();
    if let Some(id) = opts.id {
        query = query.filter(changeset_events::id.eq(id.into_inner()));
    }
    if let Some(key) = &opts.key {
        query = query
            .filter(changeset_events::changeset_id.eq(key.changeset_id.into_inner()))
            .filter(changeset_events::kind.eq(key.kind.as_str()))
            .filter(changeset_events::key.eq(key.key.clone()));
    }
    let row = query
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .ok_or(StoreError::NotFound)?;
    row_to_changeset_event(row)
}

fn filtered<'a>(filter: &ChangesetEventFilter) -> changeset_events::BoxedQuery<'a, Pg> {
    let mut query = changeset_events::table.into_boxed();
    if !filter.changeset_ids.is_empty() {
        let ids: Vec<i64> = filter
            .changeset_ids
            .iter()
            .map(|id| id.into_inner())
            .collect();
        query = query.filter(changeset_events::changeset_id.eq_any(ids));
    }
    query
}

pub(super) fn list(
    conn: &mut PgConnection,
    filter: &ChangesetEventFilter,
    page: PageRequest,
) -> StoreResult<Page<ChangesetEvent>> {
    let mut query = filtered(filter)
        .filter(changeset_events::id.ge(page.cursor))
        .order(changeset_events::id.asc())
        .select(ChangesetEventRow::as_select());
    if let Some(fetch) = page.fetch_limit() {
        query = query.limit(fetch);
    }
    let rows = query.load(conn).map_err(StoreError::persistence)?;
    let items = rows
        .into_iter()
        .map(row_to_changeset_event)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(Page::from_overfetch(items, page, |event: &ChangesetEvent| {
        event.id.into_inner()
    }))
}

pub(super) fn count(conn: &mut PgConnection, filter: &ChangesetEventFilter) -> StoreResult<i64> {
    filtered(filter)
        .count()
        .get_result(conn)
        .map_err(StoreError::persistence)
}
