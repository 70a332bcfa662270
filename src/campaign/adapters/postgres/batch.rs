//! Set-based writes for changesets and changeset events.
//!
//! A batch is serialised into one JSONB array and expanded server-side with
//! `jsonb_to_recordset ... WITH ORDINALITY`, so a single statement writes
//! every record and the ordinality column maps result rows back to input
//! positions.

use super::{
    models::{
        ChangesetEventRow, ChangesetRow, encode_id_set, row_to_changeset, row_to_changeset_event,
    },
    schema::changesets,
};
use crate::campaign::{
    domain::{Changeset, ChangesetEvent},
    ports::{StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Int8, Jsonb};
use serde::Serialize;
use serde_json::Value;

macro_rules! changeset_batch_cte {
    () => {
        concat!(
            "WITH batch AS (",
            "SELECT * FROM ROWS FROM (jsonb_to_recordset($1) AS (",
            "id bigint, repo_id integer, created_at timestamptz, updated_at timestamptz, ",
            "metadata jsonb, campaign_ids jsonb, external_id text, external_service_type text, ",
            "external_branch text, external_deleted_at timestamptz, ",
            "external_updated_at timestamptz, external_state text, ",
            "external_review_state text, external_check_state text",
            ")) WITH ORDINALITY",
            ")",
        )
    };
}

const UPSERT_CHANGESETS: &str = concat!(
    changeset_batch_cte!(),
    ", changed AS (",
    "INSERT INTO changesets (repo_id, created_at, updated_at, metadata, campaign_ids, ",
    "external_id, external_service_type, external_branch, external_deleted_at, ",
    "external_updated_at, external_state, external_review_state, external_check_state) ",
    "SELECT repo_id, created_at, updated_at, metadata, campaign_ids, ",
    "external_id, external_service_type, external_branch, external_deleted_at, ",
    "external_updated_at, external_state, external_review_state, external_check_state ",
    "FROM batch ORDER BY ordinality ",
    "ON CONFLICT ON CONSTRAINT changesets_repo_external_id_unique DO NOTHING ",
    "RETURNING changesets.*",
    ") ",
    "SELECT batch.ordinality, ",
    "COALESCE(changed.id, existing.id) AS id, ",
    "COALESCE(changed.repo_id, existing.repo_id) AS repo_id, ",
    "COALESCE(changed.created_at, existing.created_at) AS created_at, ",
    "COALESCE(changed.updated_at, existing.updated_at) AS updated_at, ",
    "COALESCE(changed.metadata, existing.metadata) AS metadata, ",
    "COALESCE(changed.campaign_ids, existing.campaign_ids) AS campaign_ids, ",
    "COALESCE(changed.external_id, existing.external_id) AS external_id, ",
    "COALESCE(changed.external_service_type, existing.external_service_type) ",
    "AS external_service_type, ",
    "COALESCE(changed.external_branch, existing.external_branch) AS external_branch, ",
    "COALESCE(changed.external_deleted_at, existing.external_deleted_at) ",
    "AS external_deleted_at, ",
    "COALESCE(changed.external_updated_at, existing.external_updated_at) ",
    "AS external_updated_at, ",
    "COALESCE(changed.external_state, existing.external_state) AS external_state, ",
    "COALESCE(changed.external_review_state, existing.external_review_state) ",
    "AS external_review_state, ",
    "COALESCE(changed.external_check_state, existing.external_check_state) ",
    "AS external_check_state ",
    "FROM changed ",
    "RIGHT JOIN batch ON batch.repo_id = changed.repo_id ",
    "AND batch.external_id = changed.external_id ",
    "LEFT JOIN changesets existing ON existing.repo_id = batch.repo_id ",
    "AND existing.external_id = batch.external_id ",
    "WHERE COALESCE(changed.id, existing.id) IS NOT NULL ",
    "ORDER BY batch.ordinality",
);

const UPDATE_CHANGESETS: &str = concat!(
    changeset_batch_cte!(),
    ", changed AS (",
    "UPDATE changesets SET ",
    "repo_id = batch.repo_id, ",
    "created_at = batch.created_at, ",
    "updated_at = batch.updated_at, ",
    "metadata = batch.metadata, ",
    "campaign_ids = batch.campaign_ids, ",
    "external_id = batch.external_id, ",
    "external_service_type = batch.external_service_type, ",
    "external_branch = batch.external_branch, ",
    "external_deleted_at = batch.external_deleted_at, ",
    "external_updated_at = batch.external_updated_at, ",
    "external_state = batch.external_state, ",
    "external_review_state = batch.external_review_state, ",
    "external_check_state = batch.external_check_state ",
    "FROM batch WHERE changesets.id = batch.id ",
    "RETURNING changesets.*",
    ") ",
    "SELECT batch.ordinality, changed.* ",
    "FROM changed JOIN batch ON batch.id = changed.id ",
    "ORDER BY batch.ordinality",
);

const UPSERT_CHANGESET_EVENTS: &str = concat!(
    "WITH batch AS (",
    "SELECT * FROM ROWS FROM (jsonb_to_recordset($1) AS (",
    "changeset_id bigint, kind text, key text, created_at timestamptz, ",
    "updated_at timestamptz, metadata jsonb",
    ")) WITH ORDINALITY",
    "), changed AS (",
    "INSERT INTO changeset_events (changeset_id, kind, key, created_at, updated_at, metadata) ",
    "SELECT changeset_id, kind, key, created_at, updated_at, metadata ",
    "FROM batch ORDER BY ordinality ",
    "ON CONFLICT ON CONSTRAINT changeset_events_changeset_id_kind_key_unique ",
    "DO UPDATE SET metadata = excluded.metadata, updated_at = excluded.updated_at ",
    "RETURNING changeset_events.*",
    ") ",
    "SELECT batch.ordinality, changed.* ",
    "FROM changed JOIN batch ON batch.changeset_id = changed.changeset_id ",
    "AND batch.kind = changed.kind AND batch.key = changed.key ",
    "ORDER BY batch.ordinality",
);

#[derive(QueryableByName)]
struct OrderedChangesetRow {
    #[diesel(sql_type = Int8)]
    ordinality: i64,
    #[diesel(embed)]
    row: ChangesetRow,
}

#[derive(QueryableByName)]
struct OrderedChangesetEventRow {
    #[diesel(sql_type = Int8)]
    ordinality: i64,
    #[diesel(embed)]
    row: ChangesetEventRow,
}

/// A batch statement returned a different number of rows than records sent.
#[derive(Debug, thiserror::Error)]
#[error("batch returned {returned} rows for {expected} records")]
struct BatchRowMismatch {
    expected: usize,
    returned: usize,
}

#[derive(Serialize)]
struct ChangesetRecord<'a> {
    id: i64,
    repo_id: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: Value,
    campaign_ids: Value,
    external_id: &'a str,
    external_service_type: &'static str,
    external_branch: &'a str,
    external_deleted_at: Option<DateTime<Utc>>,
    external_updated_at: Option<DateTime<Utc>>,
    external_state: Option<&'static str>,
    external_review_state: Option<&'static str>,
    external_check_state: Option<&'static str>,
}

#[derive(Serialize)]
struct ChangesetEventRecord<'a> {
    changeset_id: i64,
    kind: &'static str,
    key: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: Value,
}

fn changeset_record(changeset: &Changeset) -> StoreResult<ChangesetRecord<'_>> {
    Ok(ChangesetRecord {
        id: changeset.id.into_inner(),
        repo_id: changeset.repo_id.into_inner(),
        created_at: changeset.created_at,
        updated_at: changeset.updated_at,
        metadata: changeset
            .metadata
            .encode()
            .map_err(StoreError::serialization)?,
        campaign_ids: encode_id_set(changeset.campaign_ids.iter().map(|id| id.into_inner())),
        external_id: &changeset.external_id,
        external_service_type: changeset.external_service_type().as_str(),
        external_branch: &changeset.external_branch,
        external_deleted_at: changeset.external_deleted_at,
        external_updated_at: changeset.external_updated_at,
        external_state: changeset.external_state.map(|state| state.as_str()),
        external_review_state: changeset.external_review_state.map(|state| state.as_str()),
        external_check_state: changeset.external_check_state.map(|state| state.as_str()),
    })
}

fn changeset_event_record(event: &ChangesetEvent) -> StoreResult<ChangesetEventRecord<'_>> {
    Ok(ChangesetEventRecord {
        changeset_id: event.changeset_id.into_inner(),
        kind: event.kind.as_str(),
        key: &event.key,
        created_at: event.created_at,
        updated_at: event.updated_at,
        metadata: event
            .metadata
            .encode(event.kind)
            .map_err(StoreError::serialization)?,
    })
}

/// Changesets encoded for one batch statement.
pub(super) struct ChangesetBatch {
    payload: Value,
    natural_keys: Vec<(i32, String)>,
}

impl ChangesetBatch {
    pub(super) fn encode(changesets: &[Changeset]) -> StoreResult<Self> {
        let records = changesets
            .iter()
            .map(changeset_record)
            .collect::<StoreResult<Vec<_>>>()?;
        let payload = serde_json::to_value(records).map_err(StoreError::serialization)?;
        let natural_keys = changesets
            .iter()
            .map(|changeset| (changeset.repo_id.into_inner(), changeset.external_id.clone()))
            .collect();
        Ok(Self {
            payload,
            natural_keys,
        })
    }
}

/// A changeset as stored after an upsert.
pub(super) struct UpsertedChangeset {
    pub(super) changeset: Changeset,
    /// Another transaction inserted the row while this batch ran.
    pub(super) raced: bool,
}

/// Places rows tagged with their 1-based ordinality at their input position.
fn in_input_order<T>(
    rows: impl IntoIterator<Item = (i64, T)>,
    len: usize,
) -> StoreResult<Vec<Option<T>>> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(len).collect();
    for (ordinality, value) in rows {
        let index =
            usize::try_from(ordinality.saturating_sub(1)).map_err(StoreError::persistence)?;
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(value);
        }
    }
    Ok(slots)
}

/// Inserts the batch, keeping existing rows untouched, and returns the
/// stored row for every record in input order.
pub(super) fn upsert_changesets(
    conn: &mut PgConnection,
    batch: &ChangesetBatch,
) -> StoreResult<Vec<UpsertedChangeset>> {
    let rows = diesel::sql_query(UPSERT_CHANGESETS)
        .bind::<Jsonb, _>(batch.payload.clone())
        .load::<OrderedChangesetRow>(conn)
        .map_err(StoreError::persistence)?;

    let stored = rows
        .into_iter()
        .map(|ordered| -> StoreResult<(i64, Changeset)> {
            Ok((ordered.ordinality, row_to_changeset(ordered.row)?))
        })
        .collect::<StoreResult<Vec<_>>>()?;
    let slots = in_input_order(stored, batch.natural_keys.len())?;

    slots
        .into_iter()
        .zip(&batch.natural_keys)
        .map(|(slot, (repo_id, external_id))| match slot {
            Some(changeset) => Ok(UpsertedChangeset {
                changeset,
                raced: false,
            }),
            None => {
                tracing::debug!(
                    repo_id = *repo_id,
                    external_id = %external_id,
                    "changeset inserted concurrently; reading it back"
                );
                find_by_natural_key(conn, *repo_id, external_id).map(|changeset| {
                    UpsertedChangeset {
                        changeset,
                        raced: true,
                    }
                })
            }
        })
        .collect()
}

fn find_by_natural_key(
    conn: &mut PgConnection,
    repo_id: i32,
    external_id: &str,
) -> StoreResult<Changeset> {
    let row = changesets::table
        .filter(changesets::repo_id.eq(repo_id))
        .filter(changesets::external_id.eq(external_id))
        .select(ChangesetRow::as_select())
        .first(conn)
        .optional()
        .map_err(StoreError::persistence)?
        .ok_or(StoreError::NotFound)?;
    row_to_changeset(row)
}

/// Overwrites stored changesets by id and returns them in input order.
///
/// Fails with [`StoreError::NotFound`] when any record has no stored row;
/// callers run this inside a savepoint so nothing is written in that case.
pub(super) fn update_changesets(
    conn: &mut PgConnection,
    batch: &ChangesetBatch,
) -> StoreResult<Vec<Changeset>> {
    let rows = diesel::sql_query(UPDATE_CHANGESETS)
        .bind::<Jsonb, _>(batch.payload.clone())
        .load::<OrderedChangesetRow>(conn)
        .map_err(StoreError::persistence)?;
    let stored = rows
        .into_iter()
        .map(|ordered| -> StoreResult<(i64, Changeset)> {
            Ok((ordered.ordinality, row_to_changeset(ordered.row)?))
        })
        .collect::<StoreResult<Vec<_>>>()?;
    in_input_order(stored, batch.natural_keys.len())?
        .into_iter()
        .map(|slot| slot.ok_or(StoreError::NotFound))
        .collect()
}

/// Encodes events for [`upsert_changeset_events`].
pub(super) fn encode_events(events: &[ChangesetEvent]) -> StoreResult<Value> {
    let records = events
        .iter()
        .map(changeset_event_record)
        .collect::<StoreResult<Vec<_>>>()?;
    serde_json::to_value(records).map_err(StoreError::serialization)
}

/// Inserts or merges events and returns the stored rows in input order.
pub(super) fn upsert_changeset_events(
    conn: &mut PgConnection,
    payload: Value,
    expected: usize,
) -> StoreResult<Vec<ChangesetEvent>> {
    let rows = diesel::sql_query(UPSERT_CHANGESET_EVENTS)
        .bind::<Jsonb, _>(payload)
        .load::<OrderedChangesetEventRow>(conn)
        .map_err(StoreError::persistence)?;
    let returned = rows.len();
    let stored = rows
        .into_iter()
        .map(|ordered| -> StoreResult<(i64, ChangesetEvent)> {
            Ok((ordered.ordinality, row_to_changeset_event(ordered.row)?))
        })
        .collect::<StoreResult<Vec<_>>>()?;
    in_input_order(stored, expected)?
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| StoreError::persistence(BatchRowMismatch { expected, returned }))
        })
        .collect()
}
