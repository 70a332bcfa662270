//! Batch upsert bookkeeping shared by both store adapters.

use crate::campaign::{
    domain::{Changeset, ChangesetEvent, is_unset, stamp_creation, to_stored_precision},
    ports::{StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Stamps every record of a changeset batch before it is written.
///
/// The `created_at` each record carries afterwards is the sentinel used to
/// tell freshly inserted rows from pre-existing ones.
pub(super) fn stamp_changesets(
    changesets: &mut [Changeset],
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    changesets
        .iter_mut()
        .map(|changeset| {
            changeset.created_at = to_stored_precision(changeset.created_at);
            changeset.updated_at = to_stored_precision(changeset.updated_at);
            stamp_creation(&mut changeset.created_at, &mut changeset.updated_at, now);
            changeset.created_at
        })
        .collect()
}

/// Overwrites each record with its stored row.
///
/// A stored row whose `created_at` differs from the record's sentinel, or
/// that had to be re-read after a concurrent insert, pre-existed; those ids
/// are reported through [`StoreError::AlreadyExists`].
pub(super) fn write_back_changesets(
    records: &mut [Changeset],
    sentinels: Vec<DateTime<Utc>>,
    stored: impl IntoIterator<Item = (Changeset, bool)>,
) -> StoreResult<()> {
    let mut existing = Vec::new();
    for ((record, sentinel), (changeset, raced)) in records.iter_mut().zip(sentinels).zip(stored) {
        *record = changeset;
        if raced || record.created_at != sentinel {
            existing.push(record.id);
        }
    }
    if existing.is_empty() {
        return Ok(());
    }
    tracing::debug!(count = existing.len(), "upsert merged existing changesets");
    Err(StoreError::AlreadyExists {
        changeset_ids: existing,
    })
}

/// Rejects a batch that repeats an event's natural key.
pub(super) fn reject_duplicate_event_keys(events: &[ChangesetEvent]) -> StoreResult<()> {
    let mut seen = HashSet::with_capacity(events.len());
    for event in events {
        let key = event.natural_key();
        if !seen.insert(key.clone()) {
            return Err(StoreError::DuplicateEventKey(key));
        }
    }
    Ok(())
}

/// Returns copies of `events` ready to write: an unset `created_at` becomes
/// `now`, and `updated_at` moves to `now` unless it is already later than
/// `created_at`.
pub(super) fn stamp_events(events: &[ChangesetEvent], now: DateTime<Utc>) -> Vec<ChangesetEvent> {
    events
        .iter()
        .cloned()
        .map(|mut event| {
            if is_unset(event.created_at) {
                event.created_at = now;
            }
            if event.updated_at <= event.created_at {
                event.updated_at = now;
            }
            event
        })
        .collect()
}
