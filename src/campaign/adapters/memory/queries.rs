//! Read-side queries over the in-memory tables.

use super::tables::Tables;
use crate::campaign::{
    domain::{
        BackgroundProcessStatus, Campaign, CampaignId, Changeset, ChangesetEvent, ChangesetJob,
        ChangesetSyncData, Patch, PatchSet,
    },
    ports::{ChangesetJobFilter, Page, PageRequest, PatchFilter, StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Collects one page of rows passing `keep`, in ascending key order.
pub(super) fn paginate<K, T>(
    table: &BTreeMap<K, T>,
    page: PageRequest,
    id_of: impl Fn(&T) -> i64,
    keep: impl Fn(&T) -> bool,
) -> Page<T>
where
    T: Clone,
{
    let fetch = page
        .fetch_limit()
        .and_then(|limit| usize::try_from(limit).ok())
        .unwrap_or(usize::MAX);
    let rows = table
        .values()
        .filter(|row| id_of(row) >= page.cursor)
        .filter(|row| keep(row))
        .take(fetch)
        .cloned()
        .collect();
    Page::from_overfetch(rows, page, id_of)
}

/// Counts rows passing `keep`.
pub(super) fn count<K, T>(table: &BTreeMap<K, T>, keep: impl Fn(&T) -> bool) -> StoreResult<i64> {
    let matching = table.values().filter(|row| keep(row)).count();
    i64::try_from(matching).map_err(StoreError::persistence)
}

/// Returns the first row passing `keep`.
pub(super) fn first<K, T: Clone>(
    table: &BTreeMap<K, T>,
    keep: impl Fn(&T) -> bool,
) -> StoreResult<T> {
    table
        .values()
        .find(|row| keep(row))
        .cloned()
        .ok_or(StoreError::NotFound)
}

pub(super) const fn campaign_id(campaign: &Campaign) -> i64 {
    campaign.id.into_inner()
}

pub(super) const fn patch_set_id(patch_set: &PatchSet) -> i64 {
    patch_set.id.into_inner()
}

pub(super) const fn patch_id(patch: &Patch) -> i64 {
    patch.id.into_inner()
}

pub(super) const fn changeset_id(changeset: &Changeset) -> i64 {
    changeset.id.into_inner()
}

pub(super) const fn event_id(event: &ChangesetEvent) -> i64 {
    event.id.into_inner()
}

pub(super) const fn job_id(job: &ChangesetJob) -> i64 {
    job.id.into_inner()
}

/// Evaluates a patch filter, consulting jobs for the publication check.
pub(super) fn patch_matches(tables: &Tables, filter: PatchFilter, patch: &Patch) -> bool {
    filter.patch_set_id.is_none_or(|id| patch.patch_set_id == id)
        && (!filter.only_with_diff || patch.has_diff())
        && filter.only_unpublished_in_campaign.is_none_or(|campaign_id| {
            !tables.changeset_jobs.values().any(|job| {
                job.campaign_id == campaign_id
                    && job.patch_id == patch.id
                    && job.changeset_id.is_some()
            })
        })
}

/// Evaluates a job filter, consulting campaigns for the patch set check.
pub(super) fn job_matches(tables: &Tables, filter: ChangesetJobFilter, job: &ChangesetJob) -> bool {
    filter.campaign_id.is_none_or(|id| job.campaign_id == id)
        && filter.patch_set_id.is_none_or(|patch_set_id| {
            tables
                .campaigns
                .get(&job.campaign_id)
                .is_some_and(|campaign| campaign.patch_set_id == Some(patch_set_id))
        })
}

pub(super) fn sync_data(tables: &Tables) -> Vec<ChangesetSyncData> {
    tables
        .changesets
        .values()
        .map(|changeset| ChangesetSyncData {
            changeset_id: changeset.id,
            updated_at: changeset.updated_at,
            latest_event: tables
                .changeset_events
                .values()
                .filter(|event| event.changeset_id == changeset.id)
                .map(|event| event.updated_at)
                .max(),
            external_updated_at: changeset.external_updated_at,
        })
        .collect()
}

/// Newest job creation time of a campaign, or `None` while any patch of its
/// patch set still lacks a job.
pub(super) fn latest_job_created_at(
    tables: &Tables,
    campaign_id: CampaignId,
) -> Option<DateTime<Utc>> {
    let patch_set_id = tables.campaigns.get(&campaign_id)?.patch_set_id?;
    let mut latest = None;
    for patch in tables
        .patches
        .values()
        .filter(|patch| patch.patch_set_id == patch_set_id)
    {
        let created_at = tables
            .changeset_jobs
            .values()
            .find(|job| job.campaign_id == campaign_id && job.patch_id == patch.id)?
            .created_at;
        latest = latest.max(Some(created_at));
    }
    latest
}

pub(super) fn campaign_status(tables: &Tables, campaign_id: CampaignId) -> BackgroundProcessStatus {
    BackgroundProcessStatus::from_jobs(
        tables
            .changeset_jobs
            .values()
            .filter(|job| job.campaign_id == campaign_id),
    )
}
