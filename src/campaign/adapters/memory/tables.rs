//! Row storage for the in-memory store.
//!
//! Every write goes through a [`Writer`], which enforces the same keys and
//! cascades as the relational schema and records the prior value of each
//! row it touches. Replaying that undo log backwards restores the tables,
//! which is how failed statements and rolled-back transactions are undone.

use crate::campaign::{
    domain::{
        AdvisoryLockKey, Campaign, CampaignId, Changeset, ChangesetEvent, ChangesetEventId,
        ChangesetId, ChangesetJob, ChangesetJobId, Patch, PatchId, PatchSet, PatchSetId,
    },
    ports::{StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A write the relational schema would reject.
#[derive(Debug, Error)]
#[error("constraint {0} violated")]
pub(super) struct ConstraintViolation(&'static str);

fn violation(constraint: &'static str) -> StoreError {
    StoreError::persistence(ConstraintViolation(constraint))
}

/// Identifier sequences. Like database sequences they never roll back.
#[derive(Debug, Default)]
struct Sequences {
    campaigns: i64,
    patch_sets: i64,
    patches: i64,
    changesets: i64,
    changeset_events: i64,
    changeset_jobs: i64,
}

fn advance(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Shared state of an in-memory store and all of its transactions.
#[derive(Debug, Default)]
pub(super) struct Tables {
    pub(super) campaigns: BTreeMap<CampaignId, Campaign>,
    pub(super) patch_sets: BTreeMap<PatchSetId, PatchSet>,
    pub(super) patches: BTreeMap<PatchId, Patch>,
    pub(super) changesets: BTreeMap<ChangesetId, Changeset>,
    pub(super) changeset_events: BTreeMap<ChangesetEventId, ChangesetEvent>,
    pub(super) changeset_jobs: BTreeMap<ChangesetJobId, ChangesetJob>,
    sequences: Sequences,
    advisory_locks: HashMap<AdvisoryLockKey, u64>,
    transactions: u64,
}

impl Tables {
    /// Allocates the identifier of a new transaction.
    pub(super) fn open_transaction(&mut self) -> u64 {
        self.transactions += 1;
        self.transactions
    }

    /// Takes `key` for `transaction`. Re-acquiring a held lock succeeds.
    pub(super) fn try_lock(&mut self, key: AdvisoryLockKey, transaction: u64) -> bool {
        *self.advisory_locks.entry(key).or_insert(transaction) == transaction
    }

    /// Releases every advisory lock `transaction` holds.
    pub(super) fn release_locks(&mut self, transaction: u64) {
        self.advisory_locks.retain(|_, holder| *holder != transaction);
    }
}

/// Prior state of one row, captured before a write.
#[derive(Debug)]
pub(super) enum Undo {
    Campaign(CampaignId, Option<Campaign>),
    PatchSet(PatchSetId, Option<PatchSet>),
    Patch(PatchId, Option<Patch>),
    Changeset(ChangesetId, Option<Changeset>),
    ChangesetEvent(ChangesetEventId, Option<ChangesetEvent>),
    ChangesetJob(ChangesetJobId, Option<ChangesetJob>),
}

impl Undo {
    fn revert(self, tables: &mut Tables) {
        match self {
            Self::Campaign(id, prior) => restore(tables, id, prior),
            Self::PatchSet(id, prior) => restore(tables, id, prior),
            Self::Patch(id, prior) => restore(tables, id, prior),
            Self::Changeset(id, prior) => restore(tables, id, prior),
            Self::ChangesetEvent(id, prior) => restore(tables, id, prior),
            Self::ChangesetJob(id, prior) => restore(tables, id, prior),
        }
    }
}

/// Replays an undo log newest first.
pub(super) fn revert_all(tables: &mut Tables, log: Vec<Undo>) {
    for entry in log.into_iter().rev() {
        entry.revert(tables);
    }
}

fn restore<T: StoredRow>(tables: &mut Tables, id: T::Id, prior: Option<T>) {
    let table = T::table(tables);
    table.remove(&id);
    if let Some(row) = prior {
        table.insert(id, row);
    }
}

/// A row type with its own table.
pub(super) trait StoredRow: Clone {
    type Id: Copy + Ord;

    fn id(&self) -> Self::Id;
    fn table(tables: &mut Tables) -> &mut BTreeMap<Self::Id, Self>;
    fn undo(id: Self::Id, prior: Option<Self>) -> Undo;
}

macro_rules! stored_row {
    ($row:ty, $id:ty, $table:ident, $variant:ident) => {
        impl StoredRow for $row {
            type Id = $id;

            fn id(&self) -> $id {
                self.id
            }

            fn table(tables: &mut Tables) -> &mut BTreeMap<$id, Self> {
                &mut tables.$table
            }

            fn undo(id: $id, prior: Option<Self>) -> Undo {
                Undo::$variant(id, prior)
            }
        }
    };
}

stored_row!(Campaign, CampaignId, campaigns, Campaign);
stored_row!(PatchSet, PatchSetId, patch_sets, PatchSet);
stored_row!(Patch, PatchId, patches, Patch);
stored_row!(Changeset, ChangesetId, changesets, Changeset);
stored_row!(ChangesetEvent, ChangesetEventId, changeset_events, ChangesetEvent);
stored_row!(ChangesetJob, ChangesetJobId, changeset_jobs, ChangesetJob);

/// Which jobs of a campaign a reset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResetScope {
    All,
    Failed,
}

impl ResetScope {
    fn covers(self, job: &ChangesetJob) -> bool {
        match self {
            Self::All => true,
            Self::Failed => job.failure().is_some(),
        }
    }
}

/// Mutable access to the tables that logs every row it changes.
pub(super) struct Writer<'a> {
    tables: &'a mut Tables,
    log: &'a mut Vec<Undo>,
}

impl<'a> Writer<'a> {
    pub(super) const fn new(tables: &'a mut Tables, log: &'a mut Vec<Undo>) -> Self {
        Self { tables, log }
    }

    fn put<T: StoredRow>(&mut self, row: T) -> T {
        let id = row.id();
        let prior = T::table(self.tables).insert(id, row.clone());
        self.log.push(T::undo(id, prior));
        row
    }

    fn take<T: StoredRow>(&mut self, id: T::Id) -> Option<T> {
        let prior = T::table(self.tables).remove(&id)?;
        self.log.push(T::undo(id, Some(prior.clone())));
        Some(prior)
    }

    fn replace<T: StoredRow>(&mut self, row: T) -> StoreResult<T> {
        if !T::table(self.tables).contains_key(&row.id()) {
            return Err(StoreError::NotFound);
        }
        Ok(self.put(row))
    }

    fn remove<T: StoredRow>(&mut self, id: T::Id) -> StoreResult<T> {
        self.take(id).ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    fn check_campaign_refs(&self, campaign: &Campaign) -> StoreResult<()> {
        let dangling = campaign
            .patch_set_id
            .is_some_and(|id| !self.tables.patch_sets.contains_key(&id));
        if dangling {
            return Err(violation("campaigns_patch_set_id_fkey"));
        }
        Ok(())
    }

    pub(super) fn insert_campaign(&mut self, mut campaign: Campaign) -> StoreResult<Campaign> {
        self.check_campaign_refs(&campaign)?;
        campaign.id = CampaignId::new(advance(&mut self.tables.sequences.campaigns));
        Ok(self.put(campaign))
    }

    pub(super) fn update_campaign(&mut self, campaign: Campaign) -> StoreResult<Campaign> {
        self.check_campaign_refs(&campaign)?;
        self.replace(campaign)
    }

    pub(super) fn delete_campaign(&mut self, id: CampaignId) -> StoreResult<()> {
        self.remove::<Campaign>(id)?;
        self.delete_jobs_where(|job| job.campaign_id == id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Patch sets and patches
    // ------------------------------------------------------------------

    pub(super) fn insert_patch_set(&mut self, mut patch_set: PatchSet) -> PatchSet {
        patch_set.id = PatchSetId::new(advance(&mut self.tables.sequences.patch_sets));
        self.put(patch_set)
    }

    pub(super) fn update_patch_set(&mut self, patch_set: PatchSet) -> StoreResult<PatchSet> {
        self.replace(patch_set)
    }

    pub(super) fn delete_patch_set(&mut self, id: PatchSetId) -> StoreResult<()> {
        self.remove::<PatchSet>(id)?;
        let patches: Vec<PatchId> = self
            .tables
            .patches
            .values()
            .filter(|patch| patch.patch_set_id == id)
            .map(|patch| patch.id)
            .collect();
        for patch_id in patches {
            self.delete_patch(patch_id)?;
        }
        let detached: Vec<Campaign> = self
            .tables
            .campaigns
            .values()
            .filter(|campaign| campaign.patch_set_id == Some(id))
            .cloned()
            .collect();
        for mut campaign in detached {
            campaign.patch_set_id = None;
            self.put(campaign);
        }
        Ok(())
    }

    /// Deletes patch sets created before `cutoff` that no campaign references.
    pub(super) fn delete_patch_sets_created_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let expired: Vec<PatchSetId> = self
            .tables
            .patch_sets
            .values()
            .filter(|patch_set| patch_set.created_at < cutoff)
            .filter(|patch_set| {
                !self
                    .tables
                    .campaigns
                    .values()
                    .any(|campaign| campaign.patch_set_id == Some(patch_set.id))
            })
            .map(|patch_set| patch_set.id)
            .collect();
        for id in &expired {
            self.delete_patch_set(*id)?;
        }
        u64::try_from(expired.len()).map_err(StoreError::persistence)
    }

    fn check_patch_refs(&self, patch: &Patch) -> StoreResult<()> {
        if self.tables.patch_sets.contains_key(&patch.patch_set_id) {
            Ok(())
        } else {
            Err(violation("patches_patch_set_id_fkey"))
        }
    }

    pub(super) fn insert_patch(&mut self, mut patch: Patch) -> StoreResult<Patch> {
        self.check_patch_refs(&patch)?;
        patch.id = PatchId::new(advance(&mut self.tables.sequences.patches));
        Ok(self.put(patch))
    }

    pub(super) fn update_patch(&mut self, patch: Patch) -> StoreResult<Patch> {
        self.check_patch_refs(&patch)?;
        self.replace(patch)
    }

    pub(super) fn delete_patch(&mut self, id: PatchId) -> StoreResult<()> {
        self.remove::<Patch>(id)?;
        self.delete_jobs_where(|job| job.patch_id == id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Changesets and events
    // ------------------------------------------------------------------

    fn changeset_by_natural_key(&self, changeset: &Changeset) -> Option<&Changeset> {
        self.tables.changesets.values().find(|stored| {
            stored.repo_id == changeset.repo_id && stored.external_id == changeset.external_id
        })
    }

    /// Inserts each record unless a row with its natural key exists, and
    /// returns the stored row of every record in input order.
    pub(super) fn upsert_changesets(&mut self, records: &[Changeset]) -> Vec<Changeset> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            if let Some(existing) = self.changeset_by_natural_key(record) {
                stored.push(existing.clone());
                continue;
            }
            let mut fresh = record.clone();
            fresh.id = ChangesetId::new(advance(&mut self.tables.sequences.changesets));
            stored.push(self.put(fresh));
        }
        stored
    }

    pub(super) fn update_changesets(&mut self, records: &[Changeset]) -> StoreResult<Vec<Changeset>> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let conflicting = self
                .changeset_by_natural_key(record)
                .is_some_and(|existing| existing.id != record.id);
            if conflicting {
                return Err(violation("changesets_repo_external_id_unique"));
            }
            stored.push(self.replace(record.clone())?);
        }
        Ok(stored)
    }

    pub(super) fn delete_changeset(&mut self, id: ChangesetId) -> StoreResult<()> {
        self.remove::<Changeset>(id)?;
        let events: Vec<ChangesetEventId> = self
            .tables
            .changeset_events
            .values()
            .filter(|event| event.changeset_id == id)
            .map(|event| event.id)
            .collect();
        for event_id in events {
            self.take::<ChangesetEvent>(event_id);
        }
        let published: Vec<ChangesetJob> = self
            .tables
            .changeset_jobs
            .values()
            .filter(|job| job.changeset_id == Some(id))
            .cloned()
            .collect();
        for mut job in published {
            job.changeset_id = None;
            self.put(job);
        }
        Ok(())
    }

    /// Inserts events, or refreshes metadata and `updated_at` of the event
    /// already stored under the same natural key.
    pub(super) fn upsert_changeset_events(
        &mut self,
        records: &[ChangesetEvent],
    ) -> StoreResult<Vec<ChangesetEvent>> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            if !self.tables.changesets.contains_key(&record.changeset_id) {
                return Err(violation("changeset_events_changeset_id_fkey"));
            }
            let existing = self
                .tables
                .changeset_events
                .values()
                .find(|event| {
                    event.changeset_id == record.changeset_id
                        && event.kind == record.kind
                        && event.key == record.key
                })
                .cloned();
            let row = existing.map_or_else(
                || {
                    let mut fresh = record.clone();
                    fresh.id =
                        ChangesetEventId::new(advance(&mut self.tables.sequences.changeset_events));
                    fresh
                },
                |mut event| {
                    event.metadata = record.metadata.clone();
                    event.updated_at = record.updated_at;
                    event
                },
            );
            stored.push(self.put(row));
        }
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Changeset jobs
    // ------------------------------------------------------------------

    fn check_job_refs(&self, job: &ChangesetJob) -> StoreResult<()> {
        if !self.tables.campaigns.contains_key(&job.campaign_id) {
            return Err(violation("changeset_jobs_campaign_id_fkey"));
        }
        if !self.tables.patches.contains_key(&job.patch_id) {
            return Err(violation("changeset_jobs_patch_id_fkey"));
        }
        if job
            .changeset_id
            .is_some_and(|id| !self.tables.changesets.contains_key(&id))
        {
            return Err(violation("changeset_jobs_changeset_id_fkey"));
        }
        let duplicate = self.tables.changeset_jobs.values().any(|stored| {
            stored.id != job.id
                && stored.campaign_id == job.campaign_id
                && stored.patch_id == job.patch_id
        });
        if duplicate {
            return Err(StoreError::DuplicateChangesetJob {
                campaign_id: job.campaign_id,
                patch_id: job.patch_id,
            });
        }
        Ok(())
    }

    pub(super) fn insert_job(&mut self, mut job: ChangesetJob) -> StoreResult<ChangesetJob> {
        job.id = ChangesetJobId::default();
        self.check_job_refs(&job)?;
        if self
            .tables
            .campaigns
            .get(&job.campaign_id)
            .is_some_and(Campaign::is_closed)
        {
            return Err(StoreError::CampaignClosed(job.campaign_id));
        }
        job.id = ChangesetJobId::new(advance(&mut self.tables.sequences.changeset_jobs));
        Ok(self.put(job))
    }

    pub(super) fn update_job(&mut self, job: ChangesetJob) -> StoreResult<ChangesetJob> {
        if !self.tables.changeset_jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound);
        }
        self.check_job_refs(&job)?;
        self.replace(job)
    }

    pub(super) fn delete_job(&mut self, id: ChangesetJobId) -> StoreResult<()> {
        self.remove::<ChangesetJob>(id).map(drop)
    }

    fn delete_jobs_where(&mut self, doomed: impl Fn(&ChangesetJob) -> bool) {
        let ids: Vec<ChangesetJobId> = self
            .tables
            .changeset_jobs
            .values()
            .filter(|job| doomed(job))
            .map(|job| job.id)
            .collect();
        for id in ids {
            self.take::<ChangesetJob>(id);
        }
    }

    /// Stamps the lowest-id pending job of a campaign with a patch set as
    /// started.
    pub(super) fn claim_pending(&mut self, now: DateTime<Utc>) -> Option<ChangesetJob> {
        let mut job = self
            .tables
            .changeset_jobs
            .values()
            .find(|job| {
                job.is_pending()
                    && self
                        .tables
                        .campaigns
                        .get(&job.campaign_id)
                        .is_some_and(Campaign::has_patch_set)
            })
            .cloned()?;
        job.started_at = Some(now);
        job.updated_at = now;
        Some(self.put(job))
    }

    /// Clears progress of a campaign's jobs, returning how many changed.
    pub(super) fn reset_jobs(
        &mut self,
        campaign_id: CampaignId,
        scope: ResetScope,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let selected: Vec<ChangesetJob> = self
            .tables
            .changeset_jobs
            .values()
            .filter(|job| job.campaign_id == campaign_id && scope.covers(job))
            .cloned()
            .collect();
        let count = selected.len();
        for mut job in selected {
            job.reset();
            job.updated_at = now;
            self.put(job);
        }
        u64::try_from(count).map_err(StoreError::persistence)
    }
}
