//! In-memory implementation of [`CampaignStore`].
//!
//! Every handle shares one set of tables. Transactions keep an undo log and
//! replay it on rollback; their writes are visible to other handles before
//! commit.

use super::{
    queries,
    tables::{ResetScope, Tables, Undo, Writer, revert_all},
};
use crate::campaign::adapters::{
    DEFAULT_PATCH_SET_TTL,
    upsert::{reject_duplicate_event_keys, stamp_changesets, stamp_events, write_back_changesets},
};
use crate::campaign::{
    domain::{
        AdvisoryLockKey, BackgroundProcessStatus, Campaign, CampaignId, Changeset,
        ChangesetEvent, ChangesetId, ChangesetJob, ChangesetJobId, ChangesetSyncData, Patch,
        PatchId, PatchSet, PatchSetId, stamp_creation, stored_now,
    },
    ports::{
        CampaignFilter, CampaignStore, ChangesetEventFilter, ChangesetFilter, ChangesetHeadRefs,
        ChangesetJobFilter,
        GetCampaignOpts, GetChangesetEventOpts, GetChangesetJobOpts, GetChangesetOpts, Page,
        PageRequest, PatchFilter, StoreError, StoreResult,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::{Clock, DefaultClock};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

fn poisoned(err: impl fmt::Display) -> StoreError {
    StoreError::persistence(std::io::Error::other(err.to_string()))
}

#[derive(Debug)]
struct TransactionState {
    log: Vec<Undo>,
    open: bool,
}

/// One open transaction, shared by every clone of a transaction-bound store.
#[derive(Debug)]
struct TransactionCell {
    id: u64,
    tables: Arc<RwLock<Tables>>,
    state: Mutex<TransactionState>,
}

impl TransactionCell {
    fn new(id: u64, tables: Arc<RwLock<Tables>>) -> Self {
        Self {
            id,
            tables,
            state: Mutex::new(TransactionState {
                log: Vec::new(),
                open: true,
            }),
        }
    }

    fn lock_open(&self) -> StoreResult<MutexGuard<'_, TransactionState>> {
        let state = self.state.lock().map_err(poisoned)?;
        if state.open {
            Ok(state)
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    fn finish(&self, commit: bool) -> StoreResult<()> {
        let mut state = self.lock_open()?;
        state.open = false;
        let log = std::mem::take(&mut state.log);
        let mut tables = self.tables.write().map_err(poisoned)?;
        if !commit {
            revert_all(&mut tables, log);
        }
        tables.release_locks(self.id);
        Ok(())
    }
}

impl Drop for TransactionCell {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !state.open {
            return;
        }
        state.open = false;
        let log = std::mem::take(&mut state.log);
        let Ok(mut tables) = self.tables.write() else {
            tracing::warn!(
                transaction = self.id,
                "tables poisoned; abandoned transaction left in place"
            );
            return;
        };
        revert_all(&mut tables, log);
        tables.release_locks(self.id);
        tracing::warn!(
            transaction = self.id,
            "rolled back transaction dropped without finishing"
        );
    }
}

/// Thread-safe in-memory campaign store.
///
/// Mirrors the keys, cascades and transaction semantics of the relational
/// store closely enough to stand in for it in tests. Cloning is cheap and
/// clones share the same data.
#[derive(Clone)]
pub struct InMemoryCampaignStore {
    tables: Arc<RwLock<Tables>>,
    transaction: Option<Arc<TransactionCell>>,
    clock: Arc<dyn Clock + Send + Sync>,
    patch_set_ttl: TimeDelta,
}

impl fmt::Debug for InMemoryCampaignStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCampaignStore")
            .field("in_transaction", &self.transaction.is_some())
            .field("patch_set_ttl", &self.patch_set_ttl)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCampaignStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            transaction: None,
            clock: Arc::new(DefaultClock),
            patch_set_ttl: DEFAULT_PATCH_SET_TTL,
        }
    }

    /// Replaces the clock used for generated timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the age after which unattached patch sets expire.
    #[must_use]
    pub const fn with_patch_set_ttl(mut self, ttl: TimeDelta) -> Self {
        self.patch_set_ttl = ttl;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        stored_now(&*self.clock)
    }

    fn require_transaction(&self) -> StoreResult<&TransactionCell> {
        self.transaction
            .as_deref()
            .ok_or(StoreError::NotInTransaction)
    }

    fn read<T>(&self, op: impl FnOnce(&Tables) -> StoreResult<T>) -> StoreResult<T> {
        if let Some(cell) = &self.transaction {
            drop(cell.lock_open()?);
        }
        let tables = self.tables.read().map_err(poisoned)?;
        op(&tables)
    }

    /// Runs one statement. A failing statement leaves no trace; a
    /// successful one inside a transaction joins its undo log.
    fn write<T>(&self, op: impl FnOnce(&mut Writer<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self
            .transaction
            .as_ref()
            .map(|cell| cell.lock_open())
            .transpose()?;
        let mut tables = self.tables.write().map_err(poisoned)?;
        let mut log = Vec::new();
        let outcome = op(&mut Writer::new(&mut tables, &mut log));
        if outcome.is_err() {
            revert_all(&mut tables, log);
        } else if let Some(open) = state.as_mut() {
            open.log.append(&mut log);
        }
        outcome
    }

    fn reset_jobs(&self, campaign_id: CampaignId, scope: ResetScope) -> StoreResult<u64> {
        let now = self.now();
        let reset = self.write(|writer| writer.reset_jobs(campaign_id, scope, now))?;
        tracing::info!(campaign_id = %campaign_id, ?scope, reset, "reset changeset jobs");
        Ok(reset)
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn transact(&self) -> StoreResult<Self> {
        if self.transaction.is_some() {
            return Ok(self.clone());
        }
        let id = self.tables.write().map_err(poisoned)?.open_transaction();
        Ok(Self {
            tables: Arc::clone(&self.tables),
            transaction: Some(Arc::new(TransactionCell::new(
                id,
                Arc::clone(&self.tables),
            ))),
            clock: Arc::clone(&self.clock),
            patch_set_ttl: self.patch_set_ttl,
        })
    }

    async fn done<T: Send + 'static>(&self, outcome: StoreResult<T>) -> StoreResult<T> {
        let Some(cell) = &self.transaction else {
            return outcome;
        };
        let finished = cell.finish(outcome.is_ok());
        match (outcome, finished) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(commit_err)) => Err(commit_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(rollback_err)) => {
                tracing::warn!(error = %rollback_err, "rollback failed after error: {err}");
                Err(err)
            }
        }
    }

    async fn try_acquire_advisory_lock(&self, key: &str) -> StoreResult<bool> {
        let cell = self.require_transaction()?;
        let _open = cell.lock_open()?;
        let lock_key = AdvisoryLockKey::for_key(key);
        let acquired = self
            .tables
            .write()
            .map_err(poisoned)?
            .try_lock(lock_key, cell.id);
        tracing::debug!(key, acquired, "advisory lock attempt");
        Ok(acquired)
    }

    async fn claim_pending_changeset_job(&self) -> StoreResult<Option<ChangesetJob>> {
        self.require_transaction()?;
        let now = self.now();
        self.write(|writer| Ok(writer.claim_pending(now)))
    }

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    async fn create_campaign(&self, campaign: &mut Campaign) -> StoreResult<()> {
        stamp_creation(&mut campaign.created_at, &mut campaign.updated_at, self.now());
        *campaign = self.write(|writer| writer.insert_campaign(campaign.clone()))?;
        Ok(())
    }

    async fn update_campaign(&self, campaign: &mut Campaign) -> StoreResult<()> {
        let mut pending = campaign.clone();
        pending.updated_at = self.now();
        *campaign = self.write(|writer| writer.update_campaign(pending))?;
        Ok(())
    }

    async fn delete_campaign(&self, id: CampaignId) -> StoreResult<()> {
        self.write(|writer| writer.delete_campaign(id))
    }

    async fn get_campaign(&self, opts: GetCampaignOpts) -> StoreResult<Campaign> {
        self.read(|tables| queries::first(&tables.campaigns, |campaign| opts.matches(campaign)))
    }

    async fn list_campaigns(
        &self,
        filter: CampaignFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Campaign>> {
        self.read(|tables| {
            Ok(queries::paginate(
                &tables.campaigns,
                page,
                queries::campaign_id,
                |campaign| filter.matches(campaign),
            ))
        })
    }

    async fn count_campaigns(&self, filter: CampaignFilter) -> StoreResult<i64> {
        self.read(|tables| queries::count(&tables.campaigns, |campaign| filter.matches(campaign)))
    }

    // ------------------------------------------------------------------
    // Patch sets
    // ------------------------------------------------------------------

    async fn create_patch_set(&self, patch_set: &mut PatchSet) -> StoreResult<()> {
        stamp_creation(&mut patch_set.created_at, &mut patch_set.updated_at, self.now());
        *patch_set = self.write(|writer| Ok(writer.insert_patch_set(patch_set.clone())))?;
        Ok(())
    }

    async fn update_patch_set(&self, patch_set: &mut PatchSet) -> StoreResult<()> {
        let mut pending = patch_set.clone();
        pending.updated_at = self.now();
        *patch_set = self.write(|writer| writer.update_patch_set(pending))?;
        Ok(())
    }

    async fn delete_patch_set(&self, id: PatchSetId) -> StoreResult<()> {
        self.write(|writer| writer.delete_patch_set(id))
    }

    async fn delete_expired_patch_sets(&self) -> StoreResult<u64> {
        let cutoff = self.now() - self.patch_set_ttl;
        let deleted = self.write(|writer| writer.delete_patch_sets_created_before(cutoff))?;
        tracing::info!(deleted, %cutoff, "deleted expired patch sets");
        Ok(deleted)
    }

    async fn get_patch_set(&self, id: PatchSetId) -> StoreResult<PatchSet> {
        self.read(|tables| tables.patch_sets.get(&id).cloned().ok_or(StoreError::NotFound))
    }

    async fn list_patch_sets(&self, page: PageRequest) -> StoreResult<Page<PatchSet>> {
        self.read(|tables| {
            Ok(queries::paginate(
                &tables.patch_sets,
                page,
                queries::patch_set_id,
                |_| true,
            ))
        })
    }

    async fn count_patch_sets(&self) -> StoreResult<i64> {
        self.read(|tables| queries::count(&tables.patch_sets, |_| true))
    }

    // ------------------------------------------------------------------
    // Patches
    // ------------------------------------------------------------------

    async fn create_patch(&self, patch: &mut Patch) -> StoreResult<()> {
        stamp_creation(&mut patch.created_at, &mut patch.updated_at, self.now());
        *patch = self.write(|writer| writer.insert_patch(patch.clone()))?;
        Ok(())
    }

    async fn update_patch(&self, patch: &mut Patch) -> StoreResult<()> {
        let mut pending = patch.clone();
        pending.updated_at = self.now();
        *patch = self.write(|writer| writer.update_patch(pending))?;
        Ok(())
    }

    async fn delete_patch(&self, id: PatchId) -> StoreResult<()> {
        self.write(|writer| writer.delete_patch(id))
    }

    async fn get_patch(&self, id: PatchId) -> StoreResult<Patch> {
        self.read(|tables| tables.patches.get(&id).cloned().ok_or(StoreError::NotFound))
    }

    async fn list_patches(
        &self,
        filter: PatchFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Patch>> {
        self.read(|tables| {
            Ok(queries::paginate(
                &tables.patches,
                page,
                queries::patch_id,
                |patch| queries::patch_matches(tables, filter, patch),
            ))
        })
    }

    async fn count_patches(&self, filter: PatchFilter) -> StoreResult<i64> {
        self.read(|tables| {
            queries::count(&tables.patches, |patch| {
                queries::patch_matches(tables, filter, patch)
            })
        })
    }

    // ------------------------------------------------------------------
    // Changesets
    // ------------------------------------------------------------------

    async fn upsert_changesets(&self, changesets: &mut [Changeset]) -> StoreResult<()> {
        if changesets.is_empty() {
            return Ok(());
        }
        let sentinels = stamp_changesets(changesets, self.now());
        let stored = self.write(|writer| Ok(writer.upsert_changesets(changesets)))?;
        write_back_changesets(
            changesets,
            sentinels,
            stored.into_iter().map(|changeset| (changeset, false)),
        )
    }

    async fn update_changesets(&self, changesets: &mut [Changeset]) -> StoreResult<()> {
        if changesets.is_empty() {
            return Ok(());
        }
        let now = self.now();
        let mut pending = changesets.to_vec();
        for changeset in &mut pending {
            changeset.updated_at = now;
        }
        let stored = self.write(|writer| writer.update_changesets(&pending))?;
        for (record, updated) in changesets.iter_mut().zip(stored) {
            *record = updated;
        }
        Ok(())
    }

    async fn delete_changeset(&self, id: ChangesetId) -> StoreResult<()> {
        self.write(|writer| writer.delete_changeset(id))
    }

    async fn get_changeset(&self, opts: GetChangesetOpts) -> StoreResult<Changeset> {
        self.read(|tables| {
            queries::first(&tables.changesets, |changeset| opts.matches(changeset))
        })
    }

    async fn list_changesets(
        &self,
        filter: ChangesetFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Changeset>> {
        self.read(|tables| {
            Ok(queries::paginate(
                &tables.changesets,
                page,
                queries::changeset_id,
                |changeset| filter.matches(changeset),
            ))
        })
    }

    async fn count_changesets(&self, filter: ChangesetFilter) -> StoreResult<i64> {
        self.read(|tables| {
            queries::count(&tables.changesets, |changeset| filter.matches(changeset))
        })
    }

    async fn list_changeset_sync_data(&self) -> StoreResult<Vec<ChangesetSyncData>> {
        self.read(|tables| Ok(queries::sync_data(tables)))
    }

    async fn get_changeset_external_ids(
        &self,
        head_refs: ChangesetHeadRefs,
    ) -> StoreResult<Vec<String>> {
        self.read(|tables| {
            Ok(tables
                .changesets
                .values()
                .filter(|changeset| head_refs.matches(changeset))
                .map(|changeset| changeset.external_id.clone())
                .collect())
        })
    }

    // ------------------------------------------------------------------
    // Changeset events
    // ------------------------------------------------------------------

    async fn upsert_changeset_events(&self, events: &mut [ChangesetEvent]) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        reject_duplicate_event_keys(events)?;
        let pending = stamp_events(events, self.now());
        let stored = self.write(|writer| writer.upsert_changeset_events(&pending))?;
        for (record, upserted) in events.iter_mut().zip(stored) {
            *record = upserted;
        }
        Ok(())
    }

    async fn get_changeset_event(
        &self,
        opts: GetChangesetEventOpts,
    ) -> StoreResult<ChangesetEvent> {
        self.read(|tables| queries::first(&tables.changeset_events, |event| opts.matches(event)))
    }

    async fn list_changeset_events(
        &self,
        filter: ChangesetEventFilter,
        page: PageRequest,
    ) -> StoreResult<Page<ChangesetEvent>> {
        self.read(|tables| {
            Ok(queries::paginate(
                &tables.changeset_events,
                page,
                queries::event_id,
                |event| filter.matches(event),
            ))
        })
    }

    async fn count_changeset_events(&self, filter: ChangesetEventFilter) -> StoreResult<i64> {
        self.read(|tables| queries::count(&tables.changeset_events, |event| filter.matches(event)))
    }

    // ------------------------------------------------------------------
    // Changeset jobs
    // ------------------------------------------------------------------

    async fn create_changeset_job(&self, job: &mut ChangesetJob) -> StoreResult<()> {
        stamp_creation(&mut job.created_at, &mut job.updated_at, self.now());
        *job = self.write(|writer| writer.insert_job(job.clone()))?;
        Ok(())
    }

    async fn update_changeset_job(&self, job: &mut ChangesetJob) -> StoreResult<()> {
        let mut pending = job.clone();
        pending.updated_at = self.now();
        *job = self.write(|writer| writer.update_job(pending))?;
        Ok(())
    }

    async fn delete_changeset_job(&self, id: ChangesetJobId) -> StoreResult<()> {
        self.write(|writer| writer.delete_job(id))
    }

    async fn get_changeset_job(&self, opts: GetChangesetJobOpts) -> StoreResult<ChangesetJob> {
        self.read(|tables| queries::first(&tables.changeset_jobs, |job| opts.matches(job)))
    }

    async fn list_changeset_jobs(
        &self,
        filter: ChangesetJobFilter,
        page: PageRequest,
    ) -> StoreResult<Page<ChangesetJob>> {
        self.read(|tables| {
            Ok(queries::paginate(
                &tables.changeset_jobs,
                page,
                queries::job_id,
                |job| queries::job_matches(tables, filter, job),
            ))
        })
    }

    async fn count_changeset_jobs(&self, filter: ChangesetJobFilter) -> StoreResult<i64> {
        self.read(|tables| {
            queries::count(&tables.changeset_jobs, |job| {
                queries::job_matches(tables, filter, job)
            })
        })
    }

    async fn get_latest_changeset_job_created_at(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.read(|tables| Ok(queries::latest_job_created_at(tables, campaign_id)))
    }

    async fn reset_changeset_jobs(&self, campaign_id: CampaignId) -> StoreResult<u64> {
        self.reset_jobs(campaign_id, ResetScope::All)
    }

    async fn reset_failed_changeset_jobs(&self, campaign_id: CampaignId) -> StoreResult<u64> {
        self.reset_jobs(campaign_id, ResetScope::Failed)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    async fn get_campaign_status(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<BackgroundProcessStatus> {
        self.read(|tables| Ok(queries::campaign_status(tables, campaign_id)))
    }
}
