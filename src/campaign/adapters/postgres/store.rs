//! `PostgreSQL` implementation of [`CampaignStore`].

use super::{
    batch::{self, ChangesetBatch},
    campaigns, changeset_events, changeset_jobs,
    changeset_jobs::ResetScope,
    changesets, claim,
    connection::{CampaignPgPool, Handle, atomically, run_blocking},
    lock,
    models::{campaign_changes, changeset_job_changes, patch_changes, patch_set_changes},
    patch_sets, patches, status,
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
use crate::config::{ConfigError, StoreConfig};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::{Clock, DefaultClock};
use std::fmt;
use std::sync::Arc;

/// `PostgreSQL`-backed campaign store.
///
/// Cloning is cheap. A clone of a transaction-bound store shares the
/// transaction.
#[derive(Clone)]
pub struct PostgresCampaignStore {
    handle: Handle,
    clock: Arc<dyn Clock + Send + Sync>,
    patch_set_ttl: TimeDelta,
}

impl fmt::Debug for PostgresCampaignStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCampaignStore")
            .field("in_transaction", &self.handle.is_transaction())
            .field("patch_set_ttl", &self.patch_set_ttl)
            .finish_non_exhaustive()
    }
}

impl PostgresCampaignStore {
    /// Creates a store that checks connections out of `pool`.
    #[must_use]
    pub fn new(pool: CampaignPgPool) -> Self {
        Self {
            handle: Handle::Pool(pool),
            clock: Arc::new(DefaultClock),
            patch_set_ttl: DEFAULT_PATCH_SET_TTL,
        }
    }

    /// Builds the pool described by `config` and a store on top of it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pool`] when the pool cannot be created.
    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        let pool = config.build_pool()?;
        Ok(Self::new(pool).with_patch_set_ttl(config.patch_set_ttl))
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

    async fn run<F, T>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&mut diesel::pg::PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(self.handle.clone(), op).await
    }

    fn require_transaction(&self) -> StoreResult<()> {
        if self.handle.is_transaction() {
            Ok(())
        } else {
            Err(StoreError::NotInTransaction)
        }
    }

    async fn reset_jobs(&self, campaign_id: CampaignId, scope: ResetScope) -> StoreResult<u64> {
        let now = self.now();
        let reset = self
            .run(move |conn| changeset_jobs::reset(conn, campaign_id, scope, now))
            .await?;
        tracing::info!(campaign_id = %campaign_id, ?scope, reset, "reset changeset jobs");
        Ok(reset)
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    fn in_transaction(&self) -> bool {
        self.handle.is_transaction()
    }

    async fn transact(&self) -> StoreResult<Self> {
        if self.handle.is_transaction() {
            return Ok(self.clone());
        }
        let handle = self.handle.clone();
        let bound = tokio::task::spawn_blocking(move || handle.begin())
            .await
            .map_err(|err| StoreError::connection(err.to_string()))??;
        Ok(Self {
            handle: bound,
            clock: Arc::clone(&self.clock),
            patch_set_ttl: self.patch_set_ttl,
        })
    }

    async fn done<T: Send + 'static>(&self, outcome: StoreResult<T>) -> StoreResult<T> {
        let Handle::Transaction(slot) = &self.handle else {
            return outcome;
        };
        let commit = outcome.is_ok();
        let finishing = Arc::clone(slot);
        let finished = tokio::task::spawn_blocking(move || finishing.finish(commit))
            .await
            .map_err(|err| StoreError::connection(err.to_string()))
            .and_then(|ended| ended);
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
        self.require_transaction()?;
        let lock_key = AdvisoryLockKey::for_key(key);
        let acquired = self
            .run(move |conn| lock::try_acquire(conn, lock_key))
            .await?;
        tracing::debug!(key, acquired, "advisory lock attempt");
        Ok(acquired)
    }

    async fn claim_pending_changeset_job(&self) -> StoreResult<Option<ChangesetJob>> {
        self.require_transaction()?;
        let now = self.now();
        self.run(move |conn| claim::claim_pending(conn, now)).await
    }

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    async fn create_campaign(&self, campaign: &mut Campaign) -> StoreResult<()> {
        stamp_creation(&mut campaign.created_at, &mut campaign.updated_at, self.now());
        let changes = campaign_changes(campaign);
        *campaign = self.run(move |conn| campaigns::insert(conn, &changes)).await?;
        Ok(())
    }

    async fn update_campaign(&self, campaign: &mut Campaign) -> StoreResult<()> {
        let mut pending = campaign.clone();
        pending.updated_at = self.now();
        let id = pending.id;
        let changes = campaign_changes(&pending);
        *campaign = self
            .run(move |conn| campaigns::update(conn, id, &changes))
            .await?;
        Ok(())
    }

    async fn delete_campaign(&self, id: CampaignId) -> StoreResult<()> {
        self.run(move |conn| campaigns::delete(conn, id)).await
    }

    async fn get_campaign(&self, opts: GetCampaignOpts) -> StoreResult<Campaign> {
        self.run(move |conn| campaigns::get(conn, opts)).await
    }

    async fn list_campaigns(
        &self,
        filter: CampaignFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Campaign>> {
        self.run(move |conn| campaigns::list(conn, &filter, page))
            .await
    }

    async fn count_campaigns(&self, filter: CampaignFilter) -> StoreResult<i64> {
        self.run(move |conn| campaigns::count(conn, &filter)).await
    }

    // ------------------------------------------------------------------
    // Patch sets
    // ------------------------------------------------------------------

    async fn create_patch_set(&self, patch_set: &mut PatchSet) -> StoreResult<()> {
        stamp_creation(&mut patch_set.created_at, &mut patch_set.updated_at, self.now());
        let changes = patch_set_changes(patch_set);
        *patch_set = self
            .run(move |conn| patch_sets::insert(conn, &changes))
            .await?;
        Ok(())
    }

    async fn update_patch_set(&self, patch_set: &mut PatchSet) -> StoreResult<()> {
        let mut pending = patch_set.clone();
        pending.updated_at = self.now();
        let id = pending.id;
        let changes = patch_set_changes(&pending);
        *patch_set = self
            .run(move |conn| patch_sets::update(conn, id, &changes))
            .await?;
        Ok(())
    }

    async fn delete_patch_set(&self, id: PatchSetId) -> StoreResult<()> {
        self.run(move |conn| patch_sets::delete(conn, id)).await
    }

    async fn delete_expired_patch_sets(&self) -> StoreResult<u64> {
        let cutoff = self.now() - self.patch_set_ttl;
        let deleted = self
            .run(move |conn| patch_sets::delete_created_before(conn, cutoff))
            .await?;
        tracing::info!(deleted, %cutoff, "deleted expired patch sets");
        Ok(deleted)
    }

    async fn get_patch_set(&self, id: PatchSetId) -> StoreResult<PatchSet> {
        self.run(move |conn| patch_sets::get(conn, id)).await
    }

    async fn list_patch_sets(&self, page: PageRequest) -> StoreResult<Page<PatchSet>> {
        self.run(move |conn| patch_sets::list(conn, page)).await
    }

    async fn count_patch_sets(&self) -> StoreResult<i64> {
        self.run(patch_sets::count).await
    }

    // ------------------------------------------------------------------
    // Patches
    // ------------------------------------------------------------------

    async fn create_patch(&self, patch: &mut Patch) -> StoreResult<()> {
        stamp_creation(&mut patch.created_at, &mut patch.updated_at, self.now());
        let changes = patch_changes(patch);
        *patch = self.run(move |conn| patches::insert(conn, &changes)).await?;
        Ok(())
    }

    async fn update_patch(&self, patch: &mut Patch) -> StoreResult<()> {
        let mut pending = patch.clone();
        pending.updated_at = self.now();
        let id = pending.id;
        let changes = patch_changes(&pending);
        *patch = self
            .run(move |conn| patches::update(conn, id, &changes))
            .await?;
        Ok(())
    }

    async fn delete_patch(&self, id: PatchId) -> StoreResult<()> {
        self.run(move |conn| patches::delete(conn, id)).await
    }

    async fn get_patch(&self, id: PatchId) -> StoreResult<Patch> {
        self.run(move |conn| patches::get(conn, id)).await
    }

    async fn list_patches(
        &self,
        filter: PatchFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Patch>> {
        self.run(move |conn| patches::list(conn, filter, page)).await
    }

    async fn count_patches(&self, filter: PatchFilter) -> StoreResult<i64> {
        self.run(move |conn| patches::count(conn, filter)).await
    }

    // ------------------------------------------------------------------
    // Changesets
    // ------------------------------------------------------------------

    async fn upsert_changesets(&self, changesets: &mut [Changeset]) -> StoreResult<()> {
        if changesets.is_empty() {
            return Ok(());
        }
        let sentinels = stamp_changesets(changesets, self.now());
        let encoded = ChangesetBatch::encode(changesets)?;
        let stored = self
            .run(move |conn| atomically(conn, |tx| batch::upsert_changesets(tx, &encoded)))
            .await?;
        write_back_changesets(
            changesets,
            sentinels,
            stored
                .into_iter()
                .map(|upserted| (upserted.changeset, upserted.raced)),
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
        let encoded = ChangesetBatch::encode(&pending)?;
        let stored = self
            .run(move |conn| atomically(conn, |tx| batch::update_changesets(tx, &encoded)))
            .await?;
        for (record, updated) in changesets.iter_mut().zip(stored) {
            *record = updated;
        }
        Ok(())
    }

    async fn delete_changeset(&self, id: ChangesetId) -> StoreResult<()> {
        self.run(move |conn| changesets::delete(conn, id)).await
    }

    async fn get_changeset(&self, opts: GetChangesetOpts) -> StoreResult<Changeset> {
        self.run(move |conn| changesets::get(conn, &opts)).await
    }

    async fn list_changesets(
        &self,
        filter: ChangesetFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Changeset>> {
        self.run(move |conn| changesets::list(conn, &filter, page))
            .await
    }

    async fn count_changesets(&self, filter: ChangesetFilter) -> StoreResult<i64> {
        self.run(move |conn| changesets::count(conn, &filter)).await
    }

    async fn list_changeset_sync_data(&self) -> StoreResult<Vec<ChangesetSyncData>> {
        self.run(changesets::sync_data).await
    }

    async fn get_changeset_external_ids(
        &self,
        head_refs: ChangesetHeadRefs,
    ) -> StoreResult<Vec<String>> {
        self.run(move |conn| changesets::external_ids(conn, &head_refs))
            .await
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
        let payload = batch::encode_events(&pending)?;
        let expected = pending.len();
        let stored = self
            .run(move |conn| batch::upsert_changeset_events(conn, payload, expected))
            .await?;
        for (record, upserted) in events.iter_mut().zip(stored) {
            *record = upserted;
        }
        Ok(())
    }

    async fn get_changeset_event(
        &self,
        opts: GetChangesetEventOpts,
    ) -> StoreResult<ChangesetEvent> {
        self.run(move |conn| changeset_events::get(conn, &opts))
            .await
    }

    async fn list_changeset_events(
        &self,
        filter: ChangesetEventFilter,
        page: PageRequest,
    ) -> StoreResult<Page<ChangesetEvent>> {
        self.run(move |conn| changeset_events::list(conn, &filter, page))
            .await
    }

    async fn count_changeset_events(&self, filter: ChangesetEventFilter) -> StoreResult<i64> {
        self.run(move |conn| changeset_events::count(conn, &filter))
            .await
    }

    // ------------------------------------------------------------------
    // Changeset jobs
    // ------------------------------------------------------------------

    async fn create_changeset_job(&self, job: &mut ChangesetJob) -> StoreResult<()> {
        stamp_creation(&mut job.created_at, &mut job.updated_at, self.now());
        let changes = changeset_job_changes(job);
        *job = self
            .run(move |conn| changeset_jobs::insert(conn, &changes))
            .await?;
        Ok(())
    }

    async fn update_changeset_job(&self, job: &mut ChangesetJob) -> StoreResult<()> {
        let mut pending = job.clone();
        pending.updated_at = self.now();
        let id = pending.id;
        let changes = changeset_job_changes(&pending);
        *job = self
            .run(move |conn| changeset_jobs::update(conn, id, &changes))
            .await?;
        Ok(())
    }

    async fn delete_changeset_job(&self, id: ChangesetJobId) -> StoreResult<()> {
        self.run(move |conn| changeset_jobs::delete(conn, id)).await
    }

    async fn get_changeset_job(&self, opts: GetChangesetJobOpts) -> StoreResult<ChangesetJob> {
        self.run(move |conn| changeset_jobs::get(conn, opts)).await
    }

    async fn list_changeset_jobs(
        &self,
        filter: ChangesetJobFilter,
        page: PageRequest,
    ) -> StoreResult<Page<ChangesetJob>> {
        self.run(move |conn| changeset_jobs::list(conn, filter, page))
            .await
    }

    async fn count_changeset_jobs(&self, filter: ChangesetJobFilter) -> StoreResult<i64> {
        self.run(move |conn| changeset_jobs::count(conn, filter))
            .await
    }

    async fn get_latest_changeset_job_created_at(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.run(move |conn| changeset_jobs::latest_created_at(conn, campaign_id))
            .await
    }

    async fn reset_changeset_jobs(&self, campaign_id: CampaignId) -> StoreResult<u64> {
        self.reset_jobs(campaign_id, ResetScope::All).await
    }

    async fn reset_failed_changeset_jobs(&self, campaign_id: CampaignId) -> StoreResult<u64> {
        self.reset_jobs(campaign_id, ResetScope::Failed).await
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    async fn get_campaign_status(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<BackgroundProcessStatus> {
        self.run(move |conn| status::campaign_status(conn, campaign_id))
            .await
    }
}
