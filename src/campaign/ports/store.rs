//! Store port for campaign coordination.
//!
//! A store value is bound either to a connection source or to one open
//! transaction. [`CampaignStore::transact`] turns the former into the latter
//! and [`CampaignStore::done`] ends it. Writes take the caller's record by
//! mutable reference and overwrite it with the stored row, so generated
//! identifiers and timestamps are visible after the call.

use super::{
    CampaignFilter, ChangesetEventFilter, ChangesetFilter, ChangesetHeadRefs, ChangesetJobFilter,
    GetCampaignOpts, GetChangesetEventOpts, GetChangesetJobOpts, GetChangesetOpts, Page,
    PageRequest, PatchFilter, StoreError, StoreResult,
};
use crate::campaign::domain::{
    BackgroundProcessStatus, Campaign, CampaignId, Changeset, ChangesetEvent, ChangesetId,
    ChangesetJob, ChangesetJobId, ChangesetSyncData, Patch, PatchId, PatchSet, PatchSetId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;

/// Persistence and coordination contract for campaigns and their jobs.
#[async_trait]
pub trait CampaignStore: Clone + Send + Sync + 'static {
    // ------------------------------------------------------------------
    // Transactions and advisory locks
    // ------------------------------------------------------------------

    /// Returns `true` when this store is bound to an open transaction.
    fn in_transaction(&self) -> bool;

    /// Begins a transaction and returns a store bound to it.
    ///
    /// Calling this on a transaction-bound store returns a handle to the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotTransactable`] when the underlying connection
    /// cannot run transactions.
    async fn transact(&self) -> StoreResult<Self>;

    /// Ends the bound transaction: commits when `outcome` is `Ok`, rolls back
    /// otherwise, and hands `outcome` back.
    ///
    /// A no-op on stores that are not transaction-bound.
    ///
    /// # Errors
    ///
    /// Returns the original error after a rollback, or the commit failure
    /// when committing an `Ok` outcome fails.
    async fn done<T: Send + 'static>(&self, outcome: StoreResult<T>) -> StoreResult<T>;

    /// Tries to take a transaction-scoped advisory lock for `key` without
    /// blocking.
    ///
    /// Returns whether the lock was acquired. The lock is released when the
    /// transaction ends.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotInTransaction`] outside a transaction.
    async fn try_acquire_advisory_lock(&self, key: &str) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Job claim queue
    // ------------------------------------------------------------------

    /// Claims the lowest-id pending job whose campaign has a patch set,
    /// stamping `started_at`. Rows locked by other transactions are skipped.
    ///
    /// Returns `None` when no job is claimable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotInTransaction`] outside a transaction.
    async fn claim_pending_changeset_job(&self) -> StoreResult<Option<ChangesetJob>>;

    /// Claims one pending job and processes it inside a fresh transaction.
    ///
    /// `process` receives a store bound to that transaction and has
    /// exclusive access to the job. An `Ok` result commits and a failure
    /// rolls back, releasing the claim. Returns `false` when there was no
    /// work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyInTransaction`] when called on a
    /// transaction-bound store, and the callback's error after rolling back.
    async fn process_pending_changeset_job<F, Fut>(&self, process: F) -> StoreResult<bool>
    where
        F: FnOnce(Self, ChangesetJob) -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<()>> + Send + 'static,
    {
        if self.in_transaction() {
            return Err(StoreError::AlreadyInTransaction);
        }
        let tx = self.transact().await?;
        let claimed = match tx.claim_pending_changeset_job().await {
            Ok(claimed) => claimed,
            Err(err) => return tx.done(Err(err)).await,
        };
        let Some(job) = claimed else {
            return tx.done(Ok(false)).await;
        };
        let job_id = job.id;
        tracing::debug!(job_id = %job_id, "claimed pending changeset job");
        let outcome = process(tx.clone(), job).await;
        if let Err(err) = &outcome {
            tracing::warn!(job_id = %job_id, error = %err, "rolling back changeset job claim");
        }
        tx.done(outcome.map(|()| true)).await
    }

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    /// Creates a campaign.
    async fn create_campaign(&self, campaign: &mut Campaign) -> StoreResult<()>;

    /// Updates every mutable column of a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the campaign does not exist.
    async fn update_campaign(&self, campaign: &mut Campaign) -> StoreResult<()>;

    /// Deletes a campaign; its jobs are deleted with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the campaign does not exist.
    async fn delete_campaign(&self, id: CampaignId) -> StoreResult<()>;

    /// Returns the first campaign matching `opts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing matches.
    async fn get_campaign(&self, opts: GetCampaignOpts) -> StoreResult<Campaign>;

    /// Lists campaigns matching `filter`.
    async fn list_campaigns(
        &self,
        filter: CampaignFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Campaign>>;

    /// Counts campaigns matching `filter`.
    async fn count_campaigns(&self, filter: CampaignFilter) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Patch sets
    // ------------------------------------------------------------------

    /// Creates a patch set.
    async fn create_patch_set(&self, patch_set: &mut PatchSet) -> StoreResult<()>;

    /// Updates a patch set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the patch set does not exist.
    async fn update_patch_set(&self, patch_set: &mut PatchSet) -> StoreResult<()>;

    /// Deletes a patch set together with its patches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the patch set does not exist.
    async fn delete_patch_set(&self, id: PatchSetId) -> StoreResult<()>;

    /// Deletes patch sets older than the store's time-to-live that no
    /// campaign references, returning how many were deleted.
    async fn delete_expired_patch_sets(&self) -> StoreResult<u64>;

    /// Returns a patch set by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when it does not exist.
    async fn get_patch_set(&self, id: PatchSetId) -> StoreResult<PatchSet>;

    /// Lists patch sets.
    async fn list_patch_sets(&self, page: PageRequest) -> StoreResult<Page<PatchSet>>;

    /// Counts patch sets.
    async fn count_patch_sets(&self) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Patches
    // ------------------------------------------------------------------

    /// Creates a patch.
    async fn create_patch(&self, patch: &mut Patch) -> StoreResult<()>;

    /// Updates a patch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the patch does not exist.
    async fn update_patch(&self, patch: &mut Patch) -> StoreResult<()>;

    /// Deletes a patch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the patch does not exist.
    async fn delete_patch(&self, id: PatchId) -> StoreResult<()>;

    /// Returns a patch by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when it does not exist.
    async fn get_patch(&self, id: PatchId) -> StoreResult<Patch>;

    /// Lists patches matching `filter`.
    async fn list_patches(&self, filter: PatchFilter, page: PageRequest)
    -> StoreResult<Page<Patch>>;

    /// Counts patches matching `filter`.
    async fn count_patches(&self, filter: PatchFilter) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Changesets
    // ------------------------------------------------------------------

    /// Inserts changesets, merging with rows that share a
    /// (`repo_id`, `external_id`) pair.
    ///
    /// Every record is overwritten with its stored row, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] listing the records that were
    /// merged with pre-existing rows; the remaining records were inserted.
    async fn upsert_changesets(&self, changesets: &mut [Changeset]) -> StoreResult<()>;

    /// Updates changesets by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when a record has no stored row.
    async fn update_changesets(&self, changesets: &mut [Changeset]) -> StoreResult<()>;

    /// Deletes a changeset together with its events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the changeset does not exist.
    async fn delete_changeset(&self, id: ChangesetId) -> StoreResult<()>;

    /// Returns the first changeset matching `opts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing matches.
    async fn get_changeset(&self, opts: GetChangesetOpts) -> StoreResult<Changeset>;

    /// Lists changesets matching `filter`.
    async fn list_changesets(
        &self,
        filter: ChangesetFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Changeset>>;

    /// Counts changesets matching `filter`.
    async fn count_changesets(&self, filter: ChangesetFilter) -> StoreResult<i64>;

    /// Returns freshness data for every changeset in ascending id order.
    async fn list_changeset_sync_data(&self) -> StoreResult<Vec<ChangesetSyncData>>;

    /// Returns the external ids of changesets whose head branch is one of
    /// `head_refs`, in ascending changeset id order.
    async fn get_changeset_external_ids(
        &self,
        head_refs: ChangesetHeadRefs,
    ) -> StoreResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Changeset events
    // ------------------------------------------------------------------

    /// Inserts events, replacing metadata and `updated_at` of events that
    /// share a natural key while keeping their `id` and `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateEventKey`] when the batch repeats a
    /// natural key.
    async fn upsert_changeset_events(&self, events: &mut [ChangesetEvent]) -> StoreResult<()>;

    /// Returns the first event matching `opts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing matches.
    async fn get_changeset_event(&self, opts: GetChangesetEventOpts)
    -> StoreResult<ChangesetEvent>;

    /// Lists events matching `filter`.
    async fn list_changeset_events(
        &self,
        filter: ChangesetEventFilter,
        page: PageRequest,
    ) -> StoreResult<Page<ChangesetEvent>>;

    /// Counts events matching `filter`.
    async fn count_changeset_events(&self, filter: ChangesetEventFilter) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Changeset jobs
    // ------------------------------------------------------------------

    /// Creates a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateChangesetJob`] when the campaign
    /// already has a job for the patch.
    async fn create_changeset_job(&self, job: &mut ChangesetJob) -> StoreResult<()>;

    /// Updates a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job does not exist.
    async fn update_changeset_job(&self, job: &mut ChangesetJob) -> StoreResult<()>;

    /// Deletes a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job does not exist.
    async fn delete_changeset_job(&self, id: ChangesetJobId) -> StoreResult<()>;

    /// Returns the first job matching `opts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing matches.
    async fn get_changeset_job(&self, opts: GetChangesetJobOpts) -> StoreResult<ChangesetJob>;

    /// Lists jobs matching `filter`.
    async fn list_changeset_jobs(
        &self,
        filter: ChangesetJobFilter,
        page: PageRequest,
    ) -> StoreResult<Page<ChangesetJob>>;

    /// Counts jobs matching `filter`.
    async fn count_changeset_jobs(&self, filter: ChangesetJobFilter) -> StoreResult<i64>;

    /// Returns the newest job creation time of a campaign, provided every
    /// patch of its patch set already has a job.
    async fn get_latest_changeset_job_created_at(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Clears progress of every job of a campaign, returning how many jobs
    /// were reset.
    async fn reset_changeset_jobs(&self, campaign_id: CampaignId) -> StoreResult<u64>;

    /// Clears progress of the failed jobs of a campaign, returning how many
    /// jobs were reset.
    async fn reset_failed_changeset_jobs(&self, campaign_id: CampaignId) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Aggregates job progress for a campaign.
    async fn get_campaign_status(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<BackgroundProcessStatus>;
}
