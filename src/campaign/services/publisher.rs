//! Worker that drains the changeset job queue.

use crate::campaign::{
    domain::{Campaign, Changeset, ChangesetJob, stored_now},
    ports::{
        CampaignStore, ChangesetPublisher, GetCampaignOpts, PublicationRequest, StoreResult,
    },
};
use mockable::Clock;
use std::slice;
use std::sync::Arc;

/// Claims pending changeset jobs and publishes their patches.
///
/// Any number of workers may poll the same store; the claim queue hands each
/// pending job to exactly one of them.
pub struct ChangesetJobWorker<S, P, C>
where
    S: CampaignStore,
    P: ChangesetPublisher + 'static,
    C: Clock + Send + Sync + 'static,
{
    store: S,
    publisher: Arc<P>,
    clock: Arc<C>,
}

impl<S, P, C> Clone for ChangesetJobWorker<S, P, C>
where
    S: CampaignStore,
    P: ChangesetPublisher + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            publisher: Arc::clone(&self.publisher),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S, P, C> ChangesetJobWorker<S, P, C>
where
    S: CampaignStore,
    P: ChangesetPublisher + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a worker over a store that is not transaction-bound.
    #[must_use]
    pub const fn new(store: S, publisher: Arc<P>, clock: Arc<C>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// Claims and processes at most one job.
    ///
    /// A rejection from the code host finishes the job with its message;
    /// it is not retried. Returns `false` when no job was claimable.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted processing. The claim is rolled
    /// back, so the job stays pending.
    pub async fn poll_once(&self) -> StoreResult<bool> {
        let publisher = Arc::clone(&self.publisher);
        let clock = Arc::clone(&self.clock);
        self.store
            .process_pending_changeset_job(move |tx, job| publish_job(tx, publisher, clock, job))
            .await
    }

    /// Polls until no claimable job remains, returning how many jobs were
    /// processed.
    ///
    /// # Errors
    ///
    /// Stops at the first failed poll and returns its error.
    pub async fn run_until_idle(&self) -> StoreResult<usize> {
        let mut processed = 0;
        while self.poll_once().await? {
            processed += 1;
        }
        tracing::info!(processed, "changeset job queue drained");
        Ok(processed)
    }
}

fn tolerate_existing(upserted: StoreResult<()>) -> StoreResult<()> {
    match upserted {
        Err(err) if err.is_already_exists() => Ok(()),
        other => other,
    }
}

async fn publish_job<S, P, C>(
    store: S,
    publisher: Arc<P>,
    clock: Arc<C>,
    mut job: ChangesetJob,
) -> StoreResult<()>
where
    S: CampaignStore,
    P: ChangesetPublisher + 'static,
    C: Clock + Send + Sync + 'static,
{
    let campaign = store
        .get_campaign(GetCampaignOpts::by_id(job.campaign_id))
        .await?;
    let patch = store.get_patch(job.patch_id).await?;
    let request = PublicationRequest {
        campaign,
        patch,
        job: job.clone(),
    };

    match publisher.publish(&request).await {
        Ok(published) => {
            let changeset = record_changeset(&store, request.campaign, published).await?;
            job.succeed(changeset.id, stored_now(&*clock));
            tracing::info!(
                job_id = %job.id,
                changeset_id = %changeset.id,
                "published changeset"
            );
        }
        Err(err) => {
            tracing::warn!(job_id = %job.id, error = %err, "code host rejected changeset");
            job.fail(err.message(), stored_now(&*clock));
        }
    }
    store.update_changeset_job(&mut job).await
}

/// Stores a published changeset and links it with the campaign both ways.
async fn record_changeset<S: CampaignStore>(
    store: &S,
    mut campaign: Campaign,
    published: Changeset,
) -> StoreResult<Changeset> {
    let mut stored = [published];
    tolerate_existing(store.upsert_changesets(&mut stored).await)?;
    let [mut changeset] = stored;
    if changeset.add_campaign(campaign.id) {
        store
            .update_changesets(slice::from_mut(&mut changeset))
            .await?;
    }
    if campaign.attach_changeset(changeset.id) {
        store.update_campaign(&mut campaign).await?;
    }
    Ok(changeset)
}
