//! End-to-end runs of the changeset job worker over the in-memory store.

use crate::campaign_memory::helpers::{github_changeset, seed_campaign, seed_jobs, store};
use async_trait::async_trait;
use haussmann::campaign::{
    adapters::memory::InMemoryCampaignStore,
    domain::{Changeset, PatchId, ProcessState, RepoId},
    ports::{
        CampaignStore, ChangesetFilter, ChangesetPublisher, PublicationRequest, PublishError,
    },
    services::ChangesetJobWorker,
};
use mockable::DefaultClock;
use rstest::rstest;
use std::sync::{Arc, Mutex};

/// Publisher that records every request and rejects one repository.
#[derive(Debug, Default)]
struct RecordingPublisher {
    published: Mutex<Vec<PatchId>>,
    rejected_repo: Option<RepoId>,
}

impl RecordingPublisher {
    fn rejecting(repo: RepoId) -> Self {
        Self {
            rejected_repo: Some(repo),
            ..Self::default()
        }
    }

    fn published(&self) -> Vec<PatchId> {
        self.published.lock().expect("publish log").clone()
    }
}

#[async_trait]
impl ChangesetPublisher for RecordingPublisher {
    async fn publish(&self, request: &PublicationRequest) -> Result<Changeset, PublishError> {
        self.published
            .lock()
            .expect("publish log")
            .push(request.patch.id);
        tokio::task::yield_now().await;
        if self.rejected_repo == Some(request.patch.repo_id) {
            return Err(PublishError::new("repository is archived"));
        }
        Ok(github_changeset(
            request.patch.repo_id.into_inner(),
            request.patch.id.into_inner(),
        ))
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_publish_every_patch_once(store: InMemoryCampaignStore) {
    let repos: Vec<i32> = (1..=10).collect();
    let seeded = seed_campaign(&store, "Fleet", &repos).await.expect("seeded");
    let jobs = seed_jobs(&store, &seeded).await.expect("jobs");
    let publisher = Arc::new(RecordingPublisher::rejecting(RepoId::new(4)));
    let worker = ChangesetJobWorker::new(
        store.clone(),
        Arc::clone(&publisher),
        Arc::new(DefaultClock),
    );

    let runs: Vec<_> = (0..3)
        .map(|_| {
            let running = worker.clone();
            tokio::spawn(async move { running.run_until_idle().await })
        })
        .collect();
    let mut processed = 0;
    for run in runs {
        processed += run.await.expect("worker task").expect("queue drains");
    }

    let mut published = publisher.published();
    published.sort();
    published.dedup();
    assert_eq!(processed, jobs.len());
    assert_eq!(publisher.published().len(), jobs.len());
    assert_eq!(published.len(), jobs.len());

    let status = store
        .get_campaign_status(seeded.campaign.id)
        .await
        .expect("status");
    assert_eq!(status.completed, 10);
    assert_eq!(status.process_errors, vec!["repository is archived".to_owned()]);
    assert_eq!(status.state(), ProcessState::Errored);
    let changesets = store
        .count_changesets(ChangesetFilter {
            campaign_id: Some(seeded.campaign.id),
            ..ChangesetFilter::default()
        })
        .await
        .expect("count");
    assert_eq!(changesets, 9);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reset_failed_jobs_are_published_again(store: InMemoryCampaignStore) {
    let seeded = seed_campaign(&store, "Retry", &[1, 2]).await.expect("seeded");
    seed_jobs(&store, &seeded).await.expect("jobs");
    let flaky = Arc::new(RecordingPublisher::rejecting(RepoId::new(2)));
    ChangesetJobWorker::new(store.clone(), Arc::clone(&flaky), Arc::new(DefaultClock))
        .run_until_idle()
        .await
        .expect("first pass");

    let reset = store
        .reset_failed_changeset_jobs(seeded.campaign.id)
        .await
        .expect("reset");
    let healthy = Arc::new(RecordingPublisher::default());
    let retried = ChangesetJobWorker::new(
        store.clone(),
        Arc::clone(&healthy),
        Arc::new(DefaultClock),
    )
    .run_until_idle()
    .await
    .expect("second pass");

    assert_eq!(reset, 1);
    assert_eq!(retried, 1);
    assert_eq!(healthy.published(), vec![seeded.patches[1].id]);
    let status = store
        .get_campaign_status(seeded.campaign.id)
        .await
        .expect("status");
    assert_eq!(status.state(), ProcessState::Completed);
}
