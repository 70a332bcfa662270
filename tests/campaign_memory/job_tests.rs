//! Changeset job bookkeeping, resets and status in the in-memory store.

use crate::campaign_memory::helpers::{
    SteppingClock, clock, clocked_store, github_changeset, seed_campaign, seed_jobs, store,
};
use haussmann::campaign::{
    adapters::memory::InMemoryCampaignStore,
    domain::{ChangesetJob, ProcessState},
    ports::{
        CampaignStore, ChangesetJobFilter, GetChangesetJobOpts, PageRequest, PatchFilter,
        StoreError,
    },
};
use mockable::Clock;
use rstest::rstest;
use std::sync::Arc;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn one_job_per_campaign_and_patch(store: InMemoryCampaignStore) {
    let seeded = seed_campaign(&store, "Unique", &[1]).await.expect("seeded");
    seed_jobs(&store, &seeded).await.expect("jobs");

    let mut duplicate = ChangesetJob::new(seeded.campaign.id, seeded.patches[0].id, "other");
    let result = store.create_changeset_job(&mut duplicate).await;

    assert!(matches!(
        result,
        Err(StoreError::DuplicateChangesetJob { campaign_id, patch_id })
            if campaign_id == seeded.campaign.id && patch_id == seeded.patches[0].id
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn closed_campaign_accepts_no_new_jobs(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut seeded = seed_campaign(&store, "Closed", &[1, 2]).await.expect("seeded");
    let mut open_job = ChangesetJob::new(seeded.campaign.id, seeded.patches[0].id, "b");
    store
        .create_changeset_job(&mut open_job)
        .await
        .expect("job while open");
    seeded.campaign.closed_at = Some(clock.utc());
    store
        .update_campaign(&mut seeded.campaign)
        .await
        .expect("closed");

    let mut late = ChangesetJob::new(seeded.campaign.id, seeded.patches[1].id, "b");
    let result = store.create_changeset_job(&mut late).await;

    assert!(matches!(
        result,
        Err(StoreError::CampaignClosed(id)) if id == seeded.campaign.id
    ));
    assert!(late.id.is_unset());
    assert_eq!(
        store
            .count_changeset_jobs(ChangesetJobFilter {
                campaign_id: Some(seeded.campaign.id),
                ..ChangesetJobFilter::default()
            })
            .await
            .expect("count"),
        1
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn job_lookups_and_filters(store: InMemoryCampaignStore) {
    let first = seed_campaign(&store, "First", &[1, 2]).await.expect("seeded");
    let second = seed_campaign(&store, "Second", &[3]).await.expect("seeded");
    let jobs = seed_jobs(&store, &first).await.expect("jobs");
    seed_jobs(&store, &second).await.expect("jobs");

    let by_patch = store
        .get_changeset_job(GetChangesetJobOpts {
            campaign_id: Some(first.campaign.id),
            patch_id: Some(first.patches[1].id),
            ..GetChangesetJobOpts::default()
        })
        .await
        .expect("found");
    let of_patch_set = store
        .list_changeset_jobs(
            ChangesetJobFilter {
                patch_set_id: Some(second.patch_set.id),
                ..ChangesetJobFilter::default()
            },
            PageRequest::default(),
        )
        .await
        .expect("list");

    assert_eq!(by_patch, jobs[1]);
    assert_eq!(of_patch_set.items.len(), 1);
    assert_eq!(of_patch_set.items[0].campaign_id, second.campaign.id);
    assert_eq!(
        store
            .count_changeset_jobs(ChangesetJobFilter {
                campaign_id: Some(first.campaign.id),
                ..ChangesetJobFilter::default()
            })
            .await
            .expect("count"),
        2
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn updating_a_missing_job_is_not_found(store: InMemoryCampaignStore) {
    let mut ghost = ChangesetJob::default();

    let result = store.update_changeset_job(&mut ghost).await;

    assert!(result.is_err_and(|err| err.is_not_found()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn published_patches_drop_out_of_unpublished_filter(store: InMemoryCampaignStore) {
    let seeded = seed_campaign(&store, "Publish", &[1, 2]).await.expect("seeded");
    let mut jobs = seed_jobs(&store, &seeded).await.expect("jobs");
    let mut changesets = [github_changeset(1, 10)];
    store.upsert_changesets(&mut changesets).await.expect("inserted");
    jobs[0].changeset_id = Some(changesets[0].id);
    store
        .update_changeset_job(&mut jobs[0])
        .await
        .expect("job linked");

    let unpublished = store
        .list_patches(
            PatchFilter {
                only_unpublished_in_campaign: Some(seeded.campaign.id),
                ..PatchFilter::default()
            },
            PageRequest::default(),
        )
        .await
        .expect("list");

    assert_eq!(unpublished.items, vec![seeded.patches[1].clone()]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn latest_created_at_waits_for_every_patch(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let seeded = seed_campaign(&store, "Latest", &[1, 2]).await.expect("seeded");
    let mut first = ChangesetJob::new(seeded.campaign.id, seeded.patches[0].id, "b");
    store.create_changeset_job(&mut first).await.expect("job");

    let partial = store
        .get_latest_changeset_job_created_at(seeded.campaign.id)
        .await
        .expect("query");
    let mut second = ChangesetJob::new(seeded.campaign.id, seeded.patches[1].id, "b");
    store.create_changeset_job(&mut second).await.expect("job");
    let complete = store
        .get_latest_changeset_job_created_at(seeded.campaign.id)
        .await
        .expect("query");

    assert_eq!(partial, None);
    assert_eq!(complete, Some(second.created_at));
    assert!(second.created_at > first.created_at);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn resets_clear_progress(store: InMemoryCampaignStore) {
    let seeded = seed_campaign(&store, "Reset", &[1, 2, 3]).await.expect("seeded");
    let mut jobs = seed_jobs(&store, &seeded).await.expect("jobs");
    let now = seeded.campaign.created_at;
    for (index, job) in jobs.iter_mut().enumerate() {
        job.started_at = Some(now);
        if index == 0 {
            job.fail("rate limited", now);
        } else {
            job.finished_at = Some(now);
        }
        store.update_changeset_job(job).await.expect("progress");
    }

    let failed = store
        .reset_failed_changeset_jobs(seeded.campaign.id)
        .await
        .expect("reset failed");
    let status = store
        .get_campaign_status(seeded.campaign.id)
        .await
        .expect("status");
    assert_eq!(failed, 1);
    assert_eq!(status.pending, 1);
    assert!(status.process_errors.is_empty());
    assert_eq!(status.state(), ProcessState::Processing);

    let all = store
        .reset_changeset_jobs(seeded.campaign.id)
        .await
        .expect("reset all");
    let job = store
        .get_changeset_job(GetChangesetJobOpts::by_id(jobs[2].id))
        .await
        .expect("job");
    assert_eq!(all, 3);
    assert!(job.is_pending());
    assert!(!job.is_finished());
    assert_eq!(job.error, None);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn status_counts_errors_once_everything_finished(store: InMemoryCampaignStore) {
    let seeded = seed_campaign(&store, "Status", &[1, 2]).await.expect("seeded");
    let mut jobs = seed_jobs(&store, &seeded).await.expect("jobs");
    let now = seeded.campaign.created_at;
    jobs[0].fail("push rejected", now);
    store.update_changeset_job(&mut jobs[0]).await.expect("failed");

    let processing = store
        .get_campaign_status(seeded.campaign.id)
        .await
        .expect("status");
    jobs[1].finished_at = Some(now);
    store
        .update_changeset_job(&mut jobs[1])
        .await
        .expect("finished");
    let errored = store
        .get_campaign_status(seeded.campaign.id)
        .await
        .expect("status");

    assert_eq!(processing.state(), ProcessState::Processing);
    assert_eq!(errored.total, 2);
    assert_eq!(errored.completed, 2);
    assert_eq!(errored.process_errors, vec!["push rejected".to_owned()]);
    assert_eq!(errored.state(), ProcessState::Errored);
}
