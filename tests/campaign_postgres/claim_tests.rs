//! Claim queue behaviour against a real database.

use crate::campaign_postgres::helpers::{seed_campaign, store_context};
use haussmann::campaign::{
    domain::{ChangesetJob, ChangesetJobId},
    ports::{CampaignStore, GetChangesetJobOpts, StoreError},
};
use pg_embedded_setup_unpriv::{TestCluster, test_support::shared_test_cluster};
use rstest::rstest;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[rstest]
fn claims_in_id_order_and_rolls_back(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "claim_order");
    let store = ctx.store.clone();

    ctx.rt.block_on(async {
        let seeded = seed_campaign(&store, "Order", &[1, 2]).await.expect("seeded");

        let tx = store.transact().await.expect("transaction");
        let claimed = tx
            .claim_pending_changeset_job()
            .await
            .expect("claim")
            .expect("pending job");
        assert_eq!(claimed.id, seeded.jobs[0].id);
        assert!(claimed.started_at.is_some());
        let outcome: Result<(), StoreError> = tx.done(Err(StoreError::NotFound)).await;
        assert!(outcome.is_err());

        let job = store
            .get_changeset_job(GetChangesetJobOpts::by_id(seeded.jobs[0].id))
            .await
            .expect("job");
        assert!(job.is_pending());
        assert!(job.started_at.is_none());
    });
}

#[rstest]
fn claiming_outside_a_transaction_fails(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "claim_no_tx");
    let store = ctx.store.clone();

    let result = ctx.rt.block_on(store.claim_pending_changeset_job());

    assert!(matches!(result, Err(StoreError::NotInTransaction)));
}

#[rstest]
fn open_claims_are_skipped_by_other_transactions(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "claim_skip");
    let store = ctx.store.clone();

    ctx.rt.block_on(async {
        let seeded = seed_campaign(&store, "Skip", &[1, 2]).await.expect("seeded");
        let first_tx = store.transact().await.expect("first transaction");
        let second_tx = store.transact().await.expect("second transaction");

        let first = first_tx
            .claim_pending_changeset_job()
            .await
            .expect("claim")
            .expect("first job");
        let second = second_tx
            .claim_pending_changeset_job()
            .await
            .expect("claim")
            .expect("second job");
        let none = second_tx.claim_pending_changeset_job().await.expect("claim");

        assert_eq!(first.id, seeded.jobs[0].id);
        assert_eq!(second.id, seeded.jobs[1].id);
        assert!(none.is_none());
        first_tx.done(Ok(())).await.expect("commit");
        second_tx.done(Ok(())).await.expect("commit");
    });
}

#[rstest]
fn detached_campaign_jobs_stay_pending(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "claim_detached");
    let store = ctx.store.clone();

    ctx.rt.block_on(async {
        let mut seeded = seed_campaign(&store, "Detached", &[1]).await.expect("seeded");
        seeded.campaign.patch_set_id = None;
        store
            .update_campaign(&mut seeded.campaign)
            .await
            .expect("detached");

        let claimed = store
            .process_pending_changeset_job(|_tx, _job: ChangesetJob| async { Ok(()) })
            .await
            .expect("poll");

        assert!(!claimed);
        let status = store
            .get_campaign_status(seeded.campaign.id)
            .await
            .expect("status");
        assert_eq!(status.pending, 1);
    });
}

#[rstest]
fn concurrent_workers_claim_each_job_once(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "claim_concurrent");
    let store = ctx.store.clone();

    ctx.rt.block_on(async {
        let repos: Vec<i32> = (1..=9).collect();
        let seeded = seed_campaign(&store, "Fan out", &repos).await.expect("seeded");
        let processed: Arc<Mutex<Vec<ChangesetJobId>>> = Arc::default();

        let mut workers = Vec::new();
        for _ in 0..3 {
            let worker_store = store.clone();
            let log = Arc::clone(&processed);
            workers.push(tokio::spawn(async move {
                loop {
                    let log_for_job = Arc::clone(&log);
                    let claimed = worker_store
                        .process_pending_changeset_job(move |tx, mut job: ChangesetJob| {
                            async move {
                                log_for_job.lock().expect("log lock").push(job.id);
                                job.finished_at = job.started_at;
                                tx.update_changeset_job(&mut job).await
                            }
                        })
                        .await
                        .expect("processing succeeds");
                    if !claimed {
                        break;
                    }
                }
            }));
        }
        for worker in workers {
            worker.await.expect("worker task");
        }

        let log = processed.lock().expect("log lock").clone();
        let unique: HashSet<ChangesetJobId> = log.iter().copied().collect();
        assert_eq!(log.len(), seeded.jobs.len());
        assert_eq!(unique.len(), seeded.jobs.len());
        let status = store
            .get_campaign_status(seeded.campaign.id)
            .await
            .expect("status");
        assert_eq!(status.completed, 9);
        assert!(status.is_finished());
    });
}
