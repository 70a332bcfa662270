//! Transactions and advisory locks of the in-memory store.

use crate::campaign_memory::helpers::{AUTHOR, seed_campaign, store};
use haussmann::campaign::{
    adapters::memory::InMemoryCampaignStore,
    domain::{Campaign, PatchSet},
    ports::{CampaignFilter, CampaignStore, GetCampaignOpts, StoreError},
};
use rstest::rstest;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn committed_writes_persist(store: InMemoryCampaignStore) {
    let tx = store.transact().await.expect("transaction");
    let mut campaign = Campaign {
        name: "Committed".to_owned(),
        ..Campaign::default()
    };
    let created = tx.create_campaign(&mut campaign).await;
    tx.done(created).await.expect("commit");

    let fetched = store
        .get_campaign(GetCampaignOpts::by_id(campaign.id))
        .await
        .expect("visible after commit");
    assert_eq!(fetched, campaign);
    assert!(tx.in_transaction());
    assert!(!store.in_transaction());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rollback_discards_every_write(store: InMemoryCampaignStore) {
    let existing = seed_campaign(&store, "Existing", &[1]).await.expect("seeded");
    let tx = store.transact().await.expect("transaction");
    let mut renamed = existing.campaign.clone();
    renamed.name = "Renamed".to_owned();
    tx.update_campaign(&mut renamed).await.expect("update");
    let mut extra = Campaign {
        name: "Extra".to_owned(),
        ..Campaign::default()
    };
    tx.create_campaign(&mut extra).await.expect("insert");
    tx.delete_patch_set(existing.patch_set.id)
        .await
        .expect("cascade delete");

    let outcome: Result<(), StoreError> = tx.done(Err(StoreError::NotFound)).await;

    assert!(matches!(outcome, Err(StoreError::NotFound)));
    let restored = store
        .get_campaign(GetCampaignOpts::by_id(existing.campaign.id))
        .await
        .expect("campaign restored");
    assert_eq!(restored, existing.campaign);
    assert_eq!(
        store
            .count_campaigns(CampaignFilter::default())
            .await
            .expect("count"),
        1
    );
    assert_eq!(
        store
            .get_patch(existing.patches[0].id)
            .await
            .expect("patch restored"),
        existing.patches[0]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rolled_back_ids_are_not_reused(store: InMemoryCampaignStore) {
    let tx = store.transact().await.expect("transaction");
    let mut discarded = PatchSet {
        user_id: AUTHOR,
        ..PatchSet::default()
    };
    tx.create_patch_set(&mut discarded).await.expect("insert");
    tx.done(Err::<(), _>(StoreError::NotFound))
        .await
        .expect_err("rolled back");

    let mut kept = PatchSet {
        user_id: AUTHOR,
        ..PatchSet::default()
    };
    store.create_patch_set(&mut kept).await.expect("insert");

    assert!(kept.id > discarded.id);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn nested_transact_shares_the_transaction(store: InMemoryCampaignStore) {
    let outer = store.transact().await.expect("transaction");
    let inner = outer.transact().await.expect("nested");
    let mut campaign = Campaign {
        name: "Nested".to_owned(),
        ..Campaign::default()
    };
    inner.create_campaign(&mut campaign).await.expect("insert");

    outer
        .done(Err::<(), _>(StoreError::NotFound))
        .await
        .expect_err("rolled back");

    assert_eq!(
        store
            .count_campaigns(CampaignFilter::default())
            .await
            .expect("count"),
        0
    );
    let reuse = inner.count_campaigns(CampaignFilter::default()).await;
    assert!(matches!(reuse, Err(StoreError::TransactionClosed)));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn done_outside_a_transaction_passes_the_outcome_through(store: InMemoryCampaignStore) {
    let passed = store.done(Ok(7)).await.expect("no transaction to finish");

    assert_eq!(passed, 7);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn finishing_twice_reports_a_closed_transaction(store: InMemoryCampaignStore) {
    let tx = store.transact().await.expect("transaction");
    tx.done(Ok(())).await.expect("commit");

    let again = tx.done(Ok(())).await;

    assert!(matches!(again, Err(StoreError::TransactionClosed)));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn advisory_locks_require_a_transaction(store: InMemoryCampaignStore) {
    let result = store.try_acquire_advisory_lock("sync").await;

    assert!(matches!(result, Err(StoreError::NotInTransaction)));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn advisory_lock_is_exclusive_until_the_holder_finishes(store: InMemoryCampaignStore) {
    let holder = store.transact().await.expect("transaction");
    let contender = store.transact().await.expect("transaction");

    let held = holder.try_acquire_advisory_lock("sync").await.expect("lock");
    let again = holder.try_acquire_advisory_lock("sync").await.expect("lock");
    let blocked = contender
        .try_acquire_advisory_lock("sync")
        .await
        .expect("lock");
    let unrelated = contender
        .try_acquire_advisory_lock("other")
        .await
        .expect("lock");
    holder.done(Ok(())).await.expect("commit");
    let after_release = contender
        .try_acquire_advisory_lock("sync")
        .await
        .expect("lock");
    contender.done(Ok(())).await.expect("commit");

    assert!(held);
    assert!(again);
    assert!(!blocked);
    assert!(unrelated);
    assert!(after_release);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn dropping_an_open_transaction_rolls_it_back(store: InMemoryCampaignStore) {
    {
        let tx = store.transact().await.expect("transaction");
        let mut campaign = Campaign {
            name: "Abandoned".to_owned(),
            ..Campaign::default()
        };
        tx.create_campaign(&mut campaign).await.expect("insert");
        assert!(tx.try_acquire_advisory_lock("sync").await.expect("lock"));
    }

    let fresh = store.transact().await.expect("transaction");
    let relocked = fresh.try_acquire_advisory_lock("sync").await.expect("lock");
    fresh.done(Ok(())).await.expect("commit");

    assert!(relocked);
    assert_eq!(
        store
            .count_campaigns(CampaignFilter::default())
            .await
            .expect("count"),
        0
    );
}
