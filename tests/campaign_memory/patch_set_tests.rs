//! Expiry of unattached patch sets in the in-memory store.

use crate::campaign_memory::helpers::{
    AUTHOR, SteppingClock, clock, clocked_store, seed_campaign, seed_patch_set,
};
use chrono::TimeDelta;
use haussmann::campaign::{
    domain::PatchSet,
    ports::{CampaignStore, PageRequest, PatchFilter},
};
use rstest::rstest;
use std::sync::Arc;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn sweep_deletes_only_expired_unattached_patch_sets(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock).with_patch_set_ttl(TimeDelta::hours(1));
    let (stale, _) = seed_patch_set(&store, &[1, 2]).await.expect("stale");
    let attached = seed_campaign(&store, "Attached", &[3]).await.expect("attached");
    clock.advance(TimeDelta::hours(2));
    let (fresh, _) = seed_patch_set(&store, &[4]).await.expect("fresh");

    let deleted = store.delete_expired_patch_sets().await.expect("sweep");

    assert_eq!(deleted, 1);
    assert!(
        store
            .get_patch_set(stale.id)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    let remaining = store
        .list_patch_sets(PageRequest::unlimited())
        .await
        .expect("list");
    let ids: Vec<_> = remaining.items.iter().map(|patch_set| patch_set.id).collect();
    assert_eq!(ids, vec![attached.patch_set.id, fresh.id]);
    assert_eq!(
        store
            .count_patches(PatchFilter {
                patch_set_id: Some(stale.id),
                ..PatchFilter::default()
            })
            .await
            .expect("count"),
        0
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn preset_creation_time_drives_expiry(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut backdated = PatchSet {
        user_id: AUTHOR,
        created_at: chrono::DateTime::from_timestamp(1_600_000_000, 0).unwrap_or_default(),
        ..PatchSet::default()
    };
    store
        .create_patch_set(&mut backdated)
        .await
        .expect("created");

    assert_eq!(backdated.updated_at, backdated.created_at);
    assert_eq!(store.delete_expired_patch_sets().await.expect("sweep"), 1);
    assert_eq!(store.count_patch_sets().await.expect("count"), 0);
}
