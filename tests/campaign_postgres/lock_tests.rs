//! Advisory locks held by database transactions.

use crate::campaign_postgres::helpers::store_context;
use haussmann::campaign::ports::{CampaignStore, StoreError};
use pg_embedded_setup_unpriv::{TestCluster, test_support::shared_test_cluster};
use rstest::rstest;

#[rstest]
fn advisory_lock_is_exclusive_until_commit(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "advisory_lock");
    let store = ctx.store.clone();

    ctx.rt.block_on(async {
        let holder = store.transact().await.expect("holder");
        let contender = store.transact().await.expect("contender");

        assert!(
            holder
                .try_acquire_advisory_lock("campaign-sync")
                .await
                .expect("lock")
        );
        assert!(
            !contender
                .try_acquire_advisory_lock("campaign-sync")
                .await
                .expect("contended lock")
        );
        assert!(
            contender
                .try_acquire_advisory_lock("other-key")
                .await
                .expect("unrelated lock")
        );

        holder.done(Ok(())).await.expect("commit");
        let later = store.transact().await.expect("later");
        assert!(
            later
                .try_acquire_advisory_lock("campaign-sync")
                .await
                .expect("released lock")
        );
        later.done(Ok(())).await.expect("commit");
        contender.done(Ok(())).await.expect("commit");
    });
}

#[rstest]
fn advisory_lock_requires_a_transaction(shared_test_cluster: &'static TestCluster) {
    let ctx = store_context(shared_test_cluster, "advisory_no_tx");
    let store = ctx.store.clone();

    let result = ctx.rt.block_on(store.try_acquire_advisory_lock("campaign-sync"));

    assert!(matches!(result, Err(StoreError::NotInTransaction)));
}
