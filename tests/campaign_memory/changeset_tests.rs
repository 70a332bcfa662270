//! Changeset and changeset event upserts in the in-memory store.

use crate::campaign_memory::helpers::{
    SteppingClock, clock, clocked_store, github_changeset, seed_campaign, seed_jobs,
};
use haussmann::campaign::{
    domain::{
        ChangesetEvent, ChangesetEventKind, ChangesetEventMetadata, ChangesetId,
        ExternalServiceType, GitHubLabelEvent, GitHubStateChangeEvent, RepoId,
    },
    ports::{
        CampaignStore, ChangesetEventFilter, ChangesetFilter, ChangesetHeadRefs,
        ExternalChangesetRef, GetChangesetEventOpts, GetChangesetJobOpts, GetChangesetOpts,
        PageRequest, StoreError,
    },
};
use rstest::rstest;
use std::sync::Arc;

fn label_event(changeset_id: ChangesetId, key: &str, label: &str) -> ChangesetEvent {
    let payload = GitHubLabelEvent {
        label: label.to_owned(),
        ..GitHubLabelEvent::default()
    };
    ChangesetEvent::new(
        changeset_id,
        ChangesetEventKind::GitHubLabeled,
        key,
        ChangesetEventMetadata::GitHubLabel(payload),
    )
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn fresh_changesets_insert_without_error(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut batch = [github_changeset(1, 10), github_changeset(2, 20)];

    store.upsert_changesets(&mut batch).await.expect("inserted");

    assert!(batch.iter().all(|changeset| !changeset.id.is_unset()));
    assert!(batch[0].id < batch[1].id);
    let found = store
        .get_changeset(GetChangesetOpts {
            external: Some(ExternalChangesetRef {
                external_id: "20".to_owned(),
                service_type: ExternalServiceType::GitHub,
            }),
            ..GetChangesetOpts::default()
        })
        .await
        .expect("found by external id");
    assert_eq!(found, batch[1]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn repeated_upsert_reports_existing_rows(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut first = [github_changeset(1, 10)];
    store.upsert_changesets(&mut first).await.expect("inserted");

    let mut batch = [github_changeset(3, 30), github_changeset(1, 10)];
    let result = store.upsert_changesets(&mut batch).await;

    let Err(StoreError::AlreadyExists { changeset_ids }) = result else {
        panic!("expected AlreadyExists, got {result:?}");
    };
    assert_eq!(changeset_ids, vec![first[0].id]);
    assert_eq!(batch[1], first[0]);
    assert!(!batch[0].id.is_unset());
    assert_eq!(
        store
            .count_changesets(ChangesetFilter::default())
            .await
            .expect("count"),
        2
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn update_rejects_a_taken_natural_key(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut batch = [github_changeset(1, 10), github_changeset(1, 11)];
    store.upsert_changesets(&mut batch).await.expect("inserted");

    let mut moved = batch[1].clone();
    moved.external_id = "10".to_owned();
    let result = store.update_changesets(std::slice::from_mut(&mut moved)).await;

    assert!(matches!(result, Err(StoreError::Persistence(_))));
    let unchanged = store
        .get_changeset(GetChangesetOpts::by_id(batch[1].id))
        .await
        .expect("still stored");
    assert_eq!(unchanged.external_id, "11");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn event_upsert_merges_on_natural_key(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut changesets = [github_changeset(1, 10)];
    store.upsert_changesets(&mut changesets).await.expect("inserted");
    let changeset_id = changesets[0].id;

    let mut first = [label_event(changeset_id, "label-1", "bug")];
    store
        .upsert_changeset_events(&mut first)
        .await
        .expect("inserted");
    let mut second = [label_event(changeset_id, "label-1", "enhancement")];
    store
        .upsert_changeset_events(&mut second)
        .await
        .expect("merged");

    assert_eq!(second[0].id, first[0].id);
    assert_eq!(second[0].created_at, first[0].created_at);
    assert!(second[0].updated_at > first[0].updated_at);
    let stored = store
        .get_changeset_event(GetChangesetEventOpts {
            key: Some(second[0].natural_key()),
            ..GetChangesetEventOpts::default()
        })
        .await
        .expect("found by key");
    assert_eq!(stored.metadata, second[0].metadata);
    let events = store
        .count_changeset_events(ChangesetEventFilter {
            changeset_ids: vec![changeset_id],
        })
        .await
        .expect("count");
    assert_eq!(events, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn event_batch_with_repeated_key_is_rejected(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut changesets = [github_changeset(1, 10)];
    store.upsert_changesets(&mut changesets).await.expect("inserted");
    let changeset_id = changesets[0].id;

    let mut batch = [
        label_event(changeset_id, "label-1", "bug"),
        label_event(changeset_id, "label-1", "feature"),
    ];
    let result = store.upsert_changeset_events(&mut batch).await;

    assert!(matches!(result, Err(StoreError::DuplicateEventKey(_))));
    let events = store
        .list_changeset_events(ChangesetEventFilter::default(), PageRequest::default())
        .await
        .expect("list");
    assert!(events.items.is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn event_for_unknown_changeset_leaves_no_trace(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut changesets = [github_changeset(1, 10)];
    store.upsert_changesets(&mut changesets).await.expect("inserted");

    let mut batch = [
        label_event(changesets[0].id, "label-1", "bug"),
        label_event(ChangesetId::new(999), "label-2", "bug"),
    ];
    let result = store.upsert_changeset_events(&mut batch).await;

    assert!(matches!(result, Err(StoreError::Persistence(_))));
    assert_eq!(
        store
            .count_changeset_events(ChangesetEventFilter::default())
            .await
            .expect("count"),
        0
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_changeset_clears_events_and_job_links(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let seeded = seed_campaign(&store, "Publish", &[1]).await.expect("seeded");
    let mut jobs = seed_jobs(&store, &seeded).await.expect("jobs");
    let mut changesets = [github_changeset(1, 10)];
    store.upsert_changesets(&mut changesets).await.expect("inserted");
    let changeset_id = changesets[0].id;
    let mut events = [label_event(changeset_id, "label-1", "bug")];
    store
        .upsert_changeset_events(&mut events)
        .await
        .expect("event inserted");
    let job = &mut jobs[0];
    job.changeset_id = Some(changeset_id);
    store.update_changeset_job(job).await.expect("job linked");

    store
        .delete_changeset(changeset_id)
        .await
        .expect("deleted");

    let relinked = store
        .get_changeset_job(GetChangesetJobOpts::by_id(job.id))
        .await
        .expect("job survives");
    assert_eq!(relinked.changeset_id, None);
    assert_eq!(
        store
            .count_changeset_events(ChangesetEventFilter::default())
            .await
            .expect("count"),
        0
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn sync_data_reports_latest_event(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut changesets = [github_changeset(1, 10), github_changeset(2, 20)];
    store.upsert_changesets(&mut changesets).await.expect("inserted");
    let closed = ChangesetEvent::new(
        changesets[0].id,
        ChangesetEventKind::GitHubClosed,
        "closed-1",
        ChangesetEventMetadata::GitHubStateChange(GitHubStateChangeEvent::default()),
    );
    let mut events = [label_event(changesets[0].id, "label-1", "bug"), closed];
    store
        .upsert_changeset_events(&mut events)
        .await
        .expect("events inserted");

    let sync = store.list_changeset_sync_data().await.expect("sync data");

    assert_eq!(sync.len(), 2);
    let latest = events.iter().map(|event| event.updated_at).max();
    let first = sync
        .iter()
        .find(|entry| entry.changeset_id == changesets[0].id)
        .expect("first changeset listed");
    let second = sync
        .iter()
        .find(|entry| entry.changeset_id == changesets[1].id)
        .expect("second changeset listed");
    assert_eq!(first.latest_event, latest);
    assert_eq!(second.latest_event, None);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn head_refs_resolve_to_external_ids(clock: Arc<SteppingClock>) {
    let store = clocked_store(&clock);
    let mut batch = [
        github_changeset(1, 10),
        github_changeset(1, 11),
        github_changeset(2, 12),
        github_changeset(1, 13),
    ];
    let branches = ["campaign/a", "campaign/b", "campaign/a", ""];
    for (changeset, branch) in batch.iter_mut().zip(branches) {
        changeset.external_branch = branch.to_owned();
    }
    store.upsert_changesets(&mut batch).await.expect("inserted");

    let ids = store
        .get_changeset_external_ids(ChangesetHeadRefs {
            repo_id: RepoId::new(1),
            service_type: ExternalServiceType::GitHub,
            refs: vec![String::new(), "campaign/b".to_owned(), "campaign/a".to_owned()],
        })
        .await
        .expect("lookup");
    let none = store
        .get_changeset_external_ids(ChangesetHeadRefs {
            repo_id: RepoId::new(1),
            service_type: ExternalServiceType::GitHub,
            refs: vec![String::new()],
        })
        .await
        .expect("lookup");

    assert_eq!(ids, vec!["10".to_owned(), "11".to_owned()]);
    assert!(none.is_empty());
}
