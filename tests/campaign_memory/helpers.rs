//! Shared fixtures for in-memory campaign store integration tests.

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use haussmann::campaign::{
    adapters::memory::InMemoryCampaignStore,
    domain::{
        Campaign, Changeset, ChangesetJob, ChangesetMetadata, GitHubPullRequest, Namespace, Patch,
        PatchSet, RepoId, UserId,
    },
    ports::{CampaignStore, StoreResult},
};
use mockable::Clock;
use rstest::fixture;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Author used for every seeded record.
pub const AUTHOR: UserId = UserId::new(1);

/// Clock that starts at a fixed instant and advances one second per reading.
#[derive(Debug)]
pub struct SteppingClock {
    seconds: AtomicI64,
}

impl SteppingClock {
    /// Starts the clock at the given Unix time.
    #[must_use]
    pub const fn starting_at(seconds: i64) -> Self {
        Self {
            seconds: AtomicI64::new(seconds),
        }
    }

    /// Moves the clock forward without reading it.
    pub fn advance(&self, delta: TimeDelta) {
        self.seconds.fetch_add(delta.num_seconds(), Ordering::SeqCst);
    }
}

impl Clock for SteppingClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        let seconds = self.seconds.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_opt(seconds, 0)
            .single()
            .unwrap_or_default()
    }
}

/// Provides a fresh store for each test.
#[fixture]
pub fn store() -> InMemoryCampaignStore {
    InMemoryCampaignStore::new()
}

/// Provides a stepping clock shared with a store built by [`clocked_store`].
#[fixture]
pub fn clock() -> Arc<SteppingClock> {
    Arc::new(SteppingClock::starting_at(1_700_000_000))
}

/// Builds a store whose timestamps come from `clock`.
#[must_use]
pub fn clocked_store(clock: &Arc<SteppingClock>) -> InMemoryCampaignStore {
    InMemoryCampaignStore::new().with_clock(Arc::clone(clock) as Arc<dyn Clock + Send + Sync>)
}

/// A campaign attached to a patch set with one patch per repository.
pub struct SeededCampaign {
    pub campaign: Campaign,
    pub patch_set: PatchSet,
    pub patches: Vec<Patch>,
}

/// Creates a patch set holding one patch for each of `repos`.
///
/// # Errors
///
/// Returns the first store error encountered.
pub async fn seed_patch_set(
    store: &InMemoryCampaignStore,
    repos: &[i32],
) -> StoreResult<(PatchSet, Vec<Patch>)> {
    let mut patch_set = PatchSet {
        user_id: AUTHOR,
        ..PatchSet::default()
    };
    store.create_patch_set(&mut patch_set).await?;
    let mut patches = Vec::with_capacity(repos.len());
    for repo in repos {
        let mut patch = Patch {
            patch_set_id: patch_set.id,
            repo_id: RepoId::new(*repo),
            rev: format!("rev-{repo}"),
            base_ref: "refs/heads/main".to_owned(),
            diff: format!("+change for {repo}\n"),
            ..Patch::default()
        };
        store.create_patch(&mut patch).await?;
        patches.push(patch);
    }
    Ok((patch_set, patches))
}

/// Creates a campaign publishing a fresh patch set over `repos`.
///
/// # Errors
///
/// Returns the first store error encountered.
pub async fn seed_campaign(
    store: &InMemoryCampaignStore,
    name: &str,
    repos: &[i32],
) -> StoreResult<SeededCampaign> {
    let (patch_set, patches) = seed_patch_set(store, repos).await?;
    let mut campaign = Campaign {
        name: name.to_owned(),
        author_id: AUTHOR,
        namespace: Namespace::User(AUTHOR),
        patch_set_id: Some(patch_set.id),
        ..Campaign::default()
    };
    store.create_campaign(&mut campaign).await?;
    Ok(SeededCampaign {
        campaign,
        patch_set,
        patches,
    })
}

/// Creates one pending job per patch of a seeded campaign.
///
/// # Errors
///
/// Returns the first store error encountered.
pub async fn seed_jobs(
    store: &InMemoryCampaignStore,
    seeded: &SeededCampaign,
) -> StoreResult<Vec<ChangesetJob>> {
    let mut jobs = Vec::with_capacity(seeded.patches.len());
    for patch in &seeded.patches {
        let mut job = ChangesetJob::new(seeded.campaign.id, patch.id, "campaign/branch");
        store.create_changeset_job(&mut job).await?;
        jobs.push(job);
    }
    Ok(jobs)
}

/// Builds an unsaved GitHub changeset.
#[must_use]
pub fn github_changeset(repo: i32, number: i64) -> Changeset {
    Changeset::new(
        RepoId::new(repo),
        number.to_string(),
        ChangesetMetadata::GitHub(GitHubPullRequest {
            number,
            title: format!("Campaign change #{number}"),
            ..GitHubPullRequest::default()
        }),
    )
}
