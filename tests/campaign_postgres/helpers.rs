//! Shared helpers for `PostgreSQL` campaign store integration tests.
//!
//! Every test gets its own database cloned from a template that already has
//! the campaign schema applied.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use haussmann::campaign::{
    adapters::postgres::PostgresCampaignStore,
    domain::{
        Campaign, Changeset, ChangesetJob, ChangesetMetadata, GitHubPullRequest, Namespace, Patch,
        PatchSet, RepoId, UserId,
    },
    ports::{CampaignStore, StoreResult},
};
use pg_embedded_setup_unpriv::TestCluster;
use tokio::runtime::Runtime;

/// SQL creating the campaign schema.
const CREATE_CAMPAIGN_TABLES_SQL: &str =
    include_str!("../../migrations/2026-03-02-000000_create_campaign_tables/up.sql");

/// Template database name for the pre-migrated schema.
const TEMPLATE_DB: &str = "haussmann_test_template";

/// Connections per test pool; claims hold one for the whole transaction.
const POOL_SIZE: u32 = 4;

/// Boxed error used by fallible helpers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Author used for every seeded record.
pub const AUTHOR: UserId = UserId::new(1);

/// Creates a tokio runtime able to drive concurrent store calls.
pub fn test_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to create test runtime")
}

/// Ensures the template database exists with the schema applied.
pub fn ensure_template(cluster: &TestCluster) -> Result<(), BoxError> {
    cluster
        .ensure_template_exists(TEMPLATE_DB, |db_name| {
            let url = cluster.connection().database_url(db_name);
            let mut conn = PgConnection::establish(&url).map_err(|e| eyre::eyre!("{e}"))?;
            conn.batch_execute(CREATE_CAMPAIGN_TABLES_SQL)
                .map_err(|e| eyre::eyre!("applying campaign schema: {e}"))?;
            Ok(())
        })
        .map_err(|e| Box::new(e) as BoxError)?;
    Ok(())
}

/// Creates a test database from the template and returns a store over it.
pub fn setup_store(cluster: &TestCluster, db_name: &str) -> Result<PostgresCampaignStore, BoxError> {
    cluster
        .create_database_from_template(db_name, TEMPLATE_DB)
        .map_err(|e| Box::new(e) as BoxError)?;
    let url = cluster.connection().database_url(db_name);
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .build(ConnectionManager::<PgConnection>::new(url))
        .map_err(|e| Box::new(e) as BoxError)?;
    Ok(PostgresCampaignStore::new(pool))
}

/// Guard that drops the test database even if the test panics.
pub struct CleanupGuard<'a> {
    cluster: &'a TestCluster,
    db_name: String,
}

impl<'a> CleanupGuard<'a> {
    pub const fn new(cluster: &'a TestCluster, db_name: String) -> Self {
        Self { cluster, db_name }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cluster.drop_database(self.db_name.as_str()) {
            eprintln!("Warning: failed to drop test database {}: {e}", self.db_name);
        }
    }
}

/// Per-test database, store and runtime.
pub struct StoreContext {
    pub store: PostgresCampaignStore,
    pub rt: Runtime,
    _guard: CleanupGuard<'static>,
}

/// Prepares a fresh database named after `prefix`.
pub fn store_context(cluster: &'static TestCluster, prefix: &str) -> StoreContext {
    ensure_template(cluster).expect("template setup");
    let db_name = format!("{prefix}_{}", uuid::Uuid::new_v4().simple());
    let guard = CleanupGuard::new(cluster, db_name.clone());
    let store = setup_store(cluster, &db_name).expect("store setup");
    StoreContext {
        store,
        rt: test_runtime(),
        _guard: guard,
    }
}

/// A campaign attached to a patch set with one patch per repository.
pub struct SeededCampaign {
    pub campaign: Campaign,
    pub patch_set: PatchSet,
    pub patches: Vec<Patch>,
    pub jobs: Vec<ChangesetJob>,
}

/// Creates a campaign, its patch set, one patch per repository and one
/// pending job per patch.
pub async fn seed_campaign(
    store: &PostgresCampaignStore,
    name: &str,
    repos: &[i32],
) -> StoreResult<SeededCampaign> {
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
    let mut campaign = Campaign {
        name: name.to_owned(),
        author_id: AUTHOR,
        namespace: Namespace::User(AUTHOR),
        patch_set_id: Some(patch_set.id),
        ..Campaign::default()
    };
    store.create_campaign(&mut campaign).await?;
    let mut jobs = Vec::with_capacity(patches.len());
    for patch in &patches {
        let mut job = ChangesetJob::new(campaign.id, patch.id, "campaign/branch");
        store.create_changeset_job(&mut job).await?;
        jobs.push(job);
    }
    Ok(SeededCampaign {
        campaign,
        patch_set,
        patches,
        jobs,
    })
}

/// Builds an unsaved GitHub changeset.
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
