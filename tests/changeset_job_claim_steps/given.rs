//! Given steps for changeset job claim scenarios.

use super::world::{ClaimWorld, run_async};
use eyre::WrapErr;
use haussmann::campaign::{
    domain::{Campaign, ChangesetJob, Namespace, Patch, PatchSet, RepoId, UserId},
    ports::CampaignStore,
};
use rstest_bdd_macros::given;

const AUTHOR: UserId = UserId::new(7);

#[given(r#"a campaign "{name}" with patches for {count:usize} repositories"#)]
fn campaign_with_patches(
    world: &mut ClaimWorld,
    name: String,
    count: usize,
) -> Result<(), eyre::Report> {
    let store = world.store.clone();
    let (campaign, patches) = run_async(async move {
        let mut patch_set = PatchSet {
            user_id: AUTHOR,
            ..PatchSet::default()
        };
        store.create_patch_set(&mut patch_set).await?;
        let mut patches = Vec::with_capacity(count);
        for repo in (1..).take(count) {
            let mut patch = Patch {
                patch_set_id: patch_set.id,
                repo_id: RepoId::new(repo),
                rev: format!("rev-{repo}"),
                base_ref: "refs/heads/main".to_owned(),
                diff: "+campaign change\n".to_owned(),
                ..Patch::default()
            };
            store.create_patch(&mut patch).await?;
            patches.push(patch);
        }
        let mut campaign = Campaign {
            name,
            author_id: AUTHOR,
            namespace: Namespace::User(AUTHOR),
            patch_set_id: Some(patch_set.id),
            ..Campaign::default()
        };
        store.create_campaign(&mut campaign).await?;
        Ok::<_, haussmann::campaign::ports::StoreError>((campaign, patches))
    })
    .wrap_err("seed campaign with patches")?;
    world.campaign = Some(campaign);
    world.patches = patches;
    Ok(())
}

#[given("a pending changeset job for every patch")]
fn pending_job_per_patch(world: &mut ClaimWorld) -> Result<(), eyre::Report> {
    let campaign_id = world.campaign()?.id;
    for patch in &world.patches {
        let mut job = ChangesetJob::new(campaign_id, patch.id, "campaign/branch");
        run_async(world.store.create_changeset_job(&mut job)).wrap_err("create changeset job")?;
    }
    Ok(())
}

#[given("the code host rejects repository {repo:i32}")]
fn code_host_rejects(world: &mut ClaimWorld, repo: i32) {
    world.publisher.reject(RepoId::new(repo));
}

#[given("the campaign is detached from its patch set")]
fn campaign_detached(world: &mut ClaimWorld) -> Result<(), eyre::Report> {
    let mut campaign = world.campaign()?.clone();
    campaign.patch_set_id = None;
    run_async(world.store.update_campaign(&mut campaign)).wrap_err("detach patch set")?;
    world.campaign = Some(campaign);
    Ok(())
}
