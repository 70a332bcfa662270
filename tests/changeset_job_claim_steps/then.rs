//! Then steps for changeset job claim scenarios.

use super::world::{ClaimWorld, run_async};
use eyre::WrapErr;
use haussmann::campaign::ports::{CampaignStore, ChangesetFilter};
use rstest_bdd_macros::then;
use std::collections::HashSet;

#[then("{count:i64} changesets are published")]
fn changesets_published(world: &ClaimWorld, count: i64) -> Result<(), eyre::Report> {
    let campaign_id = world.campaign()?.id;
    let stored = run_async(world.store.count_changesets(ChangesetFilter {
        campaign_id: Some(campaign_id),
        ..ChangesetFilter::default()
    }))
    .wrap_err("count changesets")?;
    if stored != count {
        return Err(eyre::eyre!("expected {count} changesets, found {stored}"));
    }
    Ok(())
}

#[then("every patch was sent to the code host once")]
fn every_patch_sent_once(world: &ClaimWorld) -> Result<(), eyre::Report> {
    let sent = world.publisher.sent();
    let unique: HashSet<_> = sent.iter().copied().collect();
    let expected: HashSet<_> = world.patches.iter().map(|patch| patch.id).collect();
    if sent.len() != unique.len() || unique != expected {
        return Err(eyre::eyre!("unexpected publications: {sent:?}"));
    }
    Ok(())
}

#[then(r#"the campaign status is "{state}""#)]
fn campaign_status_is(world: &ClaimWorld, state: String) -> Result<(), eyre::Report> {
    let campaign_id = world.campaign()?.id;
    let status = run_async(world.store.get_campaign_status(campaign_id))
        .wrap_err("load campaign status")?;
    let actual = status.state().as_str();
    if actual != state {
        return Err(eyre::eyre!("expected status {state}, found {actual}"));
    }
    Ok(())
}

#[then(r#"the campaign reports the error "{message}""#)]
fn campaign_reports_error(world: &ClaimWorld, message: String) -> Result<(), eyre::Report> {
    let campaign_id = world.campaign()?.id;
    let status = run_async(world.store.get_campaign_status(campaign_id))
        .wrap_err("load campaign status")?;
    if status.process_errors != [message.clone()] {
        return Err(eyre::eyre!(
            "expected error {message:?}, found {:?}",
            status.process_errors
        ));
    }
    Ok(())
}
