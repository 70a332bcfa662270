//! Diesel row models for campaign persistence and their domain conversions.

use super::schema::{campaigns, changeset_events, changeset_jobs, changesets, patch_sets, patches};
use crate::campaign::{
    domain::{
        Campaign, CampaignId, Changeset, ChangesetCheckState, ChangesetEvent, ChangesetEventId,
        ChangesetEventKind, ChangesetEventMetadata, ChangesetId, ChangesetJob, ChangesetJobId,
        ChangesetMetadata, ChangesetReviewState, ChangesetState, Namespace, OrgId, Patch, PatchId,
        PatchSet, PatchSetId, RepoId, UserId,
    },
    ports::{StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Query result row for patch sets.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = patch_sets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PatchSetRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning user.
    pub user_id: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert and update model for patch sets.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = patch_sets)]
pub struct PatchSetChanges {
    /// Owning user.
    pub user_id: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query result row for campaigns.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = campaigns)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CampaignRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Publication branch.
    pub branch: Option<String>,
    /// Creating user.
    pub author_id: i32,
    /// Owning user namespace.
    pub namespace_user_id: Option<i32>,
    /// Owning organization namespace.
    pub namespace_org_id: Option<i32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Attached changesets as a JSON set.
    pub changeset_ids: Value,
    /// Patch set being published.
    pub patch_set_id: Option<i64>,
    /// Closing timestamp.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Insert and update model for campaigns.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = campaigns)]
#[diesel(treat_none_as_null = true)]
pub struct CampaignChanges {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Publication branch.
    pub branch: Option<String>,
    /// Creating user.
    pub author_id: i32,
    /// Owning user namespace.
    pub namespace_user_id: Option<i32>,
    /// Owning organization namespace.
    pub namespace_org_id: Option<i32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Attached changesets as a JSON set.
    pub changeset_ids: Value,
    /// Patch set being published.
    pub patch_set_id: Option<i64>,
    /// Closing timestamp.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Query result row for patches.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = patches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PatchRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning patch set.
    pub patch_set_id: i64,
    /// Target repository.
    pub repo_id: i32,
    /// Base commit.
    pub rev: String,
    /// Target ref.
    pub base_ref: String,
    /// Unified diff.
    pub diff: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert and update model for patches.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = patches)]
pub struct PatchChanges {
    /// Owning patch set.
    pub patch_set_id: i64,
    /// Target repository.
    pub repo_id: i32,
    /// Base commit.
    pub rev: String,
    /// Target ref.
    pub base_ref: String,
    /// Unified diff.
    pub diff: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query result row for changesets.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = changesets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChangesetRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Target repository.
    pub repo_id: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Host-specific payload.
    pub metadata: Value,
    /// Owning campaigns as a JSON set.
    pub campaign_ids: Value,
    /// Identifier on the code host.
    pub external_id: String,
    /// Code host discriminator.
    pub external_service_type: String,
    /// Head branch.
    pub external_branch: String,
    /// Host-reported deletion time.
    pub external_deleted_at: Option<DateTime<Utc>>,
    /// Host-reported modification time.
    pub external_updated_at: Option<DateTime<Utc>>,
    /// Host lifecycle state.
    pub external_state: Option<String>,
    /// Host review verdict.
    pub external_review_state: Option<String>,
    /// Host CI verdict.
    pub external_check_state: Option<String>,
}

/// Query result row for changeset events.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = changeset_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChangesetEventRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning changeset.
    pub changeset_id: i64,
    /// Event kind.
    pub kind: String,
    /// Host-provided key.
    pub key: String,
    /// First time the store saw the event.
    pub created_at: DateTime<Utc>,
    /// Last time the store wrote the event.
    pub updated_at: DateTime<Utc>,
    /// Kind-specific payload.
    pub metadata: Value,
}

/// Query result row for changeset jobs.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = changeset_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChangesetJobRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Campaign being published.
    pub campaign_id: i64,
    /// Patch being published.
    pub patch_id: i64,
    /// Produced changeset.
    pub changeset_id: Option<i64>,
    /// Pushed branch.
    pub branch: String,
    /// Failure message.
    pub error: Option<String>,
    /// Claim timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert and update model for changeset jobs.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = changeset_jobs)]
#[diesel(treat_none_as_null = true)]
pub struct ChangesetJobChanges {
    /// Campaign being published.
    pub campaign_id: i64,
    /// Patch being published.
    pub patch_id: i64,
    /// Produced changeset.
    pub changeset_id: Option<i64>,
    /// Pushed branch.
    pub branch: String,
    /// Failure message.
    pub error: Option<String>,
    /// Claim timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JSON id sets
// ---------------------------------------------------------------------------

/// Encodes ids as a JSON object whose keys are the ids, so the `?` operator
/// tests membership.
pub fn encode_id_set(ids: impl IntoIterator<Item = i64>) -> Value {
    let set: Map<String, Value> = ids
        .into_iter()
        .map(|id| (id.to_string(), Value::Null))
        .collect();
    Value::Object(set)
}

/// Decodes a JSON id set written by [`encode_id_set`].
pub fn decode_id_set<T: From<i64> + Ord>(value: &Value) -> StoreResult<BTreeSet<T>> {
    let Value::Object(set) = value else {
        return Err(StoreError::invalid_persisted_data(InvalidIdSet(
            value.to_string(),
        )));
    };
    set.keys()
        .map(|key| {
            key.parse::<i64>()
                .map(T::from)
                .map_err(|_| StoreError::invalid_persisted_data(InvalidIdSet(key.clone())))
        })
        .collect()
}

/// A persisted id set that is not an object of integer keys.
#[derive(Debug, thiserror::Error)]
#[error("invalid id set entry: {0}")]
struct InvalidIdSet(String);

/// A campaign row whose namespace columns are both set or both unset.
#[derive(Debug, thiserror::Error)]
#[error("campaign {0} does not have exactly one namespace")]
struct InvalidNamespace(i64);

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

pub fn row_to_patch_set(row: PatchSetRow) -> PatchSet {
    PatchSet {
        id: PatchSetId::new(row.id),
        user_id: UserId::new(row.user_id),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub const fn patch_set_changes(patch_set: &PatchSet) -> PatchSetChanges {
    PatchSetChanges {
        user_id: patch_set.user_id.into_inner(),
        created_at: patch_set.created_at,
        updated_at: patch_set.updated_at,
    }
}

pub fn row_to_campaign(row: CampaignRow) -> StoreResult<Campaign> {
    let CampaignRow {
        id,
        name,
        description,
        branch,
        author_id,
        namespace_user_id,
        namespace_org_id,
        created_at,
        updated_at,
        changeset_ids,
        patch_set_id,
        closed_at,
    } = row;

    let namespace = Namespace::from_columns(
        namespace_user_id.map(UserId::new),
        namespace_org_id.map(OrgId::new),
    )
    .ok_or_else(|| StoreError::invalid_persisted_data(InvalidNamespace(id)))?;

    Ok(Campaign {
        id: CampaignId::new(id),
        name,
        description,
        branch,
        author_id: UserId::new(author_id),
        namespace,
        created_at,
        updated_at,
        changeset_ids: decode_id_set(&changeset_ids)?,
        patch_set_id: patch_set_id.map(PatchSetId::new),
        closed_at,
    })
}

pub fn campaign_changes(campaign: &Campaign) -> CampaignChanges {
    CampaignChanges {
        name: campaign.name.clone(),
        description: campaign.description.clone(),
        branch: campaign.branch.clone(),
        author_id: campaign.author_id.into_inner(),
        namespace_user_id: campaign.namespace.user_id().map(UserId::into_inner),
        namespace_org_id: campaign.namespace.org_id().map(OrgId::into_inner),
        created_at: campaign.created_at,
        updated_at: campaign.updated_at,
        changeset_ids: encode_id_set(campaign.changeset_ids.iter().map(|id| id.into_inner())),
        patch_set_id: campaign.patch_set_id.map(PatchSetId::into_inner),
        closed_at: campaign.closed_at,
    }
}

pub fn row_to_patch(row: PatchRow) -> Patch {
    Patch {
        id: PatchId::new(row.id),
        patch_set_id: PatchSetId::new(row.patch_set_id),
        repo_id: RepoId::new(row.repo_id),
        rev: row.rev,
        base_ref: row.base_ref,
        diff: row.diff,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn patch_changes(patch: &Patch) -> PatchChanges {
    PatchChanges {
        patch_set_id: patch.patch_set_id.into_inner(),
        repo_id: patch.repo_id.into_inner(),
        rev: patch.rev.clone(),
        base_ref: patch.base_ref.clone(),
        diff: patch.diff.clone(),
        created_at: patch.created_at,
        updated_at: patch.updated_at,
    }
}

fn parse_optional<T, E>(
    value: Option<String>,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> StoreResult<Option<T>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| parse(&raw).map_err(StoreError::invalid_persisted_data))
        .transpose()
}

pub fn row_to_changeset(row: ChangesetRow) -> StoreResult<Changeset> {
    let ChangesetRow {
        id,
        repo_id,
        created_at,
        updated_at,
        metadata,
        campaign_ids,
        external_id,
        external_service_type,
        external_branch,
        external_deleted_at,
        external_updated_at,
        external_state,
        external_review_state,
        external_check_state,
    } = row;

    let metadata = ChangesetMetadata::decode(&external_service_type, metadata)
        .map_err(StoreError::invalid_persisted_data)?;

    Ok(Changeset {
        id: ChangesetId::new(id),
        repo_id: RepoId::new(repo_id),
        created_at,
        updated_at,
        metadata,
        campaign_ids: decode_id_set(&campaign_ids)?,
        external_id,
        external_branch,
        external_deleted_at,
        external_updated_at,
        external_state: parse_optional(external_state, |raw| ChangesetState::try_from(raw))?,
        external_review_state: parse_optional(external_review_state, |raw| {
            ChangesetReviewState::try_from(raw)
        })?,
        external_check_state: parse_optional(external_check_state, |raw| {
            ChangesetCheckState::try_from(raw)
        })?,
    })
}

pub fn row_to_changeset_event(row: ChangesetEventRow) -> StoreResult<ChangesetEvent> {
    let ChangesetEventRow {
        id,
        changeset_id,
        kind,
        key,
        created_at,
        updated_at,
        metadata,
    } = row;

    let metadata = ChangesetEventMetadata::decode(&kind, metadata)
        .map_err(StoreError::invalid_persisted_data)?;
    let kind = ChangesetEventKind::try_from(kind.as_str())
        .map_err(StoreError::invalid_persisted_data)?;

    Ok(ChangesetEvent {
        id: ChangesetEventId::new(id),
        changeset_id: ChangesetId::new(changeset_id),
        kind,
        key,
        created_at,
        updated_at,
        metadata,
    })
}

pub fn row_to_changeset_job(row: ChangesetJobRow) -> ChangesetJob {
    ChangesetJob {
        id: ChangesetJobId::new(row.id),
        campaign_id: CampaignId::new(row.campaign_id),
        patch_id: PatchId::new(row.patch_id),
        changeset_id: row.changeset_id.map(ChangesetId::new),
        branch: row.branch,
        error: row.error,
        started_at: row.started_at,
        finished_at: row.finished_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn changeset_job_changes(job: &ChangesetJob) -> ChangesetJobChanges {
    ChangesetJobChanges {
        campaign_id: job.campaign_id.into_inner(),
        patch_id: job.patch_id.into_inner(),
        changeset_id: job.changeset_id.map(ChangesetId::into_inner),
        branch: job.branch.clone(),
        error: job.error.clone(),
        started_at: job.started_at,
        finished_at: job.finished_at,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }
}
