//! Changesets: pull or merge requests tracked on an external code host.

use super::{CampaignId, ChangesetId, ChangesetMetadata, ParseEnumError, RepoId};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Code host a changeset lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalServiceType {
    /// GitHub pull requests.
    GitHub,
    /// Bitbucket Server pull requests.
    BitbucketServer,
}

impl ExternalServiceType {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::BitbucketServer => "bitbucketServer",
        }
    }
}

impl TryFrom<&str> for ExternalServiceType {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "github" => Ok(Self::GitHub),
            "bitbucketServer" => Ok(Self::BitbucketServer),
            _ => Err(ParseEnumError::new("external service type", value)),
        }
    }
}

/// Lifecycle state of a changeset on its code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangesetState {
    /// Open for review.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged into its base branch.
    Merged,
    /// Removed from the code host.
    Deleted,
}

impl ChangesetState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Merged => "MERGED",
            Self::Deleted => "DELETED",
        }
    }
}

impl TryFrom<&str> for ChangesetState {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            "MERGED" => Ok(Self::Merged),
            "DELETED" => Ok(Self::Deleted),
            _ => Err(ParseEnumError::new("changeset state", value)),
        }
    }
}

/// Aggregate review verdict on a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangesetReviewState {
    /// At least one approval and no outstanding change requests.
    Approved,
    /// A reviewer requested changes.
    ChangesRequested,
    /// Waiting for review.
    Pending,
    /// Reviewed with comments only.
    Commented,
    /// A prior review was dismissed.
    Dismissed,
}

impl ChangesetReviewState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::ChangesRequested => "CHANGES_REQUESTED",
            Self::Pending => "PENDING",
            Self::Commented => "COMMENTED",
            Self::Dismissed => "DISMISSED",
        }
    }
}

impl TryFrom<&str> for ChangesetReviewState {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "APPROVED" => Ok(Self::Approved),
            "CHANGES_REQUESTED" => Ok(Self::ChangesRequested),
            "PENDING" => Ok(Self::Pending),
            "COMMENTED" => Ok(Self::Commented),
            "DISMISSED" => Ok(Self::Dismissed),
            _ => Err(ParseEnumError::new("changeset review state", value)),
        }
    }
}

/// Aggregate CI check verdict on a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangesetCheckState {
    /// Checks still running.
    Pending,
    /// All checks passed.
    Passed,
    /// At least one check failed.
    Failed,
}

impl ChangesetCheckState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

impl TryFrom<&str> for ChangesetCheckState {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "PASSED" => Ok(Self::Passed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ParseEnumError::new("changeset check state", value)),
        }
    }
}

/// A pull or merge request on an external code host.
///
/// The pair (`repo_id`, `external_id`) is unique across the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    /// Store-assigned identifier.
    pub id: ChangesetId,
    /// Repository the changeset targets.
    pub repo_id: RepoId,
    /// Creation timestamp; doubles as the upsert existence sentinel.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Host-specific payload; its variant fixes the external service type.
    pub metadata: ChangesetMetadata,
    /// Campaigns the changeset belongs to.
    pub campaign_ids: BTreeSet<CampaignId>,
    /// Identifier of the changeset on its code host.
    pub external_id: String,
    /// Head branch on the code host.
    pub external_branch: String,
    /// When the code host reported the changeset as deleted.
    pub external_deleted_at: Option<DateTime<Utc>>,
    /// Last modification reported by the code host.
    pub external_updated_at: Option<DateTime<Utc>>,
    /// Lifecycle state on the code host.
    pub external_state: Option<ChangesetState>,
    /// Review verdict on the code host.
    pub external_review_state: Option<ChangesetReviewState>,
    /// CI verdict on the code host.
    pub external_check_state: Option<ChangesetCheckState>,
}

impl Changeset {
    /// Creates an unsaved changeset for the given repository and host id.
    #[must_use]
    pub fn new(repo_id: RepoId, external_id: impl Into<String>, metadata: ChangesetMetadata) -> Self {
        Self {
            id: ChangesetId::default(),
            repo_id,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            metadata,
            campaign_ids: BTreeSet::new(),
            external_id: external_id.into(),
            external_branch: String::new(),
            external_deleted_at: None,
            external_updated_at: None,
            external_state: None,
            external_review_state: None,
            external_check_state: None,
        }
    }

    /// Returns the code host the changeset lives on.
    #[must_use]
    pub const fn external_service_type(&self) -> ExternalServiceType {
        self.metadata.service_type()
    }

    /// Adds the changeset to a campaign, returning `false` if already present.
    pub fn add_campaign(&mut self, id: CampaignId) -> bool {
        self.campaign_ids.insert(id)
    }

    /// Returns `true` when the code host reported the changeset as deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.external_deleted_at.is_some()
    }
}

/// Freshness summary used to schedule changeset syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesetSyncData {
    /// Changeset being summarised.
    pub changeset_id: ChangesetId,
    /// When the store last wrote the changeset.
    pub updated_at: DateTime<Utc>,
    /// Most recent `updated_at` among the changeset's events.
    pub latest_event: Option<DateTime<Utc>>,
    /// Last modification reported by the code host.
    pub external_updated_at: Option<DateTime<Utc>>,
}
