//! Campaign aggregate and its namespace ownership.

use super::{CampaignId, ChangesetId, OrgId, PatchSetId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Owner namespace of a campaign: exactly one of a user or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Namespace {
    /// Campaign lives in a user namespace.
    User(UserId),
    /// Campaign lives in an organization namespace.
    Org(OrgId),
}

impl Namespace {
    /// Returns the user column value for persistence.
    #[must_use]
    pub const fn user_id(self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::Org(_) => None,
        }
    }

    /// Returns the organization column value for persistence.
    #[must_use]
    pub const fn org_id(self) -> Option<OrgId> {
        match self {
            Self::Org(id) => Some(id),
            Self::User(_) => None,
        }
    }

    /// Rebuilds a namespace from its two persisted columns.
    ///
    /// Returns `None` unless exactly one column is set.
    #[must_use]
    pub const fn from_columns(user: Option<UserId>, org: Option<OrgId>) -> Option<Self> {
        match (user, org) {
            (Some(user_id), None) => Some(Self::User(user_id)),
            (None, Some(org_id)) => Some(Self::Org(org_id)),
            _ => None,
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::User(UserId::default())
    }
}

/// A campaign: a named, user-owned effort to land one patch set as
/// changesets across many repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Campaign {
    /// Store-assigned identifier.
    pub id: CampaignId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Branch the published changesets are pushed to.
    pub branch: Option<String>,
    /// User that created the campaign.
    pub author_id: UserId,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Changesets attached to the campaign.
    pub changeset_ids: BTreeSet<ChangesetId>,
    /// Patch set the campaign publishes, once attached.
    pub patch_set_id: Option<PatchSetId>,
    /// Closing timestamp; closed campaigns accept no new jobs.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Returns `true` once the campaign has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Returns `true` when a patch set is attached, making its jobs claimable.
    #[must_use]
    pub const fn has_patch_set(&self) -> bool {
        self.patch_set_id.is_some()
    }

    /// Attaches a changeset, returning `false` if it was already attached.
    pub fn attach_changeset(&mut self, id: ChangesetId) -> bool {
        self.changeset_ids.insert(id)
    }

    /// Detaches a changeset, returning `false` if it was not attached.
    pub fn detach_changeset(&mut self, id: ChangesetId) -> bool {
        self.changeset_ids.remove(&id)
    }
}

/// Lifecycle filter applied when listing or counting campaigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CampaignState {
    /// Open and closed campaigns alike.
    #[default]
    Any,
    /// Campaigns without a closing timestamp.
    Open,
    /// Campaigns with a closing timestamp.
    Closed,
}

impl CampaignState {
    /// Returns `true` when the campaign satisfies this filter.
    #[must_use]
    pub const fn admits(self, campaign: &Campaign) -> bool {
        match self {
            Self::Any => true,
            Self::Open => !campaign.is_closed(),
            Self::Closed => campaign.is_closed(),
        }
    }
}
