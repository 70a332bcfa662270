//! Patch sets and the per-repository patches they bundle.

use super::{PatchId, PatchSetId, RepoId, UserId};
use chrono::{DateTime, Utc};

/// A computed set of patches awaiting attachment to a campaign.
///
/// Patch sets that no campaign references expire after the store's
/// configured time-to-live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    /// Store-assigned identifier.
    pub id: PatchSetId,
    /// User that computed the patch set.
    pub user_id: UserId,
    /// Creation timestamp; drives expiry.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A diff against one repository at one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    /// Store-assigned identifier.
    pub id: PatchId,
    /// Owning patch set.
    pub patch_set_id: PatchSetId,
    /// Target repository.
    pub repo_id: RepoId,
    /// Commit the diff applies to.
    pub rev: String,
    /// Ref the published changeset targets.
    pub base_ref: String,
    /// Unified diff; empty when the repository needed no change.
    pub diff: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Patch {
    /// Returns `true` when the patch carries a non-empty diff.
    #[must_use]
    pub fn has_diff(&self) -> bool {
        !self.diff.is_empty()
    }
}
