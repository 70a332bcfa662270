//! Jobs that publish a campaign's patches as changesets.

use super::{CampaignId, ChangesetId, ChangesetJobId, PatchId};
use chrono::{DateTime, Utc};

/// Publication of one patch for one campaign.
///
/// A job is pending while `started_at` is unset. Claiming stamps
/// `started_at`; finishing stamps `finished_at` together with either a
/// changeset id or an error message. At most one job exists per
/// (`campaign_id`, `patch_id`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetJob {
    /// Store-assigned identifier.
    pub id: ChangesetJobId,
    /// Campaign being published.
    pub campaign_id: CampaignId,
    /// Patch being published.
    pub patch_id: PatchId,
    /// Changeset created by the job, once published.
    pub changeset_id: Option<ChangesetId>,
    /// Branch pushed to the code host.
    pub branch: String,
    /// Failure message of the last attempt.
    pub error: Option<String>,
    /// When a worker claimed the job.
    pub started_at: Option<DateTime<Utc>>,
    /// When a worker finished the job.
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ChangesetJob {
    /// Creates an unsaved, pending job.
    #[must_use]
    pub fn new(campaign_id: CampaignId, patch_id: PatchId, branch: impl Into<String>) -> Self {
        Self {
            campaign_id,
            patch_id,
            branch: branch.into(),
            ..Self::default()
        }
    }

    /// Returns `true` while no worker has claimed the job.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.started_at.is_none()
    }

    /// Returns `true` once a worker has finished the job.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Returns the failure message when the last attempt failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref().filter(|message| !message.is_empty())
    }

    /// Returns `true` when the job finished and produced a changeset.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.is_finished() && self.failure().is_none() && self.changeset_id.is_some()
    }

    /// Records a successful publication.
    pub fn succeed(&mut self, changeset_id: ChangesetId, finished_at: DateTime<Utc>) {
        self.changeset_id = Some(changeset_id);
        self.error = None;
        self.finished_at = Some(finished_at);
    }

    /// Records a failed publication.
    pub fn fail(&mut self, message: impl Into<String>, finished_at: DateTime<Utc>) {
        self.error = Some(message.into());
        self.finished_at = Some(finished_at);
    }

    /// Clears progress so the job becomes claimable again.
    pub fn reset(&mut self) {
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }
}
