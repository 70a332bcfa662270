//! Domain model for campaign coordination.
//!
//! Records here are plain data with public fields: stores fill in
//! identifiers and timestamps and write the stored row back into the
//! caller's value after every mutation.

mod campaign;
mod changeset;
mod error;
mod event;
mod ids;
mod job;
mod lock;
mod metadata;
mod patch;
mod status;
mod time;

pub use campaign::{Campaign, CampaignState, Namespace};
pub use changeset::{
    Changeset, ChangesetCheckState, ChangesetReviewState, ChangesetState, ChangesetSyncData,
    ExternalServiceType,
};
pub use error::{MetadataError, ParseEnumError};
pub use event::{
    BitbucketServerActivity, ChangesetEvent, ChangesetEventKey, ChangesetEventKind,
    ChangesetEventMetadata, EventShape, GitHubAssignmentEvent, GitHubCommentEvent,
    GitHubCommitEvent, GitHubLabelEvent, GitHubMergeEvent, GitHubRenameEvent,
    GitHubReviewDismissalEvent, GitHubReviewEvent, GitHubReviewRequestEvent,
    GitHubStateChangeEvent,
};
pub use ids::{
    CampaignId, ChangesetEventId, ChangesetId, ChangesetJobId, OrgId, PatchId, PatchSetId,
    RepoId, UserId,
};
pub use job::ChangesetJob;
pub use lock::{AdvisoryLockKey, LOCK_NAMESPACE, fnv1_32};
pub use metadata::{
    BitbucketServerPullRequest, BitbucketServerRef, ChangesetMetadata, GitHubActor,
    GitHubPullRequest,
};
pub use patch::{Patch, PatchSet};
pub use status::{BackgroundProcessStatus, ProcessState};
pub use time::{is_unset, stamp_creation, stored_now, to_stored_precision};
