//! Events observed on changesets and their kind-specific payloads.

use super::{ChangesetEventId, ChangesetId, GitHubActor, MetadataError, ParseEnumError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of a changeset event, namespaced by code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangesetEventKind {
    /// A user was assigned to the pull request.
    GitHubAssigned,
    /// A user was unassigned from the pull request.
    GitHubUnassigned,
    /// The pull request was closed.
    GitHubClosed,
    /// The pull request was reopened.
    GitHubReopened,
    /// A draft pull request was marked ready.
    GitHubReadyForReview,
    /// The pull request was converted back to a draft.
    GitHubConvertedToDraft,
    /// The pull request was merged.
    GitHubMerged,
    /// A comment was posted.
    GitHubCommented,
    /// The title changed.
    GitHubRenamed,
    /// A review was submitted.
    GitHubReviewed,
    /// A review was dismissed.
    GitHubReviewDismissed,
    /// A review was requested.
    GitHubReviewRequested,
    /// A review request was withdrawn.
    GitHubReviewRequestRemoved,
    /// A label was added.
    GitHubLabeled,
    /// A label was removed.
    GitHubUnlabeled,
    /// A commit was pushed.
    GitHubCommit,
    /// The pull request was approved.
    BitbucketServerApproved,
    /// An approval was withdrawn.
    BitbucketServerUnapproved,
    /// The pull request was declined.
    BitbucketServerDeclined,
    /// A review was completed.
    BitbucketServerReviewed,
    /// The pull request was opened.
    BitbucketServerOpened,
    /// The pull request was reopened.
    BitbucketServerReopened,
    /// The source or target ref moved.
    BitbucketServerRescoped,
    /// Title or description changed.
    BitbucketServerUpdated,
    /// A comment was posted.
    BitbucketServerCommented,
    /// The pull request was merged.
    BitbucketServerMerged,
}

impl ChangesetEventKind {
    /// Every supported kind, in declaration order.
    pub const ALL: [Self; 26] = [
        Self::GitHubAssigned,
        Self::GitHubUnassigned,
        Self::GitHubClosed,
        Self::GitHubReopened,
        Self::GitHubReadyForReview,
        Self::GitHubConvertedToDraft,
        Self::GitHubMerged,
        Self::GitHubCommented,
        Self::GitHubRenamed,
        Self::GitHubReviewed,
        Self::GitHubReviewDismissed,
        Self::GitHubReviewRequested,
        Self::GitHubReviewRequestRemoved,
        Self::GitHubLabeled,
        Self::GitHubUnlabeled,
        Self::GitHubCommit,
        Self::BitbucketServerApproved,
        Self::BitbucketServerUnapproved,
        Self::BitbucketServerDeclined,
        Self::BitbucketServerReviewed,
        Self::BitbucketServerOpened,
        Self::BitbucketServerReopened,
        Self::BitbucketServerRescoped,
        Self::BitbucketServerUpdated,
        Self::BitbucketServerCommented,
        Self::BitbucketServerMerged,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitHubAssigned => "github:assigned",
            Self::GitHubUnassigned => "github:unassigned",
            Self::GitHubClosed => "github:closed",
            Self::GitHubReopened => "github:reopened",
            Self::GitHubReadyForReview => "github:ready_for_review",
            Self::GitHubConvertedToDraft => "github:converted_to_draft",
            Self::GitHubMerged => "github:merged",
            Self::GitHubCommented => "github:commented",
            Self::GitHubRenamed => "github:renamed",
            Self::GitHubReviewed => "github:reviewed",
            Self::GitHubReviewDismissed => "github:review_dismissed",
            Self::GitHubReviewRequested => "github:review_requested",
            Self::GitHubReviewRequestRemoved => "github:review_request_removed",
            Self::GitHubLabeled => "github:labeled",
            Self::GitHubUnlabeled => "github:unlabeled",
            Self::GitHubCommit => "github:commit",
            Self::BitbucketServerApproved => "bitbucketserver:approved",
            Self::BitbucketServerUnapproved => "bitbucketserver:unapproved",
            Self::BitbucketServerDeclined => "bitbucketserver:declined",
            Self::BitbucketServerReviewed => "bitbucketserver:reviewed",
            Self::BitbucketServerOpened => "bitbucketserver:opened",
            Self::BitbucketServerReopened => "bitbucketserver:reopened",
            Self::BitbucketServerRescoped => "bitbucketserver:rescoped",
            Self::BitbucketServerUpdated => "bitbucketserver:updated",
            Self::BitbucketServerCommented => "bitbucketserver:commented",
            Self::BitbucketServerMerged => "bitbucketserver:merged",
        }
    }

    /// Returns the payload shape events of this kind carry.
    #[must_use]
    pub const fn shape(self) -> EventShape {
        match self {
            Self::GitHubAssigned | Self::GitHubUnassigned => EventShape::GitHubAssignment,
            Self::GitHubClosed
            | Self::GitHubReopened
            | Self::GitHubReadyForReview
            | Self::GitHubConvertedToDraft => EventShape::GitHubStateChange,
            Self::GitHubMerged => EventShape::GitHubMerge,
            Self::GitHubCommented => EventShape::GitHubComment,
            Self::GitHubRenamed => EventShape::GitHubRename,
            Self::GitHubReviewed => EventShape::GitHubReview,
            Self::GitHubReviewDismissed => EventShape::GitHubReviewDismissal,
            Self::GitHubReviewRequested | Self::GitHubReviewRequestRemoved => {
                EventShape::GitHubReviewRequest
            }
            Self::GitHubLabeled | Self::GitHubUnlabeled => EventShape::GitHubLabel,
            Self::GitHubCommit => EventShape::GitHubCommit,
            Self::BitbucketServerApproved
            | Self::BitbucketServerUnapproved
            | Self::BitbucketServerDeclined
            | Self::BitbucketServerReviewed
            | Self::BitbucketServerOpened
            | Self::BitbucketServerReopened
            | Self::BitbucketServerRescoped
            | Self::BitbucketServerUpdated
            | Self::BitbucketServerCommented
            | Self::BitbucketServerMerged => EventShape::BitbucketServerActivity,
        }
    }
}

impl TryFrom<&str> for ChangesetEventKind {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| ParseEnumError::new("changeset event kind", value))
    }
}

impl fmt::Display for ChangesetEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shapes shared by one or more event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventShape {
    /// [`GitHubAssignmentEvent`].
    GitHubAssignment,
    /// [`GitHubStateChangeEvent`].
    GitHubStateChange,
    /// [`GitHubMergeEvent`].
    GitHubMerge,
    /// [`GitHubCommentEvent`].
    GitHubComment,
    /// [`GitHubRenameEvent`].
    GitHubRename,
    /// [`GitHubReviewEvent`].
    GitHubReview,
    /// [`GitHubReviewDismissalEvent`].
    GitHubReviewDismissal,
    /// [`GitHubReviewRequestEvent`].
    GitHubReviewRequest,
    /// [`GitHubLabelEvent`].
    GitHubLabel,
    /// [`GitHubCommitEvent`].
    GitHubCommit,
    /// [`BitbucketServerActivity`].
    BitbucketServerActivity,
}

impl EventShape {
    /// Returns the shape's name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GitHubAssignment => "GitHubAssignment",
            Self::GitHubStateChange => "GitHubStateChange",
            Self::GitHubMerge => "GitHubMerge",
            Self::GitHubComment => "GitHubComment",
            Self::GitHubRename => "GitHubRename",
            Self::GitHubReview => "GitHubReview",
            Self::GitHubReviewDismissal => "GitHubReviewDismissal",
            Self::GitHubReviewRequest => "GitHubReviewRequest",
            Self::GitHubLabel => "GitHubLabel",
            Self::GitHubCommit => "GitHubCommit",
            Self::BitbucketServerActivity => "BitbucketServerActivity",
        }
    }
}

/// Assignment or unassignment of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubAssignmentEvent {
    /// Account that performed the change.
    #[serde(default)]
    pub actor: GitHubActor,
    /// Account assigned or unassigned.
    #[serde(default)]
    pub assignee: GitHubActor,
    /// When the change happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A state toggle that carries no data beyond its actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubStateChangeEvent {
    /// Account that performed the change.
    #[serde(default)]
    pub actor: GitHubActor,
    /// When the change happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A merge of the pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubMergeEvent {
    /// Account that merged.
    #[serde(default)]
    pub actor: GitHubActor,
    /// Ref merged into.
    #[serde(default)]
    pub merge_ref_name: String,
    /// Resulting merge commit.
    #[serde(default)]
    pub commit_oid: String,
    /// When the merge happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An issue comment on the pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubCommentEvent {
    /// Host database id of the comment.
    #[serde(default)]
    pub database_id: i64,
    /// Comment author.
    #[serde(default)]
    pub author: GitHubActor,
    /// Comment body.
    #[serde(default)]
    pub body: String,
    /// When the comment was posted.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the comment was last edited.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A title change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubRenameEvent {
    /// Account that renamed.
    #[serde(default)]
    pub actor: GitHubActor,
    /// Title before the change.
    #[serde(default)]
    pub previous_title: String,
    /// Title after the change.
    #[serde(default)]
    pub current_title: String,
    /// When the change happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A submitted review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubReviewEvent {
    /// Host database id of the review.
    #[serde(default)]
    pub database_id: i64,
    /// Reviewer.
    #[serde(default)]
    pub author: GitHubActor,
    /// Review summary text.
    #[serde(default)]
    pub body: String,
    /// Review verdict, e.g. `APPROVED`.
    #[serde(default)]
    pub state: String,
    /// Web URL.
    #[serde(default)]
    pub url: String,
    /// When the review was submitted.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the review was last edited.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Dismissal of an earlier review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubReviewDismissalEvent {
    /// Account that dismissed the review.
    #[serde(default)]
    pub actor: GitHubActor,
    /// Host database id of the dismissed review.
    #[serde(default)]
    pub review_database_id: i64,
    /// Reason given for the dismissal.
    #[serde(default)]
    pub dismissal_message: String,
    /// When the dismissal happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A review request being added or withdrawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubReviewRequestEvent {
    /// Account that changed the request.
    #[serde(default)]
    pub actor: GitHubActor,
    /// Account whose review is requested.
    #[serde(default)]
    pub requested_reviewer: GitHubActor,
    /// When the change happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A label applied to or removed from the pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubLabelEvent {
    /// Account that changed the label.
    #[serde(default)]
    pub actor: GitHubActor,
    /// Label name.
    #[serde(default)]
    pub label: String,
    /// Label colour as a hex string.
    #[serde(default)]
    pub color: String,
    /// When the change happened.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A commit pushed to the head branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubCommitEvent {
    /// Commit hash.
    #[serde(default)]
    pub oid: String,
    /// Commit message.
    #[serde(default)]
    pub message: String,
    /// When the commit was authored.
    #[serde(default)]
    pub committed_date: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A Bitbucket Server pull request activity entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketServerActivity {
    /// Activity id.
    #[serde(default)]
    pub id: i64,
    /// Creation time in epoch milliseconds.
    #[serde(default)]
    pub created_date: i64,
    /// Account slug of the acting user.
    #[serde(default)]
    pub user: String,
    /// Host action name, e.g. `APPROVED`.
    #[serde(default)]
    pub action: String,
    /// Comment text for comment activities.
    #[serde(default)]
    pub comment: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event payload, one variant per [`EventShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetEventMetadata {
    /// Payload of assignment events.
    GitHubAssignment(GitHubAssignmentEvent),
    /// Payload of actor-only state toggles.
    GitHubStateChange(GitHubStateChangeEvent),
    /// Payload of merge events.
    GitHubMerge(GitHubMergeEvent),
    /// Payload of comment events.
    GitHubComment(GitHubCommentEvent),
    /// Payload of rename events.
    GitHubRename(GitHubRenameEvent),
    /// Payload of review events.
    GitHubReview(GitHubReviewEvent),
    /// Payload of review dismissals.
    GitHubReviewDismissal(GitHubReviewDismissalEvent),
    /// Payload of review request changes.
    GitHubReviewRequest(GitHubReviewRequestEvent),
    /// Payload of label changes.
    GitHubLabel(GitHubLabelEvent),
    /// Payload of commit events.
    GitHubCommit(GitHubCommitEvent),
    /// Payload of every Bitbucket Server activity.
    BitbucketServerActivity(BitbucketServerActivity),
}

impl ChangesetEventMetadata {
    /// Returns the shape of this payload.
    #[must_use]
    pub const fn shape(&self) -> EventShape {
        match self {
            Self::GitHubAssignment(_) => EventShape::GitHubAssignment,
            Self::GitHubStateChange(_) => EventShape::GitHubStateChange,
            Self::GitHubMerge(_) => EventShape::GitHubMerge,
            Self::GitHubComment(_) => EventShape::GitHubComment,
            Self::GitHubRename(_) => EventShape::GitHubRename,
            Self::GitHubReview(_) => EventShape::GitHubReview,
            Self::GitHubReviewDismissal(_) => EventShape::GitHubReviewDismissal,
            Self::GitHubReviewRequest(_) => EventShape::GitHubReviewRequest,
            Self::GitHubLabel(_) => EventShape::GitHubLabel,
            Self::GitHubCommit(_) => EventShape::GitHubCommit,
            Self::BitbucketServerActivity(_) => EventShape::BitbucketServerActivity,
        }
    }

    /// Encodes the payload for an event of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::KindMismatch`] when this payload cannot
    /// describe `kind`, or [`MetadataError::Malformed`] when serialisation
    /// fails.
    pub fn encode(&self, kind: ChangesetEventKind) -> Result<Value, MetadataError> {
        if kind.shape() != self.shape() {
            return Err(MetadataError::KindMismatch {
                kind: kind.as_str().to_owned(),
                shape: self.shape().name(),
            });
        }
        let encoded = match self {
            Self::GitHubAssignment(event) => serde_json::to_value(event),
            Self::GitHubStateChange(event) => serde_json::to_value(event),
            Self::GitHubMerge(event) => serde_json::to_value(event),
            Self::GitHubComment(event) => serde_json::to_value(event),
            Self::GitHubRename(event) => serde_json::to_value(event),
            Self::GitHubReview(event) => serde_json::to_value(event),
            Self::GitHubReviewDismissal(event) => serde_json::to_value(event),
            Self::GitHubReviewRequest(event) => serde_json::to_value(event),
            Self::GitHubLabel(event) => serde_json::to_value(event),
            Self::GitHubCommit(event) => serde_json::to_value(event),
            Self::BitbucketServerActivity(event) => serde_json::to_value(event),
        };
        encoded.map_err(|err| MetadataError::malformed(kind.as_str(), err))
    }

    /// Decodes a metadata column using its persisted event kind.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::UnknownEventKind`] for kinds without a payload
    /// shape and [`MetadataError::Malformed`] when the document does not match
    /// the selected shape.
    pub fn decode(kind: &str, value: Value) -> Result<Self, MetadataError> {
        let parsed = ChangesetEventKind::try_from(kind)
            .map_err(|_| MetadataError::UnknownEventKind(kind.to_owned()))?;
        let decoded = match parsed.shape() {
            EventShape::GitHubAssignment => {
                serde_json::from_value(value).map(Self::GitHubAssignment)
            }
            EventShape::GitHubStateChange => {
                serde_json::from_value(value).map(Self::GitHubStateChange)
            }
            EventShape::GitHubMerge => serde_json::from_value(value).map(Self::GitHubMerge),
            EventShape::GitHubComment => serde_json::from_value(value).map(Self::GitHubComment),
            EventShape::GitHubRename => serde_json::from_value(value).map(Self::GitHubRename),
            EventShape::GitHubReview => serde_json::from_value(value).map(Self::GitHubReview),
            EventShape::GitHubReviewDismissal => {
                serde_json::from_value(value).map(Self::GitHubReviewDismissal)
            }
            EventShape::GitHubReviewRequest => {
                serde_json::from_value(value).map(Self::GitHubReviewRequest)
            }
            EventShape::GitHubLabel => serde_json::from_value(value).map(Self::GitHubLabel),
            EventShape::GitHubCommit => serde_json::from_value(value).map(Self::GitHubCommit),
            EventShape::BitbucketServerActivity => {
                serde_json::from_value(value).map(Self::BitbucketServerActivity)
            }
        };
        decoded.map_err(|err| MetadataError::malformed(kind, err))
    }
}

/// Natural key of a changeset event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangesetEventKey {
    /// Changeset the event belongs to.
    pub changeset_id: ChangesetId,
    /// Event kind.
    pub kind: ChangesetEventKind,
    /// Host-provided key distinguishing events of the same kind.
    pub key: String,
}

impl fmt::Display for ChangesetEventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.changeset_id, self.kind, self.key)
    }
}

/// An event observed on a changeset.
///
/// The triple (`changeset_id`, `kind`, `key`) is unique. Re-upserting an
/// event replaces its metadata and `updated_at` while preserving `id` and
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetEvent {
    /// Store-assigned identifier.
    pub id: ChangesetEventId,
    /// Changeset the event belongs to.
    pub changeset_id: ChangesetId,
    /// Event kind; selects the metadata shape.
    pub kind: ChangesetEventKind,
    /// Host-provided key distinguishing events of the same kind.
    pub key: String,
    /// First time the store saw the event.
    pub created_at: DateTime<Utc>,
    /// Last time the store wrote the event.
    pub updated_at: DateTime<Utc>,
    /// Kind-specific payload.
    pub metadata: ChangesetEventMetadata,
}

impl ChangesetEvent {
    /// Creates an unsaved event.
    #[must_use]
    pub fn new(
        changeset_id: ChangesetId,
        kind: ChangesetEventKind,
        key: impl Into<String>,
        metadata: ChangesetEventMetadata,
    ) -> Self {
        Self {
            id: ChangesetEventId::default(),
            changeset_id,
            kind,
            key: key.into(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            metadata,
        }
    }

    /// Returns the event's natural key.
    #[must_use]
    pub fn natural_key(&self) -> ChangesetEventKey {
        ChangesetEventKey {
            changeset_id: self.changeset_id,
            kind: self.kind,
            key: self.key.clone(),
        }
    }
}
