//! Host-specific changeset payloads.
//!
//! A changeset's metadata column holds a JSON document whose shape depends on
//! the code host. [`ChangesetMetadata`] closes that set of shapes: each
//! variant encodes itself to JSON and decoding dispatches on the persisted
//! service type, rejecting hosts without a known shape. Fields the store does
//! not model explicitly survive a round trip through the `extra` maps.

use super::{ExternalServiceType, MetadataError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GitHub account reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubActor {
    /// Account login.
    #[serde(default)]
    pub login: String,
    /// Avatar image URL.
    #[serde(default, rename = "avatarUrl")]
    pub avatar_url: String,
}

/// GitHub pull request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubPullRequest {
    /// GraphQL node id.
    #[serde(default)]
    pub id: String,
    /// Pull request number within the repository.
    #[serde(default)]
    pub number: i64,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub body: String,
    /// Host-reported state, e.g. `OPEN`.
    #[serde(default)]
    pub state: String,
    /// Web URL.
    #[serde(default)]
    pub url: String,
    /// Source branch name.
    #[serde(default)]
    pub head_ref_name: String,
    /// Target branch name.
    #[serde(default)]
    pub base_ref_name: String,
    /// Author account.
    #[serde(default)]
    pub author: GitHubActor,
    /// Creation time on the host.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time on the host.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A Bitbucket Server branch reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketServerRef {
    /// Fully qualified ref name.
    #[serde(default)]
    pub id: String,
    /// Head commit of the ref.
    #[serde(default)]
    pub latest_commit: String,
}

/// Bitbucket Server pull request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketServerPullRequest {
    /// Pull request id within the repository.
    #[serde(default)]
    pub id: i64,
    /// Optimistic-locking version.
    #[serde(default)]
    pub version: i64,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Description text.
    #[serde(default)]
    pub description: String,
    /// Host-reported state, e.g. `OPEN`.
    #[serde(default)]
    pub state: String,
    /// Source ref.
    #[serde(default)]
    pub from_ref: BitbucketServerRef,
    /// Target ref.
    #[serde(default)]
    pub to_ref: BitbucketServerRef,
    /// Creation time in epoch milliseconds.
    #[serde(default)]
    pub created_date: i64,
    /// Last update time in epoch milliseconds.
    #[serde(default)]
    pub updated_date: i64,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Changeset payload, one variant per supported code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetMetadata {
    /// A GitHub pull request.
    GitHub(GitHubPullRequest),
    /// A Bitbucket Server pull request.
    BitbucketServer(BitbucketServerPullRequest),
}

impl ChangesetMetadata {
    /// Returns the code host this payload belongs to.
    #[must_use]
    pub const fn service_type(&self) -> ExternalServiceType {
        match self {
            Self::GitHub(_) => ExternalServiceType::GitHub,
            Self::BitbucketServer(_) => ExternalServiceType::BitbucketServer,
        }
    }

    /// Returns the changeset title as reported by the host.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::GitHub(pr) => &pr.title,
            Self::BitbucketServer(pr) => &pr.title,
        }
    }

    /// Encodes the payload for the metadata column.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Malformed`] when serialisation fails.
    pub fn encode(&self) -> Result<Value, MetadataError> {
        let encoded = match self {
            Self::GitHub(pr) => serde_json::to_value(pr),
            Self::BitbucketServer(pr) => serde_json::to_value(pr),
        };
        encoded.map_err(|err| MetadataError::malformed(self.service_type().as_str(), err))
    }

    /// Decodes a metadata column using its persisted service type.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::UnknownServiceType`] for hosts without a
    /// payload shape and [`MetadataError::Malformed`] when the document does
    /// not match the selected shape.
    pub fn decode(service_type: &str, value: Value) -> Result<Self, MetadataError> {
        let host = ExternalServiceType::try_from(service_type)
            .map_err(|_| MetadataError::UnknownServiceType(service_type.to_owned()))?;
        let decoded = match host {
            ExternalServiceType::GitHub => serde_json::from_value(value).map(Self::GitHub),
            ExternalServiceType::BitbucketServer => {
                serde_json::from_value(value).map(Self::BitbucketServer)
            }
        };
        decoded.map_err(|err| MetadataError::malformed(service_type, err))
    }
}

impl Default for ChangesetMetadata {
    fn default() -> Self {
        Self::GitHub(GitHubPullRequest::default())
    }
}
