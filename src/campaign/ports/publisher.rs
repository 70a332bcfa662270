//! Port for the code-host client that turns a patch into a changeset.

use crate::campaign::domain::{Campaign, Changeset, ChangesetJob, Patch};
use async_trait::async_trait;
use thiserror::Error;

/// Everything a code host needs to open a changeset for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRequest {
    /// Campaign being published.
    pub campaign: Campaign,
    /// Patch to push.
    pub patch: Patch,
    /// Claimed job.
    pub job: ChangesetJob,
}

/// Failure reported by a code host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PublishError {
    message: String,
}

impl PublishError {
    /// Creates an error from the host's message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the host's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Publishes patches as changesets on an external code host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangesetPublisher: Send + Sync {
    /// Pushes the patch and opens (or finds) the changeset for it.
    ///
    /// The returned changeset is unsaved; the caller stores it.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the code host rejects the request.
    async fn publish(&self, request: &PublicationRequest) -> Result<Changeset, PublishError>;
}
