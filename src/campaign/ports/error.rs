//! Error taxonomy shared by every campaign store implementation.

use crate::campaign::domain::{CampaignId, ChangesetEventKey, ChangesetId, PatchId};
use std::sync::Arc;
use thiserror::Error;

/// Result type for campaign store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by campaign stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record matched the lookup.
    #[error("record not found")]
    NotFound,

    /// A batch upsert merged rows that already existed.
    ///
    /// The caller's records were still overwritten with the stored values,
    /// so this signals partial success rather than failure.
    #[error("changesets already exist: {changeset_ids:?}")]
    AlreadyExists {
        /// Identifiers of the pre-existing changesets, in input order.
        changeset_ids: Vec<ChangesetId>,
    },

    /// The operation requires a transaction-bound store.
    #[error("not in a transaction")]
    NotInTransaction,

    /// The underlying connection cannot run transactions.
    #[error("store: not transactable")]
    NotTransactable,

    /// The operation opens its own transaction and cannot run inside one.
    #[error("operation must not run inside an existing transaction")]
    AlreadyInTransaction,

    /// The transaction behind this store was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionClosed,

    /// A job for this campaign and patch already exists.
    #[error("changeset job for campaign {campaign_id} and patch {patch_id} already exists")]
    DuplicateChangesetJob {
        /// Campaign of the rejected job.
        campaign_id: CampaignId,
        /// Patch of the rejected job.
        patch_id: PatchId,
    },

    /// The campaign is closed and accepts no new jobs.
    #[error("campaign {0} is closed")]
    CampaignClosed(CampaignId),

    /// The same event key appears twice in one upsert batch.
    #[error("duplicate changeset event in batch: {0}")]
    DuplicateEventKey(ChangesetEventKey),

    /// A stored row could not be decoded.
    #[error("invalid persisted data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// An input record could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(Arc<dyn std::error::Error + Send + Sync>),

    /// A connection could not be obtained or the blocking task failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),

    /// A job processing callback reported failure.
    #[error("job processing failed: {0}")]
    JobFailed(Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps a persistence error.
    #[must_use]
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }

    /// Wraps an error raised while decoding a stored row.
    #[must_use]
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps an error raised while encoding an input record.
    #[must_use]
    pub fn serialization(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Serialization(Arc::new(err))
    }

    /// Creates a connection error from a message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Wraps the failure a job processing callback reports.
    #[must_use]
    pub fn job_failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::JobFailed(Arc::new(err))
    }

    /// Returns `true` for the partial-success signal of batch upserts.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` when a lookup matched nothing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
