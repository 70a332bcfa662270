//! Port contracts for campaign coordination.
//!
//! Ports define infrastructure-agnostic interfaces used by campaign services.

pub mod error;
pub mod publisher;
pub mod query;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use publisher::{ChangesetPublisher, PublicationRequest, PublishError};
pub use query::{
    CampaignFilter, ChangesetEventFilter, ChangesetFilter, ChangesetHeadRefs, ChangesetJobFilter,
    DEFAULT_LIST_LIMIT, ExternalChangesetRef, GetCampaignOpts, GetChangesetEventOpts,
    GetChangesetJobOpts, GetChangesetOpts, Page, PageRequest, PatchFilter,
};
pub use store::CampaignStore;

#[cfg(test)]
pub use publisher::MockChangesetPublisher;
