//! `PostgreSQL` adapter for campaign coordination.

mod batch;
mod campaigns;
mod changeset_events;
mod changeset_jobs;
mod changesets;
mod claim;
mod connection;
mod lock;
mod models;
mod patch_sets;
mod patches;
mod schema;
mod status;
mod store;

pub use connection::CampaignPgPool;
pub use store::PostgresCampaignStore;
