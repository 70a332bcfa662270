//! Haussmann: a work-coordination store for multi-repository code-change
//! campaigns.
//!
//! The crate persists campaigns, patch sets, patches, changesets, changeset
//! events, and the jobs that publish patches as changesets. Workers running
//! in any number of processes claim pending jobs through the store, which
//! hands each job to exactly one of them using row locks in `PostgreSQL`.
//!
//! # Architecture
//!
//! - **Domain**: plain records, identifiers, and status aggregation
//! - **Ports**: the [`campaign::ports::CampaignStore`] contract and the
//!   code-host publisher it feeds
//! - **Adapters**: a Diesel-backed `PostgreSQL` store and an in-memory store
//!   with the same semantics
//!
//! # Modules
//!
//! - [`campaign`]: campaign coordination store and job worker
//! - [`config`]: environment-driven store configuration

pub mod campaign;
pub mod config;
