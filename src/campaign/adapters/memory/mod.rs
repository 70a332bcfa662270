//! In-memory campaign store.
//!
//! Shares the relational store's keys, cascades, claim ordering and
//! transaction semantics, without a database.

mod queries;
mod store;
mod tables;

pub use store::InMemoryCampaignStore;
