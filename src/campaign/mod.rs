//! Campaign work coordination.
//!
//! Tracks campaigns, the patch sets and patches they publish, the changesets
//! opened on code hosts with their events, and the jobs that turn patches
//! into changesets. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Store implementations in [`adapters`]
//! - The job worker in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
