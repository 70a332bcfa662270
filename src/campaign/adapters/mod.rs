//! Store adapters for campaign coordination.
//!
//! - [`postgres::PostgresCampaignStore`]: production persistence using
//!   Diesel, with advisory locks and `SKIP LOCKED` job claims
//! - [`memory::InMemoryCampaignStore`]: thread-safe in-memory storage for
//!   tests and single-process tools

use chrono::TimeDelta;

pub mod memory;
pub mod postgres;

mod upsert;

/// How long an unattached patch set survives before the expiry sweep
/// removes it.
pub const DEFAULT_PATCH_SET_TTL: TimeDelta = TimeDelta::hours(1);
