//! Application services for campaign job processing.

mod publisher;

pub use publisher::ChangesetJobWorker;
