//! Unit tests for the campaign module.
//!
//! Store behaviour is covered by the integration suites; these tests pin the
//! domain rules, query helpers and the job worker against the in-memory store.
