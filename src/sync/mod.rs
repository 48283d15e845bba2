//! Two-way reconciliation between local calendar rows and the provider.
//!
//! Each source is processed as push, then pull, then watch channel
//! maintenance. See [`job::run_sync_job`].
pub mod db;
pub mod job;
pub mod models;
pub mod pull;
pub mod push;
pub mod token;
pub mod translate;
pub mod watch;
