//! Sync E2E test suite.
//!
//! Runs full sync cycles over HTTP against in-process mock buildbot and
//! dashboard servers.
//!
//! Run with: cargo test --test sync_e2e

mod mock_servers;
mod test_helpers;

mod test_failures;
mod test_scheduling;
mod test_status_updates;
