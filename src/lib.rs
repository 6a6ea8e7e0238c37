//! Buildbot build request syncer library.
//!
//! Keeps the build requests a performance dashboard assigns to a
//! triggerable in sync with the buildbot builders that run them: polls
//! builders, reports status changes, and force-builds the next request of
//! every test group when a worker is free.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
