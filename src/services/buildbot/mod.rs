//! Buildbot builders as seen by the syncer.

pub mod build_entry;
pub mod config;
pub mod syncer;

pub use build_entry::{BuildResult, BuildbotBuildEntry};
pub use config::{SyncConfig, SyncConfigError, SyncerConfig, load_sync_config_file, parse_sync_config};
pub use syncer::{BuildbotSyncer, WorkerReservations, WorkerSlot};
