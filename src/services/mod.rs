//! Sync services.

pub mod buildbot;
pub mod remote;
pub mod sync_loop;
pub mod triggerable;

pub use remote::{BasicAuth, HttpRemote, RemoteApi};
pub use sync_loop::{SharedSyncStatus, SyncLoopConfig, SyncStatus, run_sync_cycle, start_sync_task};
pub use triggerable::{BuildbotTriggerable, SyncReport, TriggerableOptions};
