//! Persistence core: profile snapshots on lifecycle events, count-based
//! retention, and repair of drifted registry keys.
//!
//! Layout under the profile directory:
//! ```text
//! <key>.json                                  - live profiles (owned by the registry)
//! AutoBackup/<version_tag>/<session_id>/
//!   2024-05-01T120304567Z-onRaidEnd.json      - one full snapshot per event
//! ```
//!
//! # Invariants
//! - Snapshots are ordered by filesystem creation time, never by file name.
//! - After a snapshot is written a session directory holds at most
//!   `MaximumBackupPerProfile` snapshots (when that value is positive).
//! - Events for the same session are processed one at a time.
//! - The key repair pass finishes before the service accepts events.

pub mod config;
pub mod error;
pub mod memory;
pub mod repair;
pub mod retention;
pub mod service;
pub mod snapshot;
pub mod store;

pub use config::{AutoBackupConfig, ConfigError, EventTriggers};
pub use error::{RepairError, SnapshotError, StorageError};
pub use memory::MemorySnapshotStore;
pub use repair::{KeyConsistencyRepairer, RenamedProfile, RepairReport};
pub use retention::{DeletionNotice, PruneReport, RetentionPolicy, RetentionPruner};
pub use service::{HostContext, SnapshotRecord, SnapshotService, SnapshotServiceBuilder};
pub use snapshot::{
    BACKUP_DIR_NAME, Clock, SNAPSHOT_EXTENSION, SnapshotEntry, SnapshotLabel, SystemClock,
    TimestampToken, session_dir, snapshot_file_name,
};
pub use store::{FsSnapshotStore, SnapshotStore};
