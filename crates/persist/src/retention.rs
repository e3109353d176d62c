//! Count-based retention for a session's snapshots.
//!
//! Pruning runs before the new snapshot is written, so it deletes down to
//! `max_count - 1` and the write brings the directory back to `max_count`.

use crate::snapshot::SnapshotEntry;
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum snapshots per session after a write. Zero or negative disables pruning.
    pub max_count: i64,
    /// Log deletions when they happen.
    pub log_deletions: bool,
}

impl RetentionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_count > 0
    }

    /// How many of `existing` entries must go so that one more fits under the cap.
    pub fn excess(&self, existing: usize) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let cap = usize::try_from(self.max_count).unwrap_or(usize::MAX);
        (existing + 1).saturating_sub(cap)
    }
}

/// Shape of the deletion log line: one named file, or a total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionNotice {
    None,
    Single(String),
    Many(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Surviving entries, oldest first.
    pub kept: Vec<SnapshotEntry>,
    /// Names of deleted entries, oldest first.
    pub deleted_names: Vec<String>,
    /// Entries that should have been deleted but could not be.
    pub failed: Vec<SnapshotEntry>,
}

impl PruneReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted_names.len()
    }

    pub fn notice(&self) -> DeletionNotice {
        match self.deleted_names.as_slice() {
            [] => DeletionNotice::None,
            [single] => DeletionNotice::Single(single.clone()),
            many => DeletionNotice::Many(many.len()),
        }
    }
}

pub struct RetentionPruner<'a, S: SnapshotStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SnapshotStore + ?Sized> RetentionPruner<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Delete the oldest entries until one more snapshot fits under the policy.
    ///
    /// Deletion is best effort: a failed removal is logged and reported in
    /// [`PruneReport::failed`] but never returned as an error, so the write
    /// that follows still happens.
    pub fn prune(&self, mut entries: Vec<SnapshotEntry>, policy: &RetentionPolicy) -> PruneReport {
        SnapshotEntry::sort_oldest_first(&mut entries);

        let excess = policy.excess(entries.len());
        let kept = entries.split_off(excess);

        let mut report = PruneReport {
            kept,
            ..PruneReport::default()
        };
        for oldest in entries {
            match self.store.remove(&oldest.path) {
                Ok(()) => {
                    tracing::debug!(
                        session = %oldest.session_id,
                        file = %oldest.name(),
                        "old backup removed"
                    );
                    report.deleted_names.push(oldest.name());
                }
                Err(e) => {
                    tracing::warn!(
                        session = %oldest.session_id,
                        error = %e,
                        "failed to remove old backup"
                    );
                    report.failed.push(oldest);
                }
            }
        }
        report
    }
}
