use crate::error::StorageError;
use crate::store::SnapshotStore;
use autobackup_common::{LifecycleEvent, ProfileId};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extension of snapshot files. Only files with it take part in retention.
pub const SNAPSHOT_EXTENSION: &str = "json";

/// Directory under the profile directory holding all snapshots.
pub const BACKUP_DIR_NAME: &str = "AutoBackup";

/// Source of wall-clock time for timestamp tokens.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Sortable capture time embedded in snapshot file names: ISO-8601 UTC with
/// `:` and `.` stripped, e.g. `2024-05-01T120304567Z`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampToken(String);

impl TimestampToken {
    pub const FORMAT: &'static str = "%Y-%m-%dT%H%M%S%3fZ";

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format(Self::FORMAT).to_string())
    }

    pub fn parse(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s, Self::FORMAT)
            .ok()
            .map(|_| Self(s.to_owned()))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, Self::FORMAT)
            .ok()
            .map(|t| t.and_utc())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimestampToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a well-formed snapshot file name says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLabel {
    pub token: TimestampToken,
    pub event_name: String,
}

impl SnapshotLabel {
    /// Parse `<token>-<eventName>.json`. Returns `None` for foreign file names.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{SNAPSHOT_EXTENSION}"))?;
        let (token, event_name) = stem.rsplit_once('-')?;
        if event_name.is_empty() {
            return None;
        }
        Some(Self {
            token: TimestampToken::parse(token)?,
            event_name: event_name.to_owned(),
        })
    }

    pub fn event(&self) -> Option<LifecycleEvent> {
        self.event_name.parse().ok()
    }
}

/// File name for a snapshot taken at `token` on `event`.
pub fn snapshot_file_name(token: &TimestampToken, event: LifecycleEvent) -> String {
    format!("{token}-{}.{SNAPSHOT_EXTENSION}", event.name())
}

/// `<profile_dir>/AutoBackup/<version_tag>/<session_id>`. One retention pool
/// per session and host version.
pub fn session_dir(profile_dir: &Path, version_tag: &str, session_id: &ProfileId) -> PathBuf {
    profile_dir
        .join(BACKUP_DIR_NAME)
        .join(version_tag)
        .join(session_id.as_str())
}

/// One snapshot file found in a session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub session_id: ProfileId,
    pub path: PathBuf,
    /// From storage metadata; the only ordering key.
    pub creation_time: SystemTime,
    pub label: Option<SnapshotLabel>,
}

impl SnapshotEntry {
    pub fn new(session_id: ProfileId, path: PathBuf, creation_time: SystemTime) -> Self {
        let label = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(SnapshotLabel::parse);
        Self {
            session_id,
            path,
            creation_time,
            label,
        }
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Oldest first; ties broken by path so the order is deterministic.
    pub fn sort_oldest_first(entries: &mut [SnapshotEntry]) {
        entries.sort_by(|a, b| {
            a.creation_time
                .cmp(&b.creation_time)
                .then_with(|| a.path.cmp(&b.path))
        });
    }

    /// Read every snapshot entry of `session_id` under `dir`, unordered.
    pub fn collect<S: SnapshotStore + ?Sized>(
        store: &S,
        dir: &Path,
        session_id: &ProfileId,
    ) -> Result<Vec<SnapshotEntry>, StorageError> {
        store
            .list_entries(dir, SNAPSHOT_EXTENSION)?
            .into_iter()
            .map(|path| {
                let created = store.entry_creation_time(&path)?;
                Ok::<_, StorageError>(SnapshotEntry::new(session_id.clone(), path, created))
            })
            .collect()
    }
}
