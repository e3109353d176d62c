//! Durable storage for snapshot files.

use crate::error::StorageError;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Mode of snapshot files, before the process umask.
#[cfg(unix)]
const SNAPSHOT_MODE: u32 = 0o644;

/// Storage operations the snapshot core needs.
///
/// Implementations must be safe to share between threads; callers serialize
/// access per session directory themselves.
pub trait SnapshotStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Create `path` and any missing parents. Already existing is not an error.
    fn create_dir(&self, path: &Path) -> Result<(), StorageError>;

    /// Files directly inside `dir` with the given extension (no leading dot),
    /// in no particular order. A missing directory has no entries.
    fn list_entries(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>, StorageError>;

    /// Creation time from storage metadata. This is the retention ordering key.
    fn entry_creation_time(&self, path: &Path) -> Result<SystemTime, StorageError>;

    /// Replace the contents of `path`. Readers see either the old file or the
    /// complete new one, never a partial write.
    fn write(&self, path: &Path, content: &[u8]) -> Result<(), StorageError>;

    fn remove(&self, path: &Path) -> Result<(), StorageError>;

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError>;

    /// Whether both paths name the same existing entry, e.g. two spellings
    /// differing only in case on a case-insensitive filesystem.
    fn is_same_entry(&self, a: &Path, b: &Path) -> bool;
}

/// Local filesystem store.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSnapshotStore;

impl FsSnapshotStore {
    pub fn new() -> Self {
        Self
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::create_dir_all(path).map_err(|e| StorageError::io(path, e))
    }

    fn list_entries(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>, StorageError> {
        let read_dir = match std::fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            let path = entry.path();
            let is_file = entry
                .file_type()
                .map_err(|e| StorageError::io(&path, e))?
                .is_file();
            if is_file && path.extension().and_then(|e| e.to_str()) == Some(extension) {
                entries.push(path);
            }
        }
        Ok(entries)
    }

    fn entry_creation_time(&self, path: &Path) -> Result<SystemTime, StorageError> {
        let meta = std::fs::metadata(path).map_err(|e| StorageError::io(path, e))?;
        // Birth time is missing on some filesystems; fall back to mtime there.
        meta.created()
            .or_else(|_| meta.modified())
            .map_err(|e| StorageError::io(path, e))
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = temp_file_in(dir).map_err(|e| StorageError::io(dir, e))?;
        tmp.write_all(content)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| StorageError::io(path, e.error))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::remove_file(path).map_err(|e| StorageError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        std::fs::rename(from, to).map_err(|e| StorageError::io(from, e))
    }

    #[cfg(unix)]
    fn is_same_entry(&self, a: &Path, b: &Path) -> bool {
        use std::os::unix::fs::MetadataExt;
        match (std::fs::metadata(a), std::fs::metadata(b)) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    fn is_same_entry(&self, a: &Path, b: &Path) -> bool {
        match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Temp file next to the destination. `NamedTempFile` defaults to owner-only
/// access; snapshots get the same access as other files the host writes.
#[cfg(unix)]
fn temp_file_in(dir: &Path) -> std::io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    tempfile::Builder::new()
        .permissions(std::fs::Permissions::from_mode(SNAPSHOT_MODE))
        .tempfile_in(dir)
}

#[cfg(not(unix))]
fn temp_file_in(dir: &Path) -> std::io::Result<NamedTempFile> {
    NamedTempFile::new_in(dir)
}
