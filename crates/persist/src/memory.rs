//! In-memory snapshot store.
//!
//! Creation times come from a logical clock that advances one second per
//! created file and always lands after any explicitly inserted time, so
//! ordering is deterministic regardless of the host filesystem's timestamp
//! resolution. Removals can be made to fail for specific paths.

use crate::error::StorageError;
use crate::store::SnapshotStore;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
struct MemoryFile {
    content: Vec<u8>,
    created: SystemTime,
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, MemoryFile>,
    latest: Option<SystemTime>,
    failing_removals: BTreeSet<PathBuf>,
}

impl MemoryState {
    fn next_creation_time(&mut self) -> SystemTime {
        let next = self.latest.unwrap_or(SystemTime::UNIX_EPOCH) + Duration::from_secs(1);
        self.latest = Some(next);
        next
    }

    fn observe(&mut self, created: SystemTime) {
        self.latest = self.latest.max(Some(created));
    }

    fn parent_exists(&self, path: &Path) -> bool {
        path.parent()
            .is_none_or(|p| p.as_os_str().is_empty() || self.dirs.contains(p))
    }
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    state: Mutex<MemoryState>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a file with an explicit creation time, creating its parent.
    pub fn insert_with_time(&self, path: impl Into<PathBuf>, content: &[u8], created: SystemTime) {
        let path = path.into();
        let mut state = self.state();
        if let Some(parent) = path.parent() {
            add_dir_all(&mut state.dirs, parent);
        }
        state.observe(created);
        state.files.insert(
            path,
            MemoryFile {
                content: content.to_vec(),
                created,
            },
        );
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|f| f.content.clone())
    }

    /// File names directly inside `dir`, sorted.
    pub fn file_names(&self, dir: &Path) -> Vec<String> {
        self.state()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_owned))
            .collect()
    }

    /// Make every future removal of `path` fail.
    pub fn fail_removal_of(&self, path: impl Into<PathBuf>) {
        self.state().failing_removals.insert(path.into());
    }
}

fn add_dir_all(dirs: &mut BTreeSet<PathBuf>, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> StorageError {
    StorageError::io(path, Error::from(ErrorKind::NotFound))
}

impl SnapshotStore for MemorySnapshotStore {
    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.dirs.contains(path) || state.files.contains_key(path)
    }

    fn create_dir(&self, path: &Path) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.files.contains_key(path) {
            return Err(StorageError::io(path, Error::from(ErrorKind::AlreadyExists)));
        }
        add_dir_all(&mut state.dirs, path);
        Ok(())
    }

    fn list_entries(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>, StorageError> {
        Ok(self
            .state()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(extension))
            .cloned()
            .collect())
    }

    fn entry_creation_time(&self, path: &Path) -> Result<SystemTime, StorageError> {
        self.state()
            .files
            .get(path)
            .map(|f| f.created)
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state();
        if !state.parent_exists(path) {
            return Err(not_found(path));
        }
        // A replaced file is a new file, as with temp-file-and-rename on disk.
        let created = state.next_creation_time();
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                content: content.to_vec(),
                created,
            },
        );
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.failing_removals.contains(path) {
            return Err(StorageError::io(
                path,
                Error::new(ErrorKind::PermissionDenied, "removal refused"),
            ));
        }
        state.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let mut state = self.state();
        if !state.parent_exists(to) {
            return Err(not_found(to));
        }
        let file = state.files.remove(from).ok_or_else(|| not_found(from))?;
        state.files.insert(to.to_path_buf(), file);
        Ok(())
    }

    fn is_same_entry(&self, a: &Path, b: &Path) -> bool {
        a == b && self.exists(a)
    }
}
