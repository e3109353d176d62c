use autobackup_common::ProfileId;
use autobackup_profile::{RegistryError, SerializeError};
use std::path::{Path, PathBuf};

/// Errors from the underlying storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Path the failed operation was acting on.
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } => path,
        }
    }
}

/// Errors that abandon a single snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("session id {0:?} cannot name a backup directory")]
    InvalidSession(ProfileId),
    #[error("profile {0} not found in registry")]
    ProfileNotFound(ProfileId),
    #[error("failed to serialize profile {id}: {source}")]
    Serialize {
        id: ProfileId,
        #[source]
        source: SerializeError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure to repair one drifted profile. Other profiles are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("profile \"{key}\": id {id:?} cannot name a profile file")]
    InvalidIdentity { key: String, id: ProfileId },
    #[error("profile \"{key}\" => \"{id}\": target {path} already exists")]
    TargetExists {
        key: String,
        id: ProfileId,
        path: PathBuf,
    },
    #[error("profile \"{key}\" => \"{id}\": rename failed: {source}")]
    Rename {
        key: String,
        id: ProfileId,
        #[source]
        source: StorageError,
    },
    #[error("profile \"{id}\": reload after rename failed: {source}")]
    Reload {
        id: ProfileId,
        #[source]
        source: RegistryError,
    },
}
