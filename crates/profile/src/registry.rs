use crate::profile::Profile;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Extension of persisted profile documents.
pub const PROFILE_EXTENSION: &str = "json";

/// Errors from loading profiles off disk.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid profile document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The host's index of live profiles.
///
/// Keys are the file stems the profiles were loaded from. They are expected to
/// equal each profile's identity but may have drifted.
pub trait ProfileRegistry: Send + Sync {
    /// Directory holding `<key>.json` profile documents.
    fn profile_dir(&self) -> &Path;

    /// Snapshot of every `(key, profile)` pair currently indexed.
    fn get_all(&self) -> BTreeMap<String, Profile>;

    fn get_by_id(&self, key: &str) -> Option<Profile>;

    /// Drop the entry indexed under `key`. Returns whether it was present.
    fn delete_by_id(&self, key: &str) -> bool;

    /// (Re)load `<profile_dir>/<id>.json` and index it under `id`.
    fn load(&self, id: &str) -> Result<Profile, RegistryError>;

    /// Storage location of the profile indexed under `key`.
    fn profile_path(&self, key: &str) -> PathBuf {
        self.profile_dir().join(format!("{key}.{PROFILE_EXTENSION}"))
    }
}

/// File-backed registry: every `*.json` in the profile directory is one profile.
///
/// Uses BTreeMap so iteration order (and therefore repair order) is stable.
#[derive(Debug)]
pub struct FileProfileRegistry {
    dir: PathBuf,
    profiles: RwLock<BTreeMap<String, Profile>>,
}

impl FileProfileRegistry {
    /// Open the registry at `dir`, creating the directory if needed and loading
    /// every profile document found there.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;

        let read_dir = std::fs::read_dir(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut profiles = BTreeMap::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| RegistryError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_profile = path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(PROFILE_EXTENSION);
            if !is_profile {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let profile = read_profile(&path)?;
            profiles.insert(key.to_owned(), profile);
        }

        tracing::debug!(dir = %dir.display(), count = profiles.len(), "profile registry loaded");

        Ok(Self {
            dir,
            profiles: RwLock::new(profiles),
        })
    }

    /// Number of indexed profiles.
    pub fn len(&self) -> usize {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProfileRegistry for FileProfileRegistry {
    fn profile_dir(&self) -> &Path {
        &self.dir
    }

    fn get_all(&self) -> BTreeMap<String, Profile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get_by_id(&self, key: &str) -> Option<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn delete_by_id(&self, key: &str) -> bool {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    fn load(&self, id: &str) -> Result<Profile, RegistryError> {
        let profile = read_profile(&self.profile_path(id))?;
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_owned(), profile.clone());
        Ok(profile)
    }
}

fn read_profile(path: &Path) -> Result<Profile, RegistryError> {
    let bytes = std::fs::read(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
