//! Repair of registry key drift.
//!
//! Older store versions could index a profile under a key that differs from
//! its `info.id`. For every such entry the stale key is dropped, the profile
//! file is renamed to `<id>.json` and the profile is reloaded under `id`.
//! Each step starts only after the previous one succeeded.

use crate::error::RepairError;
use crate::store::SnapshotStore;
use autobackup_common::ProfileId;
use autobackup_profile::ProfileRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedProfile {
    pub from_key: String,
    pub id: ProfileId,
}

#[derive(Debug, Default)]
pub struct RepairReport {
    pub repaired: Vec<RenamedProfile>,
    pub failures: Vec<RepairError>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.repaired.is_empty() && self.failures.is_empty()
    }
}

pub struct KeyConsistencyRepairer<'a, R: ?Sized, S: ?Sized> {
    registry: &'a R,
    store: &'a S,
}

impl<'a, R, S> KeyConsistencyRepairer<'a, R, S>
where
    R: ProfileRegistry + ?Sized,
    S: SnapshotStore + ?Sized,
{
    pub fn new(registry: &'a R, store: &'a S) -> Self {
        Self { registry, store }
    }

    /// One pass over the whole registry. Per-profile failures are logged and
    /// collected; they never stop the pass.
    pub fn repair(&self) -> RepairReport {
        let mut report = RepairReport::default();
        for (key, profile) in self.registry.get_all() {
            let id = profile.id().clone();
            if id.as_str() == key {
                continue;
            }
            match self.repair_one(&key, &id) {
                Ok(()) => {
                    tracing::info!(
                        from = %format!("{key}.json"),
                        to = %format!("{id}.json"),
                        "profile file name fixed"
                    );
                    report.repaired.push(RenamedProfile { from_key: key, id });
                }
                Err(e) => {
                    tracing::error!(error = %e, "profile key repair failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }

    fn repair_one(&self, key: &str, id: &ProfileId) -> Result<(), RepairError> {
        // The id comes from file contents; it must stay inside the profile directory.
        if !id.is_single_path_component() {
            return Err(RepairError::InvalidIdentity {
                key: key.to_owned(),
                id: id.clone(),
            });
        }

        let from = self.registry.profile_path(key);
        let to = self.registry.profile_path(id.as_str());

        // Never clobber another profile's file; leave the drifted entry alone.
        // A target that is the source itself (case-insensitive filesystems) is fine.
        if self.store.exists(&to) && !self.store.is_same_entry(&from, &to) {
            return Err(RepairError::TargetExists {
                key: key.to_owned(),
                id: id.clone(),
                path: to,
            });
        }

        self.registry.delete_by_id(key);
        self.store
            .rename(&from, &to)
            .map_err(|source| RepairError::Rename {
                key: key.to_owned(),
                id: id.clone(),
                source,
            })?;
        self.registry
            .load(id.as_str())
            .map_err(|source| RepairError::Reload {
                id: id.clone(),
                source,
            })?;
        Ok(())
    }
}
