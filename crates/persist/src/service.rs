//! Snapshot orchestration for host lifecycle events.

use crate::config::AutoBackupConfig;
use crate::error::{SnapshotError, StorageError};
use crate::repair::{KeyConsistencyRepairer, RepairReport};
use crate::retention::{DeletionNotice, PruneReport, RetentionPruner};
use crate::snapshot::{
    Clock, SnapshotEntry, SystemClock, TimestampToken, session_dir, snapshot_file_name,
};
use crate::store::SnapshotStore;
use autobackup_common::{LifecycleEvent, ProfileId};
use autobackup_profile::{JsonProfileSerializer, ProfileRegistry, ProfileSerializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// What the host tells the service about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Compatibility generation of the host. Snapshots of different tags never
    /// share a retention pool.
    pub version_tag: String,
    /// Host-wide flag: write profiles without whitespace.
    pub compress_profile: bool,
}

/// Result of one successful snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub session_id: ProfileId,
    pub event: LifecycleEvent,
    pub path: PathBuf,
    pub file_name: String,
    /// The session directory did not exist before this event.
    pub dir_created: bool,
    pub prune: PruneReport,
}

/// One mutex per session so two events of the same session never compute
/// overlapping prune decisions.
#[derive(Debug, Default)]
struct SessionLocks {
    locks: Mutex<HashMap<ProfileId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn lock_for(&self, session_id: &ProfileId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(session_id.clone()).or_default().clone()
    }

    /// Hand back a lock from `lock_for`, forgetting the session once nobody
    /// else holds or waits on it.
    fn release(&self, session_id: &ProfileId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }
}

pub struct SnapshotServiceBuilder<R, S> {
    config: AutoBackupConfig,
    host: HostContext,
    registry: Arc<R>,
    store: Arc<S>,
    serializer: Box<dyn ProfileSerializer>,
    clock: Box<dyn Clock>,
}

impl<R: ProfileRegistry, S: SnapshotStore> SnapshotServiceBuilder<R, S> {
    pub fn serializer(mut self, serializer: impl ProfileSerializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Run the key repair pass (when enabled) and hand out the service.
    ///
    /// The service does not exist until repair is done, so no snapshot can
    /// race a rename.
    pub fn start(self) -> (SnapshotService<R, S>, RepairReport) {
        tracing::info!(
            enabled = self.config.enabled,
            version_tag = %self.host.version_tag,
            events = ?self.config.subscribed_events(),
            "auto-backup starting"
        );

        let report = if self.config.enabled {
            let report = KeyConsistencyRepairer::new(&*self.registry, &*self.store).repair();
            if !report.is_clean() {
                tracing::info!(
                    repaired = report.repaired.len(),
                    failed = report.failures.len(),
                    "profile key repair finished"
                );
            }
            report
        } else {
            RepairReport::default()
        };

        let service = SnapshotService {
            config: self.config,
            host: self.host,
            registry: self.registry,
            store: self.store,
            serializer: self.serializer,
            clock: self.clock,
            locks: SessionLocks::default(),
        };
        (service, report)
    }
}

/// Takes a full profile snapshot on each subscribed lifecycle event.
pub struct SnapshotService<R, S> {
    config: AutoBackupConfig,
    host: HostContext,
    registry: Arc<R>,
    store: Arc<S>,
    serializer: Box<dyn ProfileSerializer>,
    clock: Box<dyn Clock>,
    locks: SessionLocks,
}

impl<R: ProfileRegistry, S: SnapshotStore> SnapshotService<R, S> {
    pub fn builder(
        config: AutoBackupConfig,
        host: HostContext,
        registry: Arc<R>,
        store: Arc<S>,
    ) -> SnapshotServiceBuilder<R, S> {
        SnapshotServiceBuilder {
            config,
            host,
            registry,
            store,
            serializer: Box::new(JsonProfileSerializer),
            clock: Box::new(SystemClock),
        }
    }

    pub fn config(&self) -> &AutoBackupConfig {
        &self.config
    }

    /// Directory holding `session_id`'s snapshots for this host version.
    pub fn session_dir(&self, session_id: &ProfileId) -> PathBuf {
        session_dir(self.registry.profile_dir(), &self.host.version_tag, session_id)
    }

    /// Handle one lifecycle event.
    ///
    /// Returns `Ok(None)` when the event is not subscribed. Errors are logged
    /// here and also returned; the host does not need to act on them.
    pub fn handle_event(
        &self,
        event: LifecycleEvent,
        session_id: &ProfileId,
    ) -> Result<Option<SnapshotRecord>, SnapshotError> {
        if !self.config.is_subscribed(event) {
            tracing::trace!(%event, session = %session_id, "event not subscribed");
            return Ok(None);
        }

        let lock = self.locks.lock_for(session_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.capture(event, session_id)
        };
        self.locks.release(session_id, lock);

        match result {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::error!(%event, session = %session_id, error = %e, "backup skipped");
                Err(e)
            }
        }
    }

    /// Snapshot entries of `session_id`, oldest first.
    pub fn snapshots(&self, session_id: &ProfileId) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        let dir = self.checked_session_dir(session_id)?;
        let mut entries = SnapshotEntry::collect(&*self.store, &dir, session_id)?;
        SnapshotEntry::sort_oldest_first(&mut entries);
        Ok(entries)
    }

    fn capture(
        &self,
        event: LifecycleEvent,
        session_id: &ProfileId,
    ) -> Result<SnapshotRecord, SnapshotError> {
        let dir = self.checked_session_dir(session_id)?;

        // Nothing on disk is touched until the profile is in hand.
        let profile = self
            .registry
            .get_by_id(session_id.as_str())
            .ok_or_else(|| SnapshotError::ProfileNotFound(session_id.clone()))?;
        let content = self
            .serializer
            .serialize(&profile, !self.host.compress_profile)
            .map_err(|source| SnapshotError::Serialize {
                id: session_id.clone(),
                source,
            })?;

        let dir_created = self.ensure_dir(&dir)?;

        let entries = SnapshotEntry::collect(&*self.store, &dir, session_id)?;
        let prune = self.prune(entries, session_id);

        let (path, file_name) = self.next_snapshot_path(&dir, event);
        self.store.write(&path, &content)?;

        if self.config.backup_saved_log {
            tracing::info!(session = %session_id, file = %file_name, "new backup file saved");
        }

        Ok(SnapshotRecord {
            session_id: session_id.clone(),
            event,
            path,
            file_name,
            dir_created,
            prune,
        })
    }

    /// The session's directory, provided the id cannot climb out of the
    /// version directory.
    fn checked_session_dir(&self, session_id: &ProfileId) -> Result<PathBuf, SnapshotError> {
        if !session_id.is_single_path_component() {
            return Err(SnapshotError::InvalidSession(session_id.clone()));
        }
        Ok(self.session_dir(session_id))
    }

    fn ensure_dir(&self, dir: &Path) -> Result<bool, StorageError> {
        if self.store.exists(dir) {
            return Ok(false);
        }
        self.store.create_dir(dir)?;
        tracing::info!(dir = %dir.display(), "backup directory created");
        Ok(true)
    }

    fn prune(&self, entries: Vec<SnapshotEntry>, session_id: &ProfileId) -> PruneReport {
        let policy = self.config.retention_policy();
        let report = RetentionPruner::new(&*self.store).prune(entries, &policy);

        if policy.log_deletions {
            match report.notice() {
                DeletionNotice::None => {}
                DeletionNotice::Single(file) => tracing::warn!(
                    session = %session_id,
                    max = policy.max_count,
                    %file,
                    "maximum backup reached, backup file deleted"
                ),
                DeletionNotice::Many(count) => tracing::warn!(
                    session = %session_id,
                    max = policy.max_count,
                    count,
                    "maximum backup reached, backup files deleted"
                ),
            }
        }
        report
    }

    /// Path for a snapshot taken now. If a file of that name already exists
    /// (two events within one millisecond) the token moves forward until free.
    fn next_snapshot_path(&self, dir: &Path, event: LifecycleEvent) -> (PathBuf, String) {
        let mut at = self.clock.now();
        loop {
            let file_name = snapshot_file_name(&TimestampToken::from_datetime(at), event);
            let path = dir.join(&file_name);
            if !self.store.exists(&path) {
                return (path, file_name);
            }
            at += chrono::TimeDelta::milliseconds(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySnapshotStore;
    use crate::snapshot::BACKUP_DIR_NAME;
    use crate::store::FsSnapshotStore;
    use autobackup_profile::{FileProfileRegistry, Profile, SerializeError};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::{Duration, SystemTime};

    /// Advances one second per reading.
    struct SteppingClock(AtomicI64);

    impl SteppingClock {
        fn new() -> Self {
            Self(AtomicI64::new(1_700_000_000_000))
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let ms = self.0.fetch_add(1_000, Ordering::SeqCst);
            Utc.timestamp_millis_opt(ms).unwrap()
        }
    }

    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(0).unwrap()
        }
    }

    struct FailingSerializer;

    impl ProfileSerializer for FailingSerializer {
        fn serialize(&self, _: &Profile, _: bool) -> Result<Vec<u8>, SerializeError> {
            Err(serde_json::from_str::<serde_json::Value>("{").unwrap_err().into())
        }
    }

    fn host() -> HostContext {
        HostContext {
            version_tag: "3.9.8".into(),
            compress_profile: false,
        }
    }

    fn config(max: i64) -> AutoBackupConfig {
        AutoBackupConfig {
            maximum_backup_per_profile: max,
            ..AutoBackupConfig::default()
        }
    }

    fn write_profile(dir: &Path, key: &str, id: &str) {
        let doc = json!({ "info": { "id": id }, "inventory": { "items": [1, 2, 3] } });
        std::fs::write(dir.join(format!("{key}.json")), doc.to_string()).unwrap();
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        registry: Arc<FileProfileRegistry>,
        store: Arc<MemorySnapshotStore>,
    }

    fn fixture(profiles: &[(&str, &str)]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        for (key, id) in profiles {
            write_profile(tmp.path(), key, id);
        }
        Fixture {
            registry: Arc::new(FileProfileRegistry::open(tmp.path()).unwrap()),
            store: Arc::new(MemorySnapshotStore::new()),
            _tmp: tmp,
        }
    }

    fn start(
        f: &Fixture,
        config: AutoBackupConfig,
    ) -> SnapshotService<FileProfileRegistry, MemorySnapshotStore> {
        SnapshotService::builder(config, host(), f.registry.clone(), f.store.clone())
            .clock(SteppingClock::new())
            .start()
            .0
    }

    fn abc() -> ProfileId {
        ProfileId::from("abc")
    }

    #[test]
    fn first_event_creates_dir_and_writes_snapshot() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(3));

        let record = service
            .handle_event(LifecycleEvent::RaidEnd, &abc())
            .unwrap()
            .unwrap();

        assert!(record.dir_created);
        assert_eq!(record.file_name, "2023-11-14T221320000Z-onRaidEnd.json");
        assert_eq!(
            record.path,
            f.registry
                .profile_dir()
                .join("AutoBackup/3.9.8/abc/2023-11-14T221320000Z-onRaidEnd.json")
        );
        let written: Profile =
            serde_json::from_slice(&f.store.contents(&record.path).unwrap()).unwrap();
        assert_eq!(written, f.registry.get_by_id("abc").unwrap());

        let second = service
            .handle_event(LifecycleEvent::Logout, &abc())
            .unwrap()
            .unwrap();
        assert!(!second.dir_created);
    }

    #[test]
    fn cap_of_three_keeps_newest_three() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(3));
        let dir = service.session_dir(&abc());
        let t = |s| SystemTime::UNIX_EPOCH + Duration::from_secs(s);
        f.store.insert_with_time(dir.join("t1.json"), b"{}", t(1));
        f.store.insert_with_time(dir.join("t2.json"), b"{}", t(2));
        f.store.insert_with_time(dir.join("t3.json"), b"{}", t(3));

        let record = service
            .handle_event(LifecycleEvent::RaidEnd, &abc())
            .unwrap()
            .unwrap();

        assert_eq!(record.prune.notice(), DeletionNotice::Single("t1.json".into()));
        let names: Vec<_> = service
            .snapshots(&abc())
            .unwrap()
            .iter()
            .map(SnapshotEntry::name)
            .collect();
        assert_eq!(names, ["t2.json", "t3.json", record.file_name.as_str()]);
    }

    #[test]
    fn count_after_write_is_bounded_by_cap() {
        for max in 1..=4_i64 {
            let f = fixture(&[("abc", "abc")]);
            let service = start(&f, config(max));
            for n in 1..=6_usize {
                service.handle_event(LifecycleEvent::GameStart, &abc()).unwrap();
                let count = service.snapshots(&abc()).unwrap().len();
                assert_eq!(count, n.min(max as usize), "max={max} after {n} events");
            }
        }
    }

    #[test]
    fn zero_cap_never_deletes() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(0));
        let dir = service.session_dir(&abc());
        for i in 0..10 {
            f.store
                .insert_with_time(dir.join(format!("old{i}.json")), b"{}", SystemTime::UNIX_EPOCH);
        }

        for _ in 0..10 {
            let record = service
                .handle_event(LifecycleEvent::RaidStart, &abc())
                .unwrap();
            // RaidStart is off by default.
            assert!(record.is_none());
        }

        let mut cfg = config(0);
        cfg.auto_backup.on_raid_start = true;
        let service = start(&f, cfg);
        for _ in 0..10 {
            let record = service
                .handle_event(LifecycleEvent::RaidStart, &abc())
                .unwrap()
                .unwrap();
            assert_eq!(record.prune.deleted_count(), 0);
        }
        assert_eq!(service.snapshots(&abc()).unwrap().len(), 20);
    }

    #[test]
    fn disabled_event_writes_nothing() {
        let f = fixture(&[("abc", "abc")]);
        let mut cfg = config(3);
        cfg.auto_backup.on_logout = false;
        let service = start(&f, cfg);

        assert!(service.handle_event(LifecycleEvent::Logout, &abc()).unwrap().is_none());
        assert!(!f.store.exists(&service.session_dir(&abc())));
    }

    #[test]
    fn disabled_service_ignores_everything() {
        let f = fixture(&[("xyz", "abc")]);
        let cfg = AutoBackupConfig {
            enabled: false,
            ..config(3)
        };
        let (service, report) =
            SnapshotService::builder(cfg, host(), f.registry.clone(), f.store.clone()).start();

        assert!(report.is_clean());
        assert!(f.registry.get_by_id("xyz").is_some());
        for event in LifecycleEvent::ALL {
            assert!(service.handle_event(event, &abc()).unwrap().is_none());
        }
    }

    #[test]
    fn unknown_profile_touches_nothing() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(1));
        let dir = service.session_dir(&ProfileId::from("ghost"));
        f.store
            .insert_with_time(dir.join("old.json"), b"{}", SystemTime::UNIX_EPOCH);

        let err = service
            .handle_event(LifecycleEvent::RaidEnd, &ProfileId::from("ghost"))
            .unwrap_err();

        assert!(matches!(err, SnapshotError::ProfileNotFound(_)));
        assert_eq!(f.store.file_names(&dir), ["old.json"]);
    }

    #[test]
    fn session_id_escaping_backup_dir_is_refused() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(1));

        for bad in ["..", "../abc", "a/b", ""] {
            let err = service
                .handle_event(LifecycleEvent::RaidEnd, &ProfileId::from(bad))
                .unwrap_err();
            assert!(matches!(err, SnapshotError::InvalidSession(_)), "{bad:?}");
            assert!(matches!(
                service.snapshots(&ProfileId::from(bad)),
                Err(SnapshotError::InvalidSession(_))
            ));
        }
        assert!(!f.store.exists(&f.registry.profile_dir().join(BACKUP_DIR_NAME)));
    }

    #[test]
    fn finished_sessions_release_their_locks() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(3));
        let tracked = || service.locks.locks.lock().unwrap().len();

        for n in 0..5 {
            let ghost = ProfileId::from(format!("ghost{n}"));
            assert!(service.handle_event(LifecycleEvent::RaidEnd, &ghost).is_err());
        }
        service.handle_event(LifecycleEvent::RaidEnd, &abc()).unwrap();

        assert_eq!(tracked(), 0);
    }

    #[test]
    fn serializer_failure_skips_snapshot() {
        let f = fixture(&[("abc", "abc")]);
        let (service, _) =
            SnapshotService::builder(config(3), host(), f.registry.clone(), f.store.clone())
                .serializer(FailingSerializer)
                .start();

        let err = service.handle_event(LifecycleEvent::GameStart, &abc()).unwrap_err();
        assert!(matches!(err, SnapshotError::Serialize { .. }));
        assert!(service.snapshots(&abc()).unwrap().is_empty());
    }

    #[test]
    fn failed_deletion_does_not_block_write() {
        let f = fixture(&[("abc", "abc")]);
        let service = start(&f, config(1));
        let dir = service.session_dir(&abc());
        f.store
            .insert_with_time(dir.join("stuck.json"), b"{}", SystemTime::UNIX_EPOCH);
        f.store.fail_removal_of(dir.join("stuck.json"));

        let record = service
            .handle_event(LifecycleEvent::RaidEnd, &abc())
            .unwrap()
            .unwrap();

        assert_eq!(record.prune.failed.len(), 1);
        assert!(f.store.contents(&record.path).is_some());
    }

    #[test]
    fn same_millisecond_events_get_distinct_files() {
        let f = fixture(&[("abc", "abc")]);
        let (service, _) =
            SnapshotService::builder(config(0), host(), f.registry.clone(), f.store.clone())
                .clock(FrozenClock)
                .start();

        let a = service.handle_event(LifecycleEvent::RaidEnd, &abc()).unwrap().unwrap();
        let b = service.handle_event(LifecycleEvent::RaidEnd, &abc()).unwrap().unwrap();

        assert_eq!(a.file_name, "1970-01-01T000000000Z-onRaidEnd.json");
        assert_eq!(b.file_name, "1970-01-01T000000001Z-onRaidEnd.json");
    }

    #[test]
    fn compress_flag_selects_compact_output() {
        let f = fixture(&[("abc", "abc")]);
        let compact = HostContext {
            compress_profile: true,
            ..host()
        };
        let (service, _) =
            SnapshotService::builder(config(3), compact, f.registry.clone(), f.store.clone())
                .start();

        let record = service.handle_event(LifecycleEvent::GameStart, &abc()).unwrap().unwrap();
        assert!(!f.store.contents(&record.path).unwrap().contains(&b'\n'));
    }

    #[test]
    fn version_tags_partition_pools() {
        let f = fixture(&[("abc", "abc")]);
        let old = start(&f, config(1));
        old.handle_event(LifecycleEvent::GameStart, &abc()).unwrap();

        let newer = HostContext {
            version_tag: "4.0.0".into(),
            ..host()
        };
        let (service, _) =
            SnapshotService::builder(config(1), newer, f.registry.clone(), f.store.clone()).start();
        let record = service.handle_event(LifecycleEvent::GameStart, &abc()).unwrap().unwrap();

        assert_eq!(record.prune.deleted_count(), 0);
        assert_eq!(old.snapshots(&abc()).unwrap().len(), 1);
        assert_eq!(service.snapshots(&abc()).unwrap().len(), 1);
    }

    #[test]
    fn start_repairs_before_snapshotting() {
        let f = fixture(&[("xyz", "abc")]);
        let (service, report) = SnapshotService::builder(
            config(3),
            host(),
            f.registry.clone(),
            Arc::new(FsSnapshotStore::new()),
        )
        .start();

        assert_eq!(report.repaired.len(), 1);
        assert!(f.registry.get_by_id("xyz").is_none());
        let record = service.handle_event(LifecycleEvent::GameStart, &abc()).unwrap().unwrap();
        assert!(record.path.is_file());
    }

    #[test]
    fn concurrent_events_for_one_session_respect_cap() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(tmp.path(), "abc", "abc");
        write_profile(tmp.path(), "def", "def");
        let registry = Arc::new(FileProfileRegistry::open(tmp.path()).unwrap());
        let (service, _) = SnapshotService::builder(
            config(3),
            host(),
            registry,
            Arc::new(FsSnapshotStore::new()),
        )
        .start();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let service = &service;
                scope.spawn(move || {
                    let session = if worker % 2 == 0 { "abc" } else { "def" };
                    for _ in 0..5 {
                        service
                            .handle_event(LifecycleEvent::RaidEnd, &ProfileId::from(session))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(service.snapshots(&abc()).unwrap().len(), 3);
        assert_eq!(service.snapshots(&ProfileId::from("def")).unwrap().len(), 3);
    }
}
