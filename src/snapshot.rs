//! Reference dataset generations and the store that publishes them.
//!
//! A [`Snapshot`] is built completely by [`Snapshot::build`] before anyone
//! can see it and is never mutated afterwards. [`SnapshotStore`] holds the
//! visible generation behind a reader-writer lock; the refresh-in-progress
//! flag lives behind its own lock so a long parse never touches the data
//! lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Primary entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub name: String,
    pub group_id: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
}

/// One row of an auxiliary code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub code: u64,
    pub record_id: u64,
}

/// Raw tables as delivered by a producer, before indexing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceTables {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub aliases: Vec<CodeEntry>,
    #[serde(default)]
    pub legacy_codes: Vec<CodeEntry>,
}

/// Data-quality counters computed once per build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub record_count: usize,
    pub group_count: usize,
    pub duplicate_record_ids: usize,
    pub duplicate_group_ids: usize,
    /// Records whose group is not in the group table.
    pub orphan_records: usize,
    /// Alias codes pointing at unknown records.
    pub dangling_aliases: usize,
    pub dangling_legacy_codes: usize,
    /// Codes that appeared more than once in either code table.
    pub duplicate_codes: usize,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_record_ids == 0
            && self.duplicate_group_ids == 0
            && self.orphan_records == 0
            && self.dangling_aliases == 0
            && self.dangling_legacy_codes == 0
            && self.duplicate_codes == 0
    }
}

pub type RecordIndex = HashMap<u64, Record>;
pub type GroupIndex = HashMap<u64, Group>;
pub type CodeIndex = HashMap<u64, u64>;

/// One generation of the served dataset.
///
/// Fields are shared handles so accessors can hand them out without
/// copying the collections.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: Arc<Vec<Record>>,
    record_index: Arc<RecordIndex>,
    groups: Arc<Vec<Group>>,
    group_index: Arc<GroupIndex>,
    alias_index: Arc<CodeIndex>,
    legacy_index: Arc<CodeIndex>,
    quality: Arc<QualityReport>,
    generation: u64,
    last_updated: Option<SystemTime>,
}

impl Snapshot {
    /// The generation served before the first successful refresh.
    pub fn empty() -> Self {
        Self::build(SourceTables::default())
    }

    /// Indexes raw tables into a publishable snapshot.
    ///
    /// The first occurrence of a duplicated record, group or code wins;
    /// every later one is counted in the quality report.
    pub fn build(source: SourceTables) -> Self {
        let mut quality = QualityReport::default();

        let mut record_index = RecordIndex::with_capacity(source.records.len());
        let mut records = Vec::with_capacity(source.records.len());
        for record in source.records {
            if record_index.contains_key(&record.id) {
                quality.duplicate_record_ids += 1;
                continue;
            }
            record_index.insert(record.id, record.clone());
            records.push(record);
        }

        let mut group_index = GroupIndex::with_capacity(source.groups.len());
        let mut groups = Vec::with_capacity(source.groups.len());
        for group in source.groups {
            if group_index.contains_key(&group.id) {
                quality.duplicate_group_ids += 1;
                continue;
            }
            group_index.insert(group.id, group.clone());
            groups.push(group);
        }

        quality.orphan_records = records
            .iter()
            .filter(|record| !group_index.contains_key(&record.group_id))
            .count();

        let (alias_index, dangling_aliases, duplicate_aliases) =
            index_codes(&source.aliases, &record_index);
        let (legacy_index, dangling_legacy, duplicate_legacy) =
            index_codes(&source.legacy_codes, &record_index);
        quality.dangling_aliases = dangling_aliases;
        quality.dangling_legacy_codes = dangling_legacy;
        quality.duplicate_codes = duplicate_aliases + duplicate_legacy;

        quality.record_count = records.len();
        quality.group_count = groups.len();

        Self {
            records: Arc::new(records),
            record_index: Arc::new(record_index),
            groups: Arc::new(groups),
            group_index: Arc::new(group_index),
            alias_index: Arc::new(alias_index),
            legacy_index: Arc::new(legacy_index),
            quality: Arc::new(quality),
            generation: 0,
            last_updated: None,
        }
    }

    pub fn records(&self) -> &Arc<Vec<Record>> {
        &self.records
    }

    pub fn record_index(&self) -> &Arc<RecordIndex> {
        &self.record_index
    }

    pub fn groups(&self) -> &Arc<Vec<Group>> {
        &self.groups
    }

    pub fn group_index(&self) -> &Arc<GroupIndex> {
        &self.group_index
    }

    pub fn alias_index(&self) -> &Arc<CodeIndex> {
        &self.alias_index
    }

    pub fn legacy_index(&self) -> &Arc<CodeIndex> {
        &self.legacy_index
    }

    pub fn quality(&self) -> &Arc<QualityReport> {
        &self.quality
    }

    /// 0 until the first publish, then incremented by every publish.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this snapshot became visible; `None` before the first publish.
    pub fn last_updated(&self) -> Option<SystemTime> {
        self.last_updated
    }

    pub fn record(&self, id: u64) -> Option<&Record> {
        self.record_index.get(&id)
    }

    pub fn group(&self, id: u64) -> Option<&Group> {
        self.group_index.get(&id)
    }

    /// Resolves an alias code to its record, if both exist.
    pub fn record_by_alias(&self, code: u64) -> Option<&Record> {
        self.alias_index.get(&code).and_then(|id| self.record(*id))
    }

    pub fn record_by_legacy_code(&self, code: u64) -> Option<&Record> {
        self.legacy_index.get(&code).and_then(|id| self.record(*id))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

fn index_codes(entries: &[CodeEntry], records: &RecordIndex) -> (CodeIndex, usize, usize) {
    let mut index = CodeIndex::with_capacity(entries.len());
    let mut dangling = 0;
    let mut duplicates = 0;
    for entry in entries {
        if index.contains_key(&entry.code) {
            duplicates += 1;
            continue;
        }
        if !records.contains_key(&entry.record_id) {
            dangling += 1;
        }
        index.insert(entry.code, entry.record_id);
    }
    (index, dangling, duplicates)
}

/// Holds the visible snapshot and the refresh-in-progress flag.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
    refreshing: Mutex<bool>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
            refreshing: Mutex::new(false),
        }
    }

    /// The whole current generation. Resolve one logical request against
    /// one handle to see a single generation throughout.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.read())
    }

    pub fn records(&self) -> Arc<Vec<Record>> {
        Arc::clone(self.read().records())
    }

    pub fn record_index(&self) -> Arc<RecordIndex> {
        Arc::clone(self.read().record_index())
    }

    pub fn groups(&self) -> Arc<Vec<Group>> {
        Arc::clone(self.read().groups())
    }

    pub fn group_index(&self) -> Arc<GroupIndex> {
        Arc::clone(self.read().group_index())
    }

    pub fn alias_index(&self) -> Arc<CodeIndex> {
        Arc::clone(self.read().alias_index())
    }

    pub fn legacy_index(&self) -> Arc<CodeIndex> {
        Arc::clone(self.read().legacy_index())
    }

    pub fn quality(&self) -> Arc<QualityReport> {
        Arc::clone(self.read().quality())
    }

    pub fn last_updated(&self) -> Option<SystemTime> {
        self.read().last_updated()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation()
    }

    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the refresh flag. Returns false, changing nothing, when a
    /// refresh is already running. Never touches the data lock.
    pub fn begin_refresh(&self) -> bool {
        let mut refreshing = self.refreshing.lock().unwrap_or_else(PoisonError::into_inner);
        if *refreshing {
            return false;
        }
        *refreshing = true;
        true
    }

    /// Clears the refresh flag unconditionally.
    pub fn end_refresh(&self) {
        *self.refreshing.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// [`begin_refresh`](Self::begin_refresh) paired with a guard that
    /// calls [`end_refresh`](Self::end_refresh) when dropped, including
    /// during unwinding.
    pub fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.begin_refresh().then(|| RefreshGuard { store: self })
    }

    /// Publishes `snapshot` as the next generation and stamps it with the
    /// current time. Returns the new generation number.
    ///
    /// Only a pointer swap happens under the write lock; the superseded
    /// generation is released after the lock is dropped.
    pub fn replace(&self, snapshot: Snapshot) -> u64 {
        let mut published = snapshot;

        let (generation, previous) = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            published.generation = current.generation + 1;
            published.last_updated = Some(SystemTime::now());
            let generation = published.generation;
            (generation, std::mem::replace(&mut *current, Arc::new(published)))
        };

        drop(previous);
        generation
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Arc<Snapshot>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the refresh flag; releases it on drop.
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    store: &'a SnapshotStore,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.store.end_refresh();
    }
}

/// Seconds since the Unix epoch, 0 for times before it.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn record(id: u64, group_id: u64) -> Record {
        Record {
            id,
            name: format!("record-{id}"),
            group_id,
            attributes: BTreeMap::new(),
        }
    }

    fn group(id: u64) -> Group {
        Group {
            id,
            name: format!("group-{id}"),
        }
    }

    /// `n` records spread over `n / 10 + 1` groups, one alias per record.
    fn tables(n: u64) -> SourceTables {
        SourceTables {
            records: (0..n).map(|id| record(id, id / 10)).collect(),
            groups: (0..=n / 10).map(group).collect(),
            aliases: (0..n)
                .map(|id| CodeEntry {
                    code: 1000 + id,
                    record_id: id,
                })
                .collect(),
            legacy_codes: Vec::new(),
        }
    }

    #[test]
    fn test_build_indexes_match_records() {
        let snapshot = Snapshot::build(tables(25));

        assert_eq!(snapshot.records().len(), 25);
        assert_eq!(snapshot.record_index().len(), 25);
        for record in snapshot.records().iter() {
            assert_eq!(snapshot.record(record.id), Some(record));
        }
        assert_eq!(snapshot.groups().len(), 3);
        assert_eq!(snapshot.group_index().len(), 3);
        assert_eq!(snapshot.record_by_alias(1007).map(|r| r.id), Some(7));
        assert!(snapshot.quality().is_clean());
    }

    #[test]
    fn test_build_reports_quality_problems() {
        let mut source = tables(5);
        source.records.push(record(2, 0));
        source.records.push(record(99, 42));
        source.groups.push(group(0));
        source.aliases.push(CodeEntry {
            code: 5000,
            record_id: 12345,
        });
        source.aliases.push(CodeEntry {
            code: 1000,
            record_id: 4,
        });
        source.legacy_codes.push(CodeEntry {
            code: 1,
            record_id: 777,
        });

        let snapshot = Snapshot::build(source);
        let quality = snapshot.quality();

        assert_eq!(quality.record_count, 6);
        assert_eq!(quality.duplicate_record_ids, 1);
        assert_eq!(quality.duplicate_group_ids, 1);
        assert_eq!(quality.orphan_records, 1);
        assert_eq!(quality.dangling_aliases, 1);
        assert_eq!(quality.dangling_legacy_codes, 1);
        assert_eq!(quality.duplicate_codes, 1);
        assert!(!quality.is_clean());

        // Dangling codes are kept in the index but do not resolve.
        assert_eq!(snapshot.alias_index().get(&5000), Some(&12345));
        assert!(snapshot.record_by_alias(5000).is_none());
        assert!(snapshot.record_by_legacy_code(1).is_none());
        // First occurrence wins.
        assert_eq!(snapshot.record_by_alias(1000).map(|r| r.id), Some(0));
    }

    #[test]
    fn test_empty_store_serves_empty_collections() {
        let store = SnapshotStore::new();
        assert!(store.records().is_empty());
        assert!(store.record_index().is_empty());
        assert!(store.groups().is_empty());
        assert!(store.group_index().is_empty());
        assert!(store.alias_index().is_empty());
        assert!(store.legacy_index().is_empty());
        assert_eq!(store.generation(), 0);
        assert_eq!(store.last_updated(), None);
        assert!(!store.is_refreshing());
    }

    #[test]
    fn test_replace_publishes_new_generation() {
        let store = SnapshotStore::new();
        let before = SystemTime::now();

        assert_eq!(store.replace(Snapshot::build(tables(10))), 1);
        assert_eq!(store.records().len(), 10);
        assert!(store.last_updated().is_some_and(|t| t >= before));

        assert_eq!(store.replace(Snapshot::build(tables(3))), 2);
        assert_eq!(store.records().len(), 3);
        assert_eq!(store.record_index().len(), 3);
    }

    #[test]
    fn test_single_refresh_holder() {
        let store = Arc::new(SnapshotStore::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.begin_refresh()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(store.is_refreshing());
        assert!(!store.begin_refresh());

        store.end_refresh();
        assert!(!store.is_refreshing());
        assert!(store.begin_refresh());
    }

    #[test]
    fn test_refresh_guard_releases_on_drop_and_panic() {
        let store = SnapshotStore::new();
        {
            let _guard = store.try_begin_refresh().expect("flag should be free");
            assert!(store.is_refreshing());
            assert!(store.try_begin_refresh().is_none());
        }
        assert!(!store.is_refreshing());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.try_begin_refresh();
            panic!("parse blew up");
        }));
        assert!(result.is_err());
        assert!(!store.is_refreshing());
    }

    #[test]
    fn test_refresh_flag_does_not_block_readers() {
        let store = SnapshotStore::new();
        store.replace(Snapshot::build(tables(4)));

        let _guard = store.try_begin_refresh();
        assert_eq!(store.records().len(), 4);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_readers_never_see_mixed_generations() {
        let store = Arc::new(SnapshotStore::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut reads = 0u64;
                    loop {
                        let finished = done.load(std::sync::atomic::Ordering::Relaxed);
                        let snapshot = store.snapshot();
                        let n = snapshot.records().len();
                        assert_eq!(snapshot.record_index().len(), n);
                        assert_eq!(snapshot.alias_index().len(), n);
                        if n > 0 {
                            assert_eq!(snapshot.group_index().len() as u64, n as u64 / 10 + 1);
                        }
                        // Generation g was built from tables(g * 7).
                        assert_eq!(n as u64, snapshot.generation() * 7);
                        reads += 1;
                        if finished {
                            break reads;
                        }
                    }
                })
            })
            .collect();

        for generation in 1..=50u64 {
            store.replace(Snapshot::build(tables(generation * 7)));
        }
        done.store(true, std::sync::atomic::Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(store.generation(), 50);
    }
}
