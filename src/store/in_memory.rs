use crate::store::handle::{self, HandleCompleter};
use crate::store::{AckHandle, GroupId, MembersHandle, ReadHandle, Store, StoreConnector, StoreError, StoreHandle};
use bytes::{Bytes, BytesMut};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Duration;

// Not a replicated store. Each group is a pair of hash maps in this process, which is enough
// to exercise quorum accounting and retries without a cluster. Faults are injected per group.
//
// Clones share state, so a test can keep one clone to inject faults while the client owns another.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    min_writes: usize,
    latency: Option<Duration>,
    group_failure_probability: f64,
}

struct Inner {
    groups: BTreeMap<GroupId, GroupState>,
    write_attempts: HashMap<String, usize>,
    reads: usize,
    failing_submissions: usize,
    stalled: bool,
    stalled_acks: Vec<(HandleCompleter<HashSet<GroupId>>, HashSet<GroupId>)>,
}

#[derive(Default)]
struct GroupState {
    data: HashMap<String, BytesMut>,
    indexes: HashMap<String, Vec<String>>,
    down: bool,
    failing_writes: usize,
}

impl MemoryStore {
    /// Creates a store with the given groups. `min_writes` defaults to the number of groups.
    pub fn new(groups: &[GroupId]) -> Self {
        let groups: BTreeMap<GroupId, GroupState> = groups.iter().map(|g| (*g, GroupState::default())).collect();
        let min_writes = groups.len();

        MemoryStore {
            inner: Arc::new(Mutex::new(Inner {
                groups,
                write_attempts: HashMap::new(),
                reads: 0,
                failing_submissions: 0,
                stalled: false,
                stalled_acks: vec![],
            })),
            min_writes,
            latency: None,
            group_failure_probability: 0.0,
        }
    }

    pub fn with_min_writes(mut self, min_writes: usize) -> Self {
        self.min_writes = min_writes;
        self
    }

    /// Resolve acks after `latency` on a spawned task instead of immediately.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Each group independently rejects each write with this probability.
    pub fn with_group_failure_probability(mut self, probability: f64) -> Self {
        self.group_failure_probability = probability.max(0.0).min(1.0);
        self
    }

    pub fn groups(&self) -> Vec<GroupId> {
        self.lock().groups.keys().cloned().collect()
    }

    // -- fault injection --

    pub fn set_group_down(&self, group: GroupId, down: bool) {
        if let Some(state) = self.lock().groups.get_mut(&group) {
            state.down = down;
        }
    }

    /// The next `count` writes (or index updates) to `group` are not acknowledged.
    pub fn fail_next_writes(&self, group: GroupId, count: usize) {
        if let Some(state) = self.lock().groups.get_mut(&group) {
            state.failing_writes = count;
        }
    }

    /// The next `count` submissions of any kind fail synchronously.
    pub fn fail_next_submissions(&self, count: usize) {
        self.lock().failing_submissions = count;
    }

    /// While stalled, writes are applied but their acks are withheld until `release_stalled()`.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    pub fn release_stalled(&self) {
        let stalled_acks = std::mem::take(&mut self.lock().stalled_acks);
        for (completer, acks) in stalled_acks {
            completer.complete(Ok(acks));
        }
    }

    // -- inspection --

    /// Number of write or index submissions that reached the groups for `key`.
    pub fn write_attempts(&self, key: &str) -> usize {
        self.lock().write_attempts.get(key).cloned().unwrap_or(0)
    }

    /// Number of key reads that reached the store, across all keys.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn stored(&self, group: GroupId, key: &str) -> Option<Bytes> {
        self.lock()
            .groups
            .get(&group)
            .and_then(|state| state.data.get(key))
            .map(|data| Bytes::copy_from_slice(data))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("MemoryStore mutex guard poison")
    }

    fn ack_handle(&self, inner: &mut Inner, acks: HashSet<GroupId>) -> AckHandle {
        if inner.stalled {
            let (completer, handle) = handle::pending();
            inner.stalled_acks.push((completer, acks));
            return handle;
        }

        match self.latency {
            Some(latency) => {
                let (completer, handle) = handle::pending();
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    completer.complete(Ok(acks));
                });
                handle
            }
            None => StoreHandle::resolved(Ok(acks)),
        }
    }
}

impl Inner {
    fn take_submission_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_submissions > 0 {
            self.failing_submissions -= 1;
            return Err(StoreError::Unavailable("injected submission failure".to_string()));
        }

        Ok(())
    }

    fn record_attempt(&mut self, key: &str) {
        *self.write_attempts.entry(key.to_string()).or_insert(0) += 1;
    }

    fn first_healthy_group(&self) -> Option<&GroupState> {
        self.groups.values().find(|state| !state.down)
    }
}

impl GroupState {
    fn accepts_write(&mut self, failure_probability: f64) -> bool {
        if self.down {
            return false;
        }
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return false;
        }
        if failure_probability > 0.0 && rand::thread_rng().gen_bool(failure_probability) {
            return false;
        }

        true
    }
}

impl Store for MemoryStore {
    fn write(&self, key: &str, data: Bytes, append: bool) -> Result<AckHandle, StoreError> {
        let mut inner = self.lock();
        inner.take_submission_failure()?;
        inner.record_attempt(key);

        let mut acks = HashSet::new();
        for (group_id, state) in inner.groups.iter_mut() {
            if !state.accepts_write(self.group_failure_probability) {
                continue;
            }

            let stored = state.data.entry(key.to_string()).or_insert_with(BytesMut::new);
            if !append {
                stored.clear();
            }
            stored.extend_from_slice(&data);
            acks.insert(*group_id);
        }

        Ok(self.ack_handle(&mut inner, acks))
    }

    fn read(&self, key: &str) -> Result<ReadHandle, StoreError> {
        let mut inner = self.lock();
        inner.take_submission_failure()?;
        inner.reads += 1;

        let result = match inner.first_healthy_group() {
            Some(_) => inner
                .groups
                .values()
                .filter(|state| !state.down)
                .find_map(|state| state.data.get(key))
                .map(|data| Bytes::copy_from_slice(data))
                .ok_or(StoreError::NotFound),
            None => Err(StoreError::Unavailable("all groups are down".to_string())),
        };

        Ok(StoreHandle::resolved(result))
    }

    fn add_to_index(&self, entry_key: &str, index_keys: &[String], member_id: &str) -> Result<AckHandle, StoreError> {
        let mut inner = self.lock();
        inner.take_submission_failure()?;
        inner.record_attempt(entry_key);

        let mut acks = HashSet::new();
        for (group_id, state) in inner.groups.iter_mut() {
            if !state.accepts_write(self.group_failure_probability) {
                continue;
            }

            for index_key in index_keys {
                let members = state.indexes.entry(index_key.clone()).or_insert_with(Vec::new);
                if !members.iter().any(|m| m == member_id) {
                    members.push(member_id.to_string());
                }
            }
            acks.insert(*group_id);
        }

        Ok(self.ack_handle(&mut inner, acks))
    }

    fn query_index(&self, index_keys: &[String]) -> Result<MembersHandle, StoreError> {
        let mut inner = self.lock();
        inner.take_submission_failure()?;

        let result = match inner.first_healthy_group() {
            Some(state) => Ok(index_keys
                .iter()
                .filter_map(|index_key| state.indexes.get(index_key))
                .flat_map(|members| members.iter().cloned())
                .collect()),
            None => Err(StoreError::Unavailable("all groups are down".to_string())),
        };

        Ok(StoreHandle::resolved(result))
    }

    fn min_writes(&self) -> usize {
        self.min_writes
    }
}

/// MemoryStoreConnector hands out clones of a single `MemoryStore`.
pub struct MemoryStoreConnector {
    store: MemoryStore,
    failing_connects: AtomicUsize,
    connect_attempts: AtomicUsize,
}

impl MemoryStoreConnector {
    pub fn new(store: MemoryStore) -> Self {
        MemoryStoreConnector {
            store,
            failing_connects: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    /// The first `count` connection attempts fail.
    pub fn fail_first_connects(self, count: usize) -> Self {
        self.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StoreConnector for MemoryStoreConnector {
    type Store = MemoryStore;

    async fn connect(&self, _servers: &[String], groups: &[GroupId]) -> Result<MemoryStore, StoreError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected connection failure".to_string()));
        }

        let known = self.store.groups();
        if let Some(unknown) = groups.iter().find(|g| !known.contains(g)) {
            return Err(StoreError::Unavailable(format!("unknown {:?}", unknown)));
        }

        Ok(self.store.clone())
    }
}
