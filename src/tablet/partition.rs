use crate::serialize::{LoadContext, Persistent, SaveContext, SerializeError};
use crate::table::value::OwningKey;
use crate::table::wire::{read_unversioned_rowset, write_unversioned_rowset};
use crate::tablet::config::TabletConfig;
use crate::tablet::core::TabletId;
use crate::tablet::store::{SortedStoreRef, StoreId, StoreResolver};
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Index reserved for the Eden partition, which holds rows not yet bucketed
/// into the sorted partitions.
pub const EDEN_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PartitionState {
    #[default]
    Normal,
    Splitting,
    Merging,
    Compacting,
    Partitioning,
    Sampling,
}

/// Representative keys used to plan splits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleKeyList {
    pub keys: Vec<OwningKey>,
}

impl SampleKeyList {
    pub fn new(keys: Vec<OwningKey>) -> Self {
        Self { keys }
    }
}

impl Persistent for SampleKeyList {
    fn save(&self, context: &mut SaveContext) {
        write_unversioned_rowset(context, &self.keys);
    }

    fn load(context: &mut LoadContext<'_>) -> Result<Self, SerializeError> {
        Ok(Self {
            keys: read_unversioned_rowset(context)?,
        })
    }
}

/// Point-in-time copy of a partition's externally visible state.
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    pub id: PartitionId,
    pub pivot_key: OwningKey,
    pub next_pivot_key: OwningKey,
    pub sample_keys: Arc<SampleKeyList>,
    pub stores: Vec<SortedStoreRef>,
}

pub type PartitionSnapshotRef = Arc<PartitionSnapshot>;

/// Deferred writer produced by [`Partition::async_save`].
pub type AsyncSaveFn = Box<dyn FnOnce(&mut SaveContext) + Send>;

/// A contiguous key range `[pivot_key, next_pivot_key)` of a tablet together
/// with the sorted stores that cover it.
///
/// Owned by its tablet and mutated only on the tablet's single writer path;
/// readers go through [`Partition::build_snapshot`].
#[derive(Debug)]
pub struct Partition {
    tablet_id: TabletId,
    id: PartitionId,
    index: i32,
    pivot_key: OwningKey,
    next_pivot_key: OwningKey,
    state: PartitionState,
    stores: HashMap<StoreId, SortedStoreRef>,
    sample_keys: Arc<SampleKeyList>,
    sampling_time: SystemTime,
    sampling_request_time: SystemTime,
    compaction_time: SystemTime,
    allowed_split_time: SystemTime,
    pivot_keys_for_immediate_split: Vec<OwningKey>,
}

impl Partition {
    pub fn new(
        tablet_id: TabletId,
        id: PartitionId,
        index: i32,
        pivot_key: OwningKey,
        next_pivot_key: OwningKey,
    ) -> Self {
        assert!(
            pivot_key <= next_pivot_key,
            "partition {id} pivot {pivot_key} is above next pivot {next_pivot_key}"
        );
        Self {
            tablet_id,
            id,
            index,
            pivot_key,
            next_pivot_key,
            state: PartitionState::Normal,
            stores: HashMap::new(),
            sample_keys: Arc::new(SampleKeyList::default()),
            sampling_time: UNIX_EPOCH,
            sampling_request_time: UNIX_EPOCH,
            compaction_time: UNIX_EPOCH,
            allowed_split_time: UNIX_EPOCH,
            pivot_keys_for_immediate_split: Vec::new(),
        }
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: i32) {
        self.index = index;
    }

    pub fn pivot_key(&self) -> &OwningKey {
        &self.pivot_key
    }

    pub fn next_pivot_key(&self) -> &OwningKey {
        &self.next_pivot_key
    }

    pub fn contains_key(&self, key: &OwningKey) -> bool {
        &self.pivot_key <= key && key < &self.next_pivot_key
    }

    pub fn is_eden(&self) -> bool {
        self.index == EDEN_INDEX
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn set_state(&mut self, state: PartitionState) {
        self.state = state;
    }

    /// Moves from `old_state` to `new_state`; being in any other state means a
    /// background task raced the scheduler and is fatal.
    pub fn checked_set_state(&mut self, old_state: PartitionState, new_state: PartitionState) {
        assert_eq!(
            self.state, old_state,
            "partition {} expected state {:?} before moving to {:?}",
            self.id, old_state, new_state
        );
        debug!(
            "event=partition_state_change partition={} from={:?} to={:?}",
            self.id, old_state, new_state
        );
        self.state = new_state;
    }

    pub fn stores(&self) -> impl Iterator<Item = &SortedStoreRef> {
        self.stores.values()
    }

    pub fn store_ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.stores.keys().copied()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn has_store(&self, id: StoreId) -> bool {
        self.stores.contains_key(&id)
    }

    /// Returns `false` when the store was already attached.
    pub fn add_store(&mut self, store: SortedStoreRef) -> bool {
        let id = store.id();
        if self.stores.contains_key(&id) {
            return false;
        }
        self.stores.insert(id, store);
        true
    }

    pub fn remove_store(&mut self, id: StoreId) -> Option<SortedStoreRef> {
        self.stores.remove(&id)
    }

    pub(crate) fn drain_stores(&mut self) -> Vec<SortedStoreRef> {
        self.stores.drain().map(|(_, store)| store).collect()
    }

    pub fn compressed_data_size(&self) -> i64 {
        self.stores
            .values()
            .map(|store| store.compressed_data_size())
            .sum()
    }

    pub fn uncompressed_data_size(&self) -> i64 {
        self.stores
            .values()
            .map(|store| store.uncompressed_data_size())
            .sum()
    }

    pub fn unmerged_row_count(&self) -> i64 {
        self.stores.values().map(|store| store.row_count()).sum()
    }

    pub fn sample_keys(&self) -> &Arc<SampleKeyList> {
        &self.sample_keys
    }

    /// Replaces the sample key list wholesale; snapshots holding the old list
    /// keep seeing it.
    pub fn set_sample_keys(&mut self, keys: Vec<OwningKey>, now: SystemTime) {
        self.sample_keys = Arc::new(SampleKeyList::new(keys));
        self.sampling_time = now;
    }

    pub fn sampling_time(&self) -> SystemTime {
        self.sampling_time
    }

    pub fn sampling_request_time(&self) -> SystemTime {
        self.sampling_request_time
    }

    pub fn request_sampling(&mut self, now: SystemTime) {
        self.sampling_request_time = now;
    }

    pub fn is_sampling_requested(&self) -> bool {
        self.sampling_request_time > self.sampling_time
    }

    pub fn compaction_time(&self) -> SystemTime {
        self.compaction_time
    }

    pub fn set_compaction_time(&mut self, time: SystemTime) {
        self.compaction_time = time;
    }

    pub fn allowed_split_time(&self) -> SystemTime {
        self.allowed_split_time
    }

    pub fn is_compaction_due(&self, config: &TabletConfig, now: SystemTime) -> bool {
        match config.auto_compaction_period() {
            Some(period) => self.compaction_time + period <= now,
            None => false,
        }
    }

    pub fn is_split_allowed(&self, now: SystemTime) -> bool {
        now >= self.allowed_split_time
    }

    pub fn build_snapshot(&self) -> PartitionSnapshotRef {
        Arc::new(PartitionSnapshot {
            id: self.id,
            pivot_key: self.pivot_key.clone(),
            next_pivot_key: self.next_pivot_key.clone(),
            sample_keys: self.sample_keys.clone(),
            stores: self.stores.values().cloned().collect(),
        })
    }

    /// Called when the owning tablet gains leadership.
    ///
    /// The compaction clock is backdated by a random share of the auto
    /// compaction period so that partitions starting together do not all come
    /// due at once. Splits are held off until the epoch start plus the
    /// configured split delay.
    pub fn start_epoch<R: Rng + ?Sized>(
        &mut self,
        config: &TabletConfig,
        now: SystemTime,
        rng: &mut R,
    ) {
        let jitter = config
            .auto_compaction_period()
            .map(|period| random_duration(rng, period))
            .unwrap_or_default();
        self.compaction_time = now.checked_sub(jitter).unwrap_or(UNIX_EPOCH);
        self.allowed_split_time = now + config.split_delay();
        debug!(
            "event=partition_epoch_start partition={} jitter_ms={}",
            self.id,
            jitter.as_millis()
        );
    }

    pub fn stop_epoch(&mut self) {
        self.state = PartitionState::Normal;
    }

    pub fn request_immediate_split(&mut self, pivot_keys: Vec<OwningKey>) {
        self.pivot_keys_for_immediate_split = pivot_keys;
    }

    pub fn is_immediate_split_requested(&self) -> bool {
        !self.pivot_keys_for_immediate_split.is_empty()
    }

    pub fn pivot_keys_for_immediate_split(&self) -> &[OwningKey] {
        &self.pivot_keys_for_immediate_split
    }

    pub fn take_immediate_split_pivots(&mut self) -> Vec<OwningKey> {
        std::mem::take(&mut self.pivot_keys_for_immediate_split)
    }

    /// Persists sampling times and the store id set. Store order is whatever the
    /// set yields and is not preserved across a round trip.
    pub fn save(&self, context: &mut SaveContext) {
        context.write_time(self.sampling_time);
        context.write_time(self.sampling_request_time);
        context.write_size(self.stores.len());
        for id in self.stores.keys() {
            id.save(context);
        }
    }

    /// Restores what [`Partition::save`] wrote. Every store id must already be
    /// registered with `resolver`; a missing or repeated id means the snapshot is
    /// inconsistent and is fatal.
    pub fn load<S: StoreResolver + ?Sized>(
        &mut self,
        context: &mut LoadContext<'_>,
        resolver: &S,
    ) -> Result<(), SerializeError> {
        self.sampling_time = context.read_time()?;
        self.sampling_request_time = context.read_time()?;
        let store_count = context.read_size()?;
        for _ in 0..store_count {
            let id = StoreId::load(context)?;
            let store = resolver.find_store(id).unwrap_or_else(|| {
                panic!("partition {} references unknown store {id}", self.id)
            });
            assert!(
                self.stores.insert(id, store).is_none(),
                "partition {} lists store {id} twice",
                self.id
            );
        }
        Ok(())
    }

    /// Captures pivot keys and sample keys now and writes them later, off the
    /// writer path.
    pub fn async_save(&self) -> AsyncSaveFn {
        let snapshot = self.build_snapshot();
        Box::new(move |context: &mut SaveContext| {
            snapshot.pivot_key.save(context);
            snapshot.next_pivot_key.save(context);
            snapshot.sample_keys.save(context);
        })
    }

    pub fn async_load(&mut self, context: &mut LoadContext<'_>) -> Result<(), SerializeError> {
        self.pivot_key = OwningKey::load(context)?;
        self.next_pivot_key = OwningKey::load(context)?;
        self.sample_keys = Arc::new(SampleKeyList::load(context)?);
        Ok(())
    }
}

fn random_duration<R: Rng + ?Sized>(rng: &mut R, max: Duration) -> Duration {
    let micros = max.as_micros() as u64;
    if micros == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rng.gen_range(0..micros))
}
