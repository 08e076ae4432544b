use crate::serialize::{LoadContext, SaveContext, SerializeError};
use crate::table::value::OwningKey;
use crate::tablet::config::TabletConfig;
use crate::tablet::partition::{
    AsyncSaveFn, Partition, PartitionId, PartitionSnapshotRef, PartitionState, EDEN_INDEX,
};
use crate::tablet::store::{store_overlaps, SortedStoreRef, StoreId, StoreIndex, StoreResolver};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TabletId(pub u64);

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tablet-{:x}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionLayoutError {
    #[error("partition index {index} out of range (count {count})")]
    IndexOutOfRange { index: i64, count: usize },
    #[error("invalid split pivots for {partition}: {reason}")]
    InvalidPivots {
        partition: PartitionId,
        reason: &'static str,
    },
    #[error("partition count would reach {requested}, limit is {limit}")]
    TooManyPartitions { requested: usize, limit: usize },
}

/// Immutable view of every partition of a tablet.
#[derive(Debug, Clone)]
pub struct TabletSnapshot {
    pub tablet_id: TabletId,
    pub eden: PartitionSnapshotRef,
    pub partitions: Vec<PartitionSnapshotRef>,
}

impl TabletSnapshot {
    /// The sorted partition whose range holds `key`.
    pub fn find_partition(&self, key: &OwningKey) -> Option<&PartitionSnapshotRef> {
        let position = self
            .partitions
            .partition_point(|partition| &partition.pivot_key <= key);
        position
            .checked_sub(1)
            .map(|index| &self.partitions[index])
            .filter(|partition| key < &partition.next_pivot_key)
    }
}

/// Owns the partitions of one tablet and the index of every store they use.
///
/// Partitions refer back to the tablet only by id; anything they need from it
/// (config, store lookup) is passed in by the tablet.
#[derive(Debug)]
pub struct Tablet {
    id: TabletId,
    config: Arc<TabletConfig>,
    stores: StoreIndex,
    eden: Partition,
    partitions: Vec<Partition>,
    next_partition_id: u64,
}

impl Tablet {
    /// Creates a tablet with an empty Eden and one partition spanning every key.
    pub fn new(id: TabletId, config: Arc<TabletConfig>) -> Self {
        let eden = Partition::new(
            id,
            PartitionId(0),
            EDEN_INDEX,
            OwningKey::min(),
            OwningKey::max(),
        );
        let initial = Partition::new(id, PartitionId(1), 0, OwningKey::min(), OwningKey::max());
        Self {
            id,
            config,
            stores: StoreIndex::new(),
            eden,
            partitions: vec![initial],
            next_partition_id: 2,
        }
    }

    fn allocate_partition_id(&mut self) -> PartitionId {
        let id = PartitionId(self.next_partition_id);
        self.next_partition_id += 1;
        id
    }

    pub fn id(&self) -> TabletId {
        self.id
    }

    pub fn config(&self) -> &Arc<TabletConfig> {
        &self.config
    }

    pub fn set_config(&mut self, config: Arc<TabletConfig>) {
        self.config = config;
    }

    pub fn stores(&self) -> &StoreIndex {
        &self.stores
    }

    pub fn eden(&self) -> &Partition {
        &self.eden
    }

    pub fn eden_mut(&mut self) -> &mut Partition {
        &mut self.eden
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Looks up a partition by index; [`EDEN_INDEX`] yields Eden.
    pub fn partition(&self, index: i32) -> Option<&Partition> {
        if index == EDEN_INDEX {
            return Some(&self.eden);
        }
        usize::try_from(index)
            .ok()
            .and_then(|index| self.partitions.get(index))
    }

    pub fn partition_mut(&mut self, index: i32) -> Option<&mut Partition> {
        if index == EDEN_INDEX {
            return Some(&mut self.eden);
        }
        usize::try_from(index)
            .ok()
            .and_then(|index| self.partitions.get_mut(index))
    }

    /// The sorted partition whose range holds `key`.
    pub fn find_partition(&self, key: &OwningKey) -> &Partition {
        let position = self
            .partitions
            .partition_point(|partition| partition.pivot_key() <= key);
        &self.partitions[position.saturating_sub(1)]
    }

    /// Registers `store` in the store index and attaches it to the partition at
    /// `partition_index`.
    pub fn add_store(
        &mut self,
        store: SortedStoreRef,
        partition_index: i32,
    ) -> Result<(), PartitionLayoutError> {
        let count = self.partitions.len();
        let id = store.id();
        let partition = self
            .partition_mut(partition_index)
            .ok_or(PartitionLayoutError::IndexOutOfRange {
                index: i64::from(partition_index),
                count,
            })?;
        partition.add_store(store.clone());
        self.stores.insert(store);
        info!(
            "event=tablet_store_added tablet={} store={id} partition_index={partition_index}",
            self.id
        );
        Ok(())
    }

    /// Detaches the store from every partition and drops it from the index.
    pub fn remove_store(&mut self, id: StoreId) -> Option<SortedStoreRef> {
        self.eden.remove_store(id);
        for partition in &mut self.partitions {
            partition.remove_store(id);
        }
        self.stores.remove(id)
    }

    pub fn start_epoch<R: Rng + ?Sized>(&mut self, now: SystemTime, rng: &mut R) {
        let config = self.config.clone();
        self.eden.start_epoch(&config, now, rng);
        for partition in &mut self.partitions {
            partition.start_epoch(&config, now, rng);
        }
        info!(
            "event=tablet_epoch_start tablet={} partitions={}",
            self.id,
            self.partitions.len()
        );
    }

    pub fn stop_epoch(&mut self) {
        self.eden.stop_epoch();
        for partition in &mut self.partitions {
            partition.stop_epoch();
        }
        info!("event=tablet_epoch_stop tablet={}", self.id);
    }

    /// Replaces the partition at `index` by one partition per pivot.
    ///
    /// `pivot_keys` must start with the partition's own pivot, increase
    /// strictly and stay below its next pivot. The partition must already be in
    /// `Splitting`. Stores are attached to every new partition they overlap.
    pub fn split_partition(
        &mut self,
        index: usize,
        pivot_keys: Vec<OwningKey>,
    ) -> Result<Vec<PartitionId>, PartitionLayoutError> {
        let count = self.partitions.len();
        let partition = self
            .partitions
            .get(index)
            .ok_or(PartitionLayoutError::IndexOutOfRange {
                index: index as i64,
                count,
            })?;
        assert_eq!(
            partition.state(),
            PartitionState::Splitting,
            "partition {} must be splitting before a split is applied",
            partition.id()
        );
        validate_pivots(partition, &pivot_keys)?;
        let requested = count - 1 + pivot_keys.len();
        if requested > self.config.max_partition_count {
            return Err(PartitionLayoutError::TooManyPartitions {
                requested,
                limit: self.config.max_partition_count,
            });
        }

        let mut old = self.partitions.remove(index);
        let stores = old.drain_stores();
        let samples = old.sample_keys().keys.clone();
        let mut created = Vec::with_capacity(pivot_keys.len());
        let mut replacements = Vec::with_capacity(pivot_keys.len());
        for (offset, pivot) in pivot_keys.iter().enumerate() {
            let next_pivot = pivot_keys
                .get(offset + 1)
                .cloned()
                .unwrap_or_else(|| old.next_pivot_key().clone());
            let id = self.allocate_partition_id();
            let mut partition =
                Partition::new(self.id, id, (index + offset) as i32, pivot.clone(), next_pivot);
            for store in &stores {
                if store_overlaps(store.as_ref(), partition.pivot_key(), partition.next_pivot_key())
                {
                    partition.add_store(store.clone());
                }
            }
            let own_samples = samples
                .iter()
                .filter(|key| partition.contains_key(key))
                .cloned()
                .collect();
            partition.set_sample_keys(own_samples, old.sampling_time());
            partition.set_compaction_time(old.compaction_time());
            created.push(id);
            replacements.push(partition);
        }
        self.partitions.splice(index..index, replacements);
        self.renumber();
        info!(
            "event=partition_split tablet={} partition={} into={}",
            self.id,
            old.id(),
            created.len()
        );
        Ok(created)
    }

    /// Collapses partitions `first..=last` into one. Each of them must already
    /// be in `Merging`.
    pub fn merge_partitions(
        &mut self,
        first: usize,
        last: usize,
    ) -> Result<PartitionId, PartitionLayoutError> {
        let count = self.partitions.len();
        if last >= count || first > last {
            return Err(PartitionLayoutError::IndexOutOfRange {
                index: last.max(first) as i64,
                count,
            });
        }
        for partition in &self.partitions[first..=last] {
            assert_eq!(
                partition.state(),
                PartitionState::Merging,
                "partition {} must be merging before a merge is applied",
                partition.id()
            );
        }

        let merged_away: Vec<Partition> = self.partitions.drain(first..=last).collect();
        let pivot = merged_away[0].pivot_key().clone();
        let next_pivot = merged_away[merged_away.len() - 1].next_pivot_key().clone();
        let id = self.allocate_partition_id();
        let mut merged = Partition::new(self.id, id, first as i32, pivot, next_pivot);
        let mut samples = Vec::new();
        let mut seen = HashSet::new();
        let mut sampling_time = SystemTime::UNIX_EPOCH;
        let mut compaction_time: Option<SystemTime> = None;
        for mut partition in merged_away {
            for store in partition.drain_stores() {
                if seen.insert(store.id()) {
                    merged.add_store(store);
                }
            }
            samples.extend(partition.sample_keys().keys.iter().cloned());
            sampling_time = sampling_time.max(partition.sampling_time());
            compaction_time = Some(match compaction_time {
                Some(earliest) => earliest.min(partition.compaction_time()),
                None => partition.compaction_time(),
            });
        }
        merged.set_sample_keys(samples, sampling_time);
        if let Some(time) = compaction_time {
            merged.set_compaction_time(time);
        }
        self.partitions.insert(first, merged);
        self.renumber();
        info!(
            "event=partition_merge tablet={} merged={} into={id}",
            self.id,
            last - first + 1
        );
        Ok(id)
    }

    fn renumber(&mut self) {
        for (index, partition) in self.partitions.iter_mut().enumerate() {
            partition.set_index(index as i32);
        }
        debug_assert!(self
            .partitions
            .windows(2)
            .all(|pair| pair[0].next_pivot_key() == pair[1].pivot_key()));
    }

    pub fn build_snapshot(&self) -> TabletSnapshot {
        TabletSnapshot {
            tablet_id: self.id,
            eden: self.eden.build_snapshot(),
            partitions: self
                .partitions
                .iter()
                .map(Partition::build_snapshot)
                .collect(),
        }
    }

    /// Writes Eden and every partition through the synchronous save path.
    pub fn save_partitions(&self, context: &mut SaveContext) {
        context.write_u64(self.next_partition_id);
        context.write_u64(self.eden.id().0);
        self.eden.save(context);
        context.write_size(self.partitions.len());
        for partition in &self.partitions {
            context.write_u64(partition.id().0);
            partition.save(context);
        }
    }

    /// Rebuilds the partition list from [`Tablet::save_partitions`] output. Key
    /// ranges stay open until [`Tablet::async_load_partitions`] runs.
    pub fn load_partitions(&mut self, context: &mut LoadContext<'_>) -> Result<(), SerializeError> {
        self.next_partition_id = context.read_u64()?;
        let eden_id = PartitionId(context.read_u64()?);
        let mut eden = Partition::new(
            self.id,
            eden_id,
            EDEN_INDEX,
            OwningKey::min(),
            OwningKey::max(),
        );
        eden.load(context, &self.stores)?;

        let count = context.read_size()?;
        let mut partitions = Vec::with_capacity(count.min(context.remaining()));
        for index in 0..count {
            let id = PartitionId(context.read_u64()?);
            let mut partition = Partition::new(
                self.id,
                id,
                index as i32,
                OwningKey::min(),
                OwningKey::max(),
            );
            partition.load(context, &self.stores)?;
            partitions.push(partition);
        }
        self.eden = eden;
        self.partitions = partitions;
        Ok(())
    }

    /// Captures pivots and sample keys of every partition for a background save.
    pub fn async_save_partitions(&self) -> AsyncSaveFn {
        let mut writers: Vec<(PartitionId, AsyncSaveFn)> =
            vec![(self.eden.id(), self.eden.async_save())];
        writers.extend(
            self.partitions
                .iter()
                .map(|partition| (partition.id(), partition.async_save())),
        );
        Box::new(move |context: &mut SaveContext| {
            context.write_size(writers.len());
            for (id, writer) in writers {
                context.write_u64(id.0);
                writer(context);
            }
        })
    }

    pub fn async_load_partitions(
        &mut self,
        context: &mut LoadContext<'_>,
    ) -> Result<(), SerializeError> {
        let count = context.read_size()?;
        assert_eq!(
            count,
            self.partitions.len() + 1,
            "tablet {} async snapshot partition count mismatch",
            self.id
        );
        let partitions = std::iter::once(&mut self.eden).chain(self.partitions.iter_mut());
        for partition in partitions {
            let id = PartitionId(context.read_u64()?);
            assert_eq!(
                id,
                partition.id(),
                "tablet async snapshot lists partitions out of order"
            );
            partition.async_load(context)?;
        }
        Ok(())
    }
}

impl StoreResolver for Tablet {
    fn find_store(&self, id: StoreId) -> Option<SortedStoreRef> {
        self.stores.find_store(id)
    }
}

fn validate_pivots(
    partition: &Partition,
    pivot_keys: &[OwningKey],
) -> Result<(), PartitionLayoutError> {
    let invalid = |reason| PartitionLayoutError::InvalidPivots {
        partition: partition.id(),
        reason,
    };
    let Some(first) = pivot_keys.first() else {
        return Err(invalid("no pivots"));
    };
    if first != partition.pivot_key() {
        return Err(invalid("first pivot must equal the partition pivot"));
    }
    if pivot_keys.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(invalid("pivots must increase strictly"));
    }
    if pivot_keys
        .last()
        .is_some_and(|last| last >= partition.next_pivot_key())
    {
        return Err(invalid("pivots must stay below the next pivot"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::value::Value;
    use crate::tablet::store::StoreDescriptor;

    fn key(k: i64) -> OwningKey {
        OwningKey::new(vec![Value::Int64(k)])
    }

    fn tablet() -> Tablet {
        Tablet::new(TabletId(3), Arc::new(TabletConfig::default()))
    }

    fn ranged_store(id: u64, min: i64, max: i64) -> SortedStoreRef {
        StoreDescriptor::new(StoreId(id), 1, 2, 3)
            .with_key_range(key(min), key(max))
            .into_ref()
    }

    fn split(tablet: &mut Tablet, index: usize, pivots: Vec<OwningKey>) -> Vec<PartitionId> {
        tablet
            .partition_mut(index as i32)
            .unwrap()
            .checked_set_state(PartitionState::Normal, PartitionState::Splitting);
        tablet.split_partition(index, pivots).unwrap()
    }

    #[test]
    fn new_tablet_has_eden_and_one_partition() {
        let tablet = tablet();
        assert!(tablet.eden().is_eden());
        assert_eq!(tablet.partition_count(), 1);
        assert!(tablet.partition(EDEN_INDEX).unwrap().is_eden());
        assert!(tablet.partition(5).is_none());
        assert_eq!(tablet.find_partition(&key(42)).index(), 0);
    }

    #[test]
    fn split_distributes_stores_by_overlap() {
        let mut tablet = tablet();
        tablet.add_store(ranged_store(1, 0, 10), 0).unwrap();
        tablet.add_store(ranged_store(2, 40, 60), 0).unwrap();
        tablet.add_store(ranged_store(3, 70, 90), 0).unwrap();

        let created = split(&mut tablet, 0, vec![OwningKey::min(), key(50)]);
        assert_eq!(created.len(), 2);
        let left = &tablet.partitions()[0];
        let right = &tablet.partitions()[1];
        assert_eq!(left.next_pivot_key(), &key(50));
        assert_eq!(right.pivot_key(), &key(50));
        assert!(left.has_store(StoreId(1)) && left.has_store(StoreId(2)));
        assert!(right.has_store(StoreId(2)) && right.has_store(StoreId(3)));
        assert!(!right.has_store(StoreId(1)));
        assert_eq!(tablet.find_partition(&key(55)).id(), created[1]);
        assert_eq!(right.index(), 1);
        assert_eq!(right.state(), PartitionState::Normal);
    }

    #[test]
    fn split_rejects_bad_pivots() {
        let mut tablet = tablet();
        tablet
            .partition_mut(0)
            .unwrap()
            .set_state(PartitionState::Splitting);
        assert!(matches!(
            tablet.split_partition(0, vec![key(1)]),
            Err(PartitionLayoutError::InvalidPivots { .. })
        ));
        assert!(matches!(
            tablet.split_partition(0, vec![OwningKey::min(), key(5), key(5)]),
            Err(PartitionLayoutError::InvalidPivots { .. })
        ));
        assert!(matches!(
            tablet.split_partition(3, vec![OwningKey::min()]),
            Err(PartitionLayoutError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "must be splitting")]
    fn split_outside_splitting_state_is_fatal() {
        let mut tablet = tablet();
        let _ = tablet.split_partition(0, vec![OwningKey::min(), key(1)]);
    }

    #[test]
    fn merge_restores_single_range() {
        let mut tablet = tablet();
        tablet.add_store(ranged_store(1, 0, 100), 0).unwrap();
        split(&mut tablet, 0, vec![OwningKey::min(), key(30), key(60)]);
        assert_eq!(tablet.partition_count(), 3);

        for index in 1..=2 {
            tablet
                .partition_mut(index)
                .unwrap()
                .checked_set_state(PartitionState::Normal, PartitionState::Merging);
        }
        let earliest = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(100);
        tablet
            .partition_mut(1)
            .unwrap()
            .set_compaction_time(earliest + std::time::Duration::from_secs(50));
        tablet.partition_mut(2).unwrap().set_compaction_time(earliest);
        let merged = tablet.merge_partitions(1, 2).unwrap();
        assert_eq!(tablet.partition_count(), 2);
        let partition = &tablet.partitions()[1];
        assert_eq!(partition.id(), merged);
        assert_eq!(partition.pivot_key(), &key(30));
        assert_eq!(partition.next_pivot_key(), &OwningKey::max());
        assert_eq!(partition.store_count(), 1);
        assert_eq!(partition.compaction_time(), earliest);
    }

    #[test]
    fn add_store_to_unknown_partition_is_rejected() {
        let mut tablet = tablet();
        assert_eq!(
            tablet.add_store(ranged_store(1, 0, 10), 4),
            Err(PartitionLayoutError::IndexOutOfRange { index: 4, count: 1 })
        );
        assert!(matches!(
            tablet.add_store(ranged_store(1, 0, 10), -7),
            Err(PartitionLayoutError::IndexOutOfRange { index: -7, .. })
        ));
        assert!(tablet.stores().is_empty());
    }

    #[test]
    fn remove_store_detaches_everywhere() {
        let mut tablet = tablet();
        tablet.add_store(ranged_store(1, 0, 100), EDEN_INDEX).unwrap();
        tablet.add_store(ranged_store(2, 0, 100), 0).unwrap();
        assert!(tablet.remove_store(StoreId(1)).is_some());
        assert_eq!(tablet.eden().store_count(), 0);
        assert!(tablet.find_store(StoreId(1)).is_none());
        assert!(tablet.find_store(StoreId(2)).is_some());
    }

    #[test]
    fn snapshot_lookup_honours_ranges() {
        let mut tablet = tablet();
        split(&mut tablet, 0, vec![OwningKey::min(), key(10)]);
        let snapshot = tablet.build_snapshot();
        assert_eq!(snapshot.partitions.len(), 2);
        assert_eq!(
            snapshot.find_partition(&key(15)).map(|p| p.id),
            Some(tablet.partitions()[1].id())
        );
        assert_eq!(
            snapshot.find_partition(&key(3)).map(|p| p.id),
            Some(tablet.partitions()[0].id())
        );
    }
}
