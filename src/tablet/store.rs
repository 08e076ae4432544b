use crate::serialize::{LoadContext, Persistent, SaveContext, SerializeError};
use crate::table::value::OwningKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{:x}", self.0)
    }
}

impl Persistent for StoreId {
    fn save(&self, context: &mut SaveContext) {
        context.write_u64(self.0);
    }

    fn load(context: &mut LoadContext<'_>) -> Result<Self, SerializeError> {
        Ok(StoreId(context.read_u64()?))
    }
}

/// What a partition needs to know about a sorted store.
///
/// Stores are shared between partitions, snapshots and the tablet store index,
/// and are never mutated in place while referenced.
pub trait SortedStore: fmt::Debug + Send + Sync {
    fn id(&self) -> StoreId;
    fn compressed_data_size(&self) -> i64;
    fn uncompressed_data_size(&self) -> i64;
    fn row_count(&self) -> i64;

    /// Inclusive key bounds of the stored rows; `None` means unbounded.
    fn key_range(&self) -> Option<(OwningKey, OwningKey)> {
        None
    }
}

pub type SortedStoreRef = Arc<dyn SortedStore>;

/// Immutable descriptor of a flushed or compacted chunk store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    pub id: StoreId,
    pub compressed_data_size: i64,
    pub uncompressed_data_size: i64,
    pub row_count: i64,
    pub min_key: Option<OwningKey>,
    pub max_key: Option<OwningKey>,
}

impl StoreDescriptor {
    pub fn new(id: StoreId, compressed: i64, uncompressed: i64, rows: i64) -> Self {
        Self {
            id,
            compressed_data_size: compressed,
            uncompressed_data_size: uncompressed,
            row_count: rows,
            min_key: None,
            max_key: None,
        }
    }

    pub fn with_key_range(mut self, min_key: OwningKey, max_key: OwningKey) -> Self {
        self.min_key = Some(min_key);
        self.max_key = Some(max_key);
        self
    }

    pub fn into_ref(self) -> SortedStoreRef {
        Arc::new(self)
    }
}

impl SortedStore for StoreDescriptor {
    fn id(&self) -> StoreId {
        self.id
    }

    fn compressed_data_size(&self) -> i64 {
        self.compressed_data_size
    }

    fn uncompressed_data_size(&self) -> i64 {
        self.uncompressed_data_size
    }

    fn row_count(&self) -> i64 {
        self.row_count
    }

    fn key_range(&self) -> Option<(OwningKey, OwningKey)> {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => Some((min.clone(), max.clone())),
            _ => None,
        }
    }
}

/// Lookup of stores by id; partitions resolve persisted store ids through it.
pub trait StoreResolver {
    fn find_store(&self, id: StoreId) -> Option<SortedStoreRef>;
}

/// Tablet-wide index of every live store.
#[derive(Debug, Default, Clone)]
pub struct StoreIndex {
    stores: HashMap<StoreId, SortedStoreRef>,
}

impl StoreIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous store registered under the same id.
    pub fn insert(&mut self, store: SortedStoreRef) -> Option<SortedStoreRef> {
        self.stores.insert(store.id(), store)
    }

    pub fn remove(&mut self, id: StoreId) -> Option<SortedStoreRef> {
        self.stores.remove(&id)
    }

    pub fn contains(&self, id: StoreId) -> bool {
        self.stores.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.stores.keys().copied()
    }
}

impl StoreResolver for StoreIndex {
    fn find_store(&self, id: StoreId) -> Option<SortedStoreRef> {
        self.stores.get(&id).cloned()
    }
}

/// True when the store may hold keys in `[lower, upper)`.
pub fn store_overlaps(store: &dyn SortedStore, lower: &OwningKey, upper: &OwningKey) -> bool {
    match store.key_range() {
        Some((min_key, max_key)) => &min_key < upper && &max_key >= lower,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::value::Value;

    fn key(k: i64) -> OwningKey {
        OwningKey::new(vec![Value::Int64(k)])
    }

    #[test]
    fn index_resolves_registered_stores() {
        let mut index = StoreIndex::new();
        assert!(index
            .insert(StoreDescriptor::new(StoreId(1), 10, 20, 3).into_ref())
            .is_none());
        let store = index.find_store(StoreId(1)).unwrap();
        assert_eq!(store.uncompressed_data_size(), 20);
        assert!(index.find_store(StoreId(2)).is_none());
        assert_eq!(index.len(), 1);
        index.remove(StoreId(1));
        assert!(index.is_empty());
    }

    #[test]
    fn overlap_uses_half_open_upper_bound() {
        let store = StoreDescriptor::new(StoreId(1), 0, 0, 0).with_key_range(key(10), key(20));
        assert!(store_overlaps(&store, &key(0), &key(11)));
        assert!(store_overlaps(&store, &key(20), &key(30)));
        assert!(!store_overlaps(&store, &key(0), &key(10)));
        assert!(!store_overlaps(&store, &key(21), &key(30)));
        let unbounded = StoreDescriptor::new(StoreId(2), 0, 0, 0);
        assert!(store_overlaps(&unbounded, &key(100), &key(101)));
        assert_eq!(StoreId(255).to_string(), "store-ff");
    }
}
