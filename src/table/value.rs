use crate::serialize::{LoadContext, Persistent, SaveContext, SerializeError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Commit timestamp attached to every versioned cell; larger is newer.
pub type Timestamp = u64;

pub const NULL_TIMESTAMP: Timestamp = 0;
pub const MIN_TIMESTAMP: Timestamp = 1;
pub const MAX_TIMESTAMP: Timestamp = u64::MAX - 1;

/// Position of a column in the table schema.
pub type ColumnId = u16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Sorts below every other value; used for open-ended key bounds.
    Min,
    Null,
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Boolean(bool),
    String(Vec<u8>),
    /// Sorts above every other value.
    Max,
}

impl Value {
    fn type_rank(&self) -> u8 {
        match self {
            Value::Min => 0,
            Value::Null => 1,
            Value::Int64(_) => 2,
            Value::Uint64(_) => 3,
            Value::Double(_) => 4,
            Value::Boolean(_) => 5,
            Value::String(_) => 6,
            Value::Max => 7,
        }
    }

    pub fn string(value: impl AsRef<[u8]>) -> Self {
        Value::String(value.as_ref().to_vec())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Value::Min | Value::Max)
    }

    /// Total order: values of different types compare by type rank.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Uint64(a), Value::Uint64(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Min => f.write_str("<min>"),
            Value::Null => f.write_str("#"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Uint64(v) => write!(f, "{v}u"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::Boolean(v) => write!(f, "%{v}"),
            Value::String(v) => write!(f, "{:?}", String::from_utf8_lossy(v)),
            Value::Max => f.write_str("<max>"),
        }
    }
}

impl Persistent for Value {
    fn save(&self, context: &mut SaveContext) {
        context.write_u8(self.type_rank());
        match self {
            Value::Min | Value::Null | Value::Max => {}
            Value::Int64(v) => context.write_i64(*v),
            Value::Uint64(v) => context.write_u64(*v),
            Value::Double(v) => context.write_f64(*v),
            Value::Boolean(v) => context.write_bool(*v),
            Value::String(v) => context.write_bytes(v),
        }
    }

    fn load(context: &mut LoadContext<'_>) -> Result<Self, SerializeError> {
        Ok(match context.read_u8()? {
            0 => Value::Min,
            1 => Value::Null,
            2 => Value::Int64(context.read_i64()?),
            3 => Value::Uint64(context.read_u64()?),
            4 => Value::Double(context.read_f64()?),
            5 => Value::Boolean(context.read_bool()?),
            6 => Value::String(context.read_bytes()?.to_vec()),
            7 => Value::Max,
            tag => return Err(SerializeError::InvalidTag { what: "value", tag }),
        })
    }
}

/// A standalone key (a prefix of key column values) that owns its storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwningKey(pub Vec<Value>);

impl OwningKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Lower bound of every key.
    pub fn min() -> Self {
        Self(vec![Value::Min])
    }

    /// Upper bound of every key.
    pub fn max() -> Self {
        Self(vec![Value::Max])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for OwningKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl fmt::Display for OwningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

impl Persistent for OwningKey {
    fn save(&self, context: &mut SaveContext) {
        context.write_size(self.0.len());
        for value in &self.0 {
            value.save(context);
        }
    }

    fn load(context: &mut LoadContext<'_>) -> Result<Self, SerializeError> {
        let count = context.read_size()?;
        let mut values = Vec::with_capacity(count.min(context.remaining()));
        for _ in 0..count {
            values.push(Value::load(context)?);
        }
        Ok(Self(values))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnversionedValue {
    pub id: ColumnId,
    pub value: Value,
}

impl UnversionedValue {
    pub fn new(id: ColumnId, value: Value) -> Self {
        Self { id, value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub id: ColumnId,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl VersionedValue {
    pub fn new(id: ColumnId, value: Value, timestamp: Timestamp) -> Self {
        Self {
            id,
            value,
            timestamp,
        }
    }
}

/// A row holding at most one value per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnversionedRow {
    pub values: Vec<UnversionedValue>,
}

impl UnversionedRow {
    pub fn value(&self, id: ColumnId) -> Option<&Value> {
        self.values
            .iter()
            .find(|value| value.id == id)
            .map(|value| &value.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A row with per-column version history.
///
/// `values` are ordered by column id ascending and, within a column, by timestamp
/// descending. `write_timestamps` and `delete_timestamps` are descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedRow {
    pub keys: Vec<Value>,
    pub values: Vec<VersionedValue>,
    pub write_timestamps: Vec<Timestamp>,
    pub delete_timestamps: Vec<Timestamp>,
}

impl VersionedRow {
    pub fn new(keys: Vec<Value>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }

    /// Appends a cell version and records its write timestamp.
    pub fn with_value(mut self, id: ColumnId, value: Value, timestamp: Timestamp) -> Self {
        self.values.push(VersionedValue::new(id, value, timestamp));
        self.values
            .sort_by(|a, b| a.id.cmp(&b.id).then(b.timestamp.cmp(&a.timestamp)));
        if !self.write_timestamps.contains(&timestamp) {
            self.write_timestamps.push(timestamp);
            self.write_timestamps.sort_unstable_by(|a, b| b.cmp(a));
        }
        self
    }

    pub fn with_delete(mut self, timestamp: Timestamp) -> Self {
        if !self.delete_timestamps.contains(&timestamp) {
            self.delete_timestamps.push(timestamp);
            self.delete_timestamps.sort_unstable_by(|a, b| b.cmp(a));
        }
        self
    }

    pub fn key(&self) -> OwningKey {
        OwningKey(self.keys.clone())
    }

    pub fn column_values(&self, id: ColumnId) -> impl Iterator<Item = &VersionedValue> {
        self.values.iter().filter(move |value| value.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_order_within_and_across_types() {
        assert!(Value::Int64(-1) < Value::Int64(3));
        assert!(Value::Null < Value::Int64(i64::MIN));
        assert!(Value::Int64(i64::MAX) < Value::string("a"));
        assert!(Value::Min < Value::Null);
        assert!(Value::string("zzz") < Value::Max);
        assert_eq!(Value::Double(0.5), Value::Double(0.5));
    }

    #[test]
    fn key_sentinels_bound_everything() {
        let key = OwningKey::new(vec![Value::Int64(10), Value::string("x")]);
        assert!(OwningKey::min() < key);
        assert!(key < OwningKey::max());
        assert!(OwningKey::new(vec![Value::Int64(10)]) < key);
        assert_eq!(key.to_string(), "[10, \"x\"]");
    }

    #[test]
    fn versioned_row_builder_keeps_canonical_order() {
        let row = VersionedRow::new(vec![Value::Int64(1)])
            .with_value(2, Value::Int64(20), 5)
            .with_value(1, Value::Int64(10), 3)
            .with_value(2, Value::Int64(21), 9)
            .with_delete(4)
            .with_delete(7);
        let ids: Vec<(ColumnId, Timestamp)> =
            row.values.iter().map(|v| (v.id, v.timestamp)).collect();
        assert_eq!(ids, vec![(1, 3), (2, 9), (2, 5)]);
        assert_eq!(row.write_timestamps, vec![9, 5, 3]);
        assert_eq!(row.delete_timestamps, vec![7, 4]);
        assert_eq!(row.column_values(2).count(), 2);
    }

    #[test]
    fn keys_persist() {
        let key = OwningKey::new(vec![
            Value::Null,
            Value::Uint64(9),
            Value::Double(1.25),
            Value::Boolean(false),
            Value::string("k"),
        ]);
        let mut save = SaveContext::new();
        save.write(&key);
        let bytes = save.finish();
        let mut load = LoadContext::new(&bytes).unwrap();
        assert_eq!(load.read::<OwningKey>().unwrap(), key);
    }
}
