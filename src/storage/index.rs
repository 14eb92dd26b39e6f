//! Index collaborator trait and key types

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::record::RecordId;

/// A single index key.
///
/// Keys of different kinds order by kind first:
/// `MinKey < Null < Bool < Number < String < GeoHash < SphereCell < MaxKey`.
#[derive(Debug, Clone)]
pub enum IndexKey {
    /// Sorts before every other key
    MinKey,
    /// Missing or null field
    Null,
    /// Boolean key
    Bool(bool),
    /// Numeric key
    Number(f64),
    /// String key
    String(String),
    /// Interleaved 2D cell hash
    GeoHash(u64),
    /// Cube-face cell on the sphere
    SphereCell(u64),
    /// Sorts after every other key
    MaxKey,
}

impl IndexKey {
    /// Builds a key from a scalar JSON value.
    ///
    /// Arrays and objects have no scalar key and return `None`.
    pub fn from_value(value: &Value) -> Option<IndexKey> {
        match value {
            Value::Null => Some(IndexKey::Null),
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => n.as_f64().map(IndexKey::Number),
            Value::String(s) => Some(IndexKey::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Converts the key back into a JSON value for key-only results.
    pub fn to_value(&self) -> Value {
        match self {
            IndexKey::MinKey => Value::String("$minKey".into()),
            IndexKey::Null => Value::Null,
            IndexKey::Bool(b) => Value::Bool(*b),
            IndexKey::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            IndexKey::String(s) => Value::String(s.clone()),
            IndexKey::GeoHash(h) => Value::from(*h),
            IndexKey::SphereCell(c) => Value::from(*c),
            IndexKey::MaxKey => Value::String("$maxKey".into()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            IndexKey::MinKey => 0,
            IndexKey::Null => 1,
            IndexKey::Bool(_) => 2,
            IndexKey::Number(_) => 3,
            IndexKey::String(_) => 4,
            IndexKey::GeoHash(_) => 5,
            IndexKey::SphereCell(_) => 6,
            IndexKey::MaxKey => 7,
        }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Bool(a), IndexKey::Bool(b)) => a.cmp(b),
            (IndexKey::Number(a), IndexKey::Number(b)) => a.total_cmp(b),
            (IndexKey::String(a), IndexKey::String(b)) => a.cmp(b),
            (IndexKey::GeoHash(a), IndexKey::GeoHash(b)) => a.cmp(b),
            (IndexKey::SphereCell(a), IndexKey::SphereCell(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::MinKey => write!(f, "MinKey"),
            IndexKey::Null => write!(f, "null"),
            IndexKey::Bool(b) => write!(f, "{}", b),
            IndexKey::Number(n) => write!(f, "{}", n),
            IndexKey::String(s) => write!(f, "\"{}\"", s),
            IndexKey::GeoHash(h) => write!(f, "geo:{:016x}", h),
            IndexKey::SphereCell(c) => write!(f, "cell:{:016x}", c),
            IndexKey::MaxKey => write!(f, "MaxKey"),
        }
    }
}

/// A contiguous range of index keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound
    pub start: IndexKey,
    /// Upper bound
    pub end: IndexKey,
    /// Whether `start` itself is in the range
    pub start_inclusive: bool,
    /// Whether `end` itself is in the range
    pub end_inclusive: bool,
}

impl KeyRange {
    /// Inclusive range `[start, end]`
    pub fn inclusive(start: IndexKey, end: IndexKey) -> Self {
        Self {
            start,
            end,
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    /// Range with explicit inclusivity on both ends
    pub fn new(start: IndexKey, start_inclusive: bool, end: IndexKey, end_inclusive: bool) -> Self {
        Self {
            start,
            end,
            start_inclusive,
            end_inclusive,
        }
    }

    /// Single-key range `[key, key]`
    pub fn point(key: IndexKey) -> Self {
        Self::inclusive(key.clone(), key)
    }

    /// Every key in the index
    pub fn all() -> Self {
        Self::inclusive(IndexKey::MinKey, IndexKey::MaxKey)
    }

    /// Returns true if `key` lies inside the range
    pub fn contains(&self, key: &IndexKey) -> bool {
        let above_start = match key.cmp(&self.start) {
            Ordering::Greater => true,
            Ordering::Equal => self.start_inclusive,
            Ordering::Less => false,
        };
        let below_end = match key.cmp(&self.end) {
            Ordering::Less => true,
            Ordering::Equal => self.end_inclusive,
            Ordering::Greater => false,
        };
        above_start && below_end
    }

    /// Returns true if every key in the range is past `key`'s upper side
    pub fn is_past_end(&self, key: &IndexKey) -> bool {
        match key.cmp(&self.end) {
            Ordering::Greater => true,
            Ordering::Equal => !self.end_inclusive,
            Ordering::Less => false,
        }
    }
}

/// One `(key, record id)` pair of an index, ordered by key then record id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    /// Index key
    pub key: IndexKey,
    /// Record the key was extracted from
    pub record_id: RecordId,
}

impl IndexEntry {
    pub fn new(key: IndexKey, record_id: RecordId) -> Self {
        Self { key, record_id }
    }
}

/// Ordered access to one index.
pub trait IndexAccess {
    /// Index name, for explain output
    fn name(&self) -> &str;

    /// Indexed field path
    fn key_pattern(&self) -> &str;

    /// Returns the first entry inside `range` that sorts strictly after
    /// `after`, or the first entry of the range if `after` is `None`.
    fn seek(&self, range: &KeyRange, after: Option<&IndexEntry>) -> Option<IndexEntry>;
}

/// Index shared across stages.
pub type SharedIndex = Arc<dyn IndexAccess + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_kind_ordering() {
        assert!(IndexKey::MinKey < IndexKey::Null);
        assert!(IndexKey::Null < IndexKey::Bool(false));
        assert!(IndexKey::Bool(true) < IndexKey::Number(-1e9));
        assert!(IndexKey::Number(1e9) < IndexKey::String(String::new()));
        assert!(IndexKey::String("zzz".into()) < IndexKey::GeoHash(0));
        assert!(IndexKey::GeoHash(u64::MAX) < IndexKey::SphereCell(0));
        assert!(IndexKey::SphereCell(u64::MAX) < IndexKey::MaxKey);
    }

    #[test]
    fn test_number_keys_use_total_order() {
        assert_eq!(IndexKey::Number(1.0), IndexKey::Number(1.0));
        assert!(IndexKey::Number(-0.5) < IndexKey::Number(0.5));
    }

    #[test]
    fn test_from_value() {
        assert_eq!(IndexKey::from_value(&json!(3)), Some(IndexKey::Number(3.0)));
        assert_eq!(IndexKey::from_value(&json!("a")), Some(IndexKey::String("a".into())));
        assert_eq!(IndexKey::from_value(&json!([1, 2])), None);
    }

    #[test]
    fn test_range_contains_respects_inclusivity() {
        let range = KeyRange::new(IndexKey::Number(1.0), false, IndexKey::Number(5.0), true);
        assert!(!range.contains(&IndexKey::Number(1.0)));
        assert!(range.contains(&IndexKey::Number(1.5)));
        assert!(range.contains(&IndexKey::Number(5.0)));
        assert!(!range.contains(&IndexKey::Number(5.1)));
        assert!(range.is_past_end(&IndexKey::Number(5.1)));
        assert!(!range.is_past_end(&IndexKey::Number(5.0)));
    }
}
