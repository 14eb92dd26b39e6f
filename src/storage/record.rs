//! Record identifiers and document helpers

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A materialized document. Documents are JSON values.
pub type Document = Value;

/// Identifies a record in the record store.
///
/// A record id is a storage position: it stays meaningful only while the
/// record exists and the holder is inside a transactional context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Returns the raw position value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

/// Resolves a dotted field path (`"a.b.c"`) inside a document.
///
/// Numeric path components index into arrays.
pub fn field_at<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => {
                let idx: usize = part.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_at_top_level() {
        let doc = json!({"a": 1});
        assert_eq!(field_at(&doc, "a"), Some(&json!(1)));
        assert_eq!(field_at(&doc, "b"), None);
    }

    #[test]
    fn test_field_at_nested_and_array() {
        let doc = json!({"loc": {"coords": [3.0, 4.0]}});
        assert_eq!(field_at(&doc, "loc.coords.1"), Some(&json!(4.0)));
        assert_eq!(field_at(&doc, "loc.coords.7"), None);
        assert_eq!(field_at(&doc, "loc.coords.x"), None);
    }

    #[test]
    fn test_record_id_ordering() {
        assert!(RecordId(1) < RecordId(2));
        assert_eq!(RecordId(7).to_string(), "RecordId(7)");
    }
}
