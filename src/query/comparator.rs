//! Total ordering over JSON values and sort keys

use std::cmp::Ordering;

use serde_json::Value;

use super::ast::{SortDirection, SortSpec};
use crate::storage::field_at;
use crate::working_set::WorkingSetEntry;

/// Compares JSON values for sorting and range predicates.
///
/// Ordering rules:
/// - missing < null < bool < number < string < array < object
/// - numbers compare by value regardless of integer/float representation
/// - arrays compare element-wise, objects are equal to each other
pub struct ValueComparator;

impl ValueComparator {
    pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => Self::compare_values(a, b),
        }
    }

    pub fn compare_values(a: &Value, b: &Value) -> Ordering {
        let type_order = |v: &Value| -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Array(_) => 4,
                Value::Object(_) => 5,
            }
        };

        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => {
                let xf = x.as_f64().unwrap_or(0.0);
                let yf = y.as_f64().unwrap_or(0.0);
                xf.total_cmp(&yf)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => x
                .iter()
                .zip(y.iter())
                .map(|(l, r)| Self::compare_values(l, r))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| x.len().cmp(&y.len())),
            (Value::Object(_), Value::Object(_)) => Ordering::Equal,
            _ => type_order(a).cmp(&type_order(b)),
        }
    }

    /// Compares two documents by a compound sort pattern
    pub fn compare_documents(a: &Value, b: &Value, sort: &[SortSpec]) -> Ordering {
        for spec in sort {
            let ordering = Self::compare(field_at(a, &spec.field), field_at(b, &spec.field));
            let ordering = match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compares two entries by a compound sort pattern, reading fields from
    /// documents or, for key-only entries, from their index keys
    pub fn compare_entries(a: &WorkingSetEntry, b: &WorkingSetEntry, sort: &[SortSpec]) -> Ordering {
        for spec in sort {
            let ordering = Self::compare(a.field(&spec.field).as_ref(), b.field(&spec.field).as_ref());
            let ordering = match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
