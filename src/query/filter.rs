//! Predicate filtering
//!
//! No type coercion: a string never equals a number. A field holding an
//! array matches if any element matches.

use std::cmp::Ordering;

use serde_json::Value;

use super::ast::{FilterOp, Predicate};
use super::comparator::ValueComparator;
use crate::storage::field_at;
use crate::working_set::WorkingSetEntry;

/// Evaluates predicates against documents and entries
pub struct PredicateFilter;

impl PredicateFilter {
    /// Checks if a document matches all predicates
    pub fn matches(document: &Value, predicates: &[Predicate]) -> bool {
        predicates
            .iter()
            .all(|pred| Self::matches_value(field_at(document, &pred.field), &pred.op))
    }

    /// Checks if an entry matches all predicates, using covering key data
    /// when the entry has no document
    pub fn matches_entry(entry: &WorkingSetEntry, predicates: &[Predicate]) -> bool {
        predicates
            .iter()
            .all(|pred| Self::matches_value(entry.field(&pred.field).as_ref(), &pred.op))
    }

    fn matches_value(value: Option<&Value>, op: &FilterOp) -> bool {
        if let FilterOp::Exists(present) = op {
            return value.is_some() == *present;
        }
        let value = match value {
            Some(v) => v,
            None => return false,
        };
        if let Value::Array(items) = value {
            if items.iter().any(|item| Self::matches_scalar(item, op)) {
                return true;
            }
        }
        Self::matches_scalar(value, op)
    }

    fn matches_scalar(actual: &Value, op: &FilterOp) -> bool {
        // Null values never match a comparison
        if actual.is_null() {
            return false;
        }
        match op {
            FilterOp::Eq(expected) => Self::eq_match(actual, expected),
            FilterOp::Gte(bound) => Self::range_match(actual, bound, |o| o != Ordering::Less),
            FilterOp::Gt(bound) => Self::range_match(actual, bound, |o| o == Ordering::Greater),
            FilterOp::Lte(bound) => Self::range_match(actual, bound, |o| o != Ordering::Greater),
            FilterOp::Lt(bound) => Self::range_match(actual, bound, |o| o == Ordering::Less),
            FilterOp::Exists(_) => true,
        }
    }

    fn eq_match(actual: &Value, expected: &Value) -> bool {
        match (actual, expected) {
            (Value::Number(_), Value::Number(_)) => {
                ValueComparator::compare_values(actual, expected) == Ordering::Equal
            }
            _ => actual == expected,
        }
    }

    /// Ranges only compare numbers with numbers and strings with strings
    fn range_match(actual: &Value, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
        match (actual, bound) {
            (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
                accept(ValueComparator::compare_values(actual, bound))
            }
            _ => false,
        }
    }
}
