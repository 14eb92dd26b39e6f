//! Result types for query execution

use serde::Serialize;
use serde_json::Value;

use crate::storage::RecordId;

/// A single result handed to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultDocument {
    /// Record the result was read from; `None` once the result was detached
    /// from storage by an invalidation, or for covered results
    pub record_id: Option<RecordId>,
    /// Document body, or the covering index keys for covered results
    pub document: Value,
    /// Distance from the centre of a proximity search
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl ResultDocument {
    pub fn new(record_id: Option<RecordId>, document: Value) -> Self {
        Self {
            record_id,
            document,
            distance: None,
        }
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }

    /// Returns the document body
    pub fn body(&self) -> &Value {
        &self.document
    }
}

/// Everything an executor returned, drained to completion
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    /// Documents in result order
    pub documents: Vec<ResultDocument>,
    /// Number of `work()` calls on the root stage
    pub works: u64,
    /// Number of yields performed
    pub yields: u64,
}

impl ExecutionResult {
    /// Creates an empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if nothing was returned
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the number of results
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns an iterator over the documents
    pub fn iter(&self) -> impl Iterator<Item = &ResultDocument> {
        self.documents.iter()
    }

    /// Record ids of the results that still have one, in order
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.documents.iter().filter_map(|d| d.record_id).collect()
    }
}
