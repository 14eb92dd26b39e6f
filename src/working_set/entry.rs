//! Working set entries

use std::collections::HashMap;

use serde_json::Value;

use crate::storage::{field_at, Document, IndexKey, RecordId};

/// Which parts of a result an entry currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Freshly allocated, nothing populated yet
    Invalid,
    /// Index key data only, no record (covered results)
    IndexKeyOnly,
    /// Record id plus the index key that led to it
    RecordAndKey,
    /// Record id plus the document read under the current context
    RecordAndDocument,
    /// A private copy of the document, detached from storage
    OwnedDocument,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Invalid => "INVALID",
            EntryState::IndexKeyOnly => "INDEX_KEY_ONLY",
            EntryState::RecordAndKey => "RECORD_AND_KEY",
            EntryState::RecordAndDocument => "RECORD_AND_DOCUMENT",
            EntryState::OwnedDocument => "OWNED_DOCUMENT",
        }
    }
}

/// An index key extracted for an entry, tagged with the field it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKeyData {
    /// Field path the key was built from
    pub key_pattern: String,
    /// Key value
    pub key: IndexKey,
}

/// Per-stage annotations attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputedKind {
    /// Distance from a proximity search centre
    Distance,
    /// The location a proximity distance was measured to
    NearPoint,
}

/// Value of a computed annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedData {
    Distance(f64),
    NearPoint(Value),
}

impl ComputedData {
    pub fn kind(&self) -> ComputedKind {
        match self {
            ComputedData::Distance(_) => ComputedKind::Distance,
            ComputedData::NearPoint(_) => ComputedKind::NearPoint,
        }
    }
}

/// One candidate result.
///
/// The setters keep the state, record id and document consistent: a record
/// id is present in the two record states and absent otherwise, and an
/// owned document never carries a record id.
#[derive(Debug, Clone)]
pub struct WorkingSetEntry {
    state: EntryState,
    record_id: Option<RecordId>,
    document: Option<Document>,
    key_data: Vec<IndexKeyData>,
    computed: HashMap<ComputedKind, ComputedData>,
    fetch_request: Option<RecordId>,
}

impl Default for WorkingSetEntry {
    fn default() -> Self {
        Self {
            state: EntryState::Invalid,
            record_id: None,
            document: None,
            key_data: Vec::new(),
            computed: HashMap::new(),
            fetch_request: None,
        }
    }
}

impl WorkingSetEntry {
    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn key_data(&self) -> &[IndexKeyData] {
        &self.key_data
    }

    pub fn has_record_id(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }

    pub fn has_owned_document(&self) -> bool {
        self.state == EntryState::OwnedDocument
    }

    /// Covered result: index keys only
    pub fn set_index_key_only(&mut self, keys: Vec<IndexKeyData>) {
        self.state = EntryState::IndexKeyOnly;
        self.record_id = None;
        self.document = None;
        self.key_data = keys;
    }

    /// Record located through an index, document not read yet
    pub fn set_record_and_key(&mut self, record_id: RecordId, keys: Vec<IndexKeyData>) {
        self.state = EntryState::RecordAndKey;
        self.record_id = Some(record_id);
        self.document = None;
        self.key_data = keys;
    }

    /// Record with its document read under the current context
    pub fn set_record_and_document(&mut self, record_id: RecordId, document: Document) {
        self.state = EntryState::RecordAndDocument;
        self.record_id = Some(record_id);
        self.document = Some(document);
        self.key_data.clear();
    }

    /// Detaches the entry from storage, keeping `document` as a private copy
    pub fn set_owned_document(&mut self, document: Document) {
        self.state = EntryState::OwnedDocument;
        self.record_id = None;
        self.document = Some(document);
        self.key_data.clear();
        self.fetch_request = None;
    }

    pub fn add_computed(&mut self, data: ComputedData) {
        self.computed.insert(data.kind(), data);
    }

    pub fn computed(&self, kind: ComputedKind) -> Option<&ComputedData> {
        self.computed.get(&kind)
    }

    pub fn has_computed(&self, kind: ComputedKind) -> bool {
        self.computed.contains_key(&kind)
    }

    /// Distance annotation, if a proximity stage computed one
    pub fn distance(&self) -> Option<f64> {
        match self.computed.get(&ComputedKind::Distance) {
            Some(ComputedData::Distance(d)) => Some(*d),
            _ => None,
        }
    }

    /// Records that `record_id` must be paged in before this entry can make
    /// progress. Read back by the driver when a stage answers `NeedFetch`.
    pub fn request_fetch(&mut self, record_id: RecordId) {
        self.fetch_request = Some(record_id);
    }

    pub fn has_fetch_request(&self) -> bool {
        self.fetch_request.is_some()
    }

    pub fn take_fetch_request(&mut self) -> Option<RecordId> {
        self.fetch_request.take()
    }

    /// Looks up `path` in the document, falling back to covering key data.
    pub fn field(&self, path: &str) -> Option<Value> {
        if let Some(doc) = &self.document {
            return field_at(doc, path).cloned();
        }
        self.key_data
            .iter()
            .find(|k| k.key_pattern == path)
            .map(|k| k.key.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_owned_document_drops_record_id() {
        let mut entry = WorkingSetEntry::default();
        entry.set_record_and_document(RecordId(4), json!({"a": 1}));
        assert!(entry.has_record_id());

        entry.set_owned_document(json!({"a": 1}));
        assert_eq!(entry.state(), EntryState::OwnedDocument);
        assert!(!entry.has_record_id());
        assert!(entry.has_owned_document());
    }

    #[test]
    fn test_field_falls_back_to_key_data() {
        let mut entry = WorkingSetEntry::default();
        entry.set_record_and_key(
            RecordId(1),
            vec![IndexKeyData {
                key_pattern: "age".into(),
                key: IndexKey::Number(30.0),
            }],
        );
        assert_eq!(entry.field("age"), Some(json!(30.0)));
        assert_eq!(entry.field("name"), None);
    }

    #[test]
    fn test_computed_side_table() {
        let mut entry = WorkingSetEntry::default();
        assert_eq!(entry.distance(), None);
        entry.add_computed(ComputedData::Distance(2.5));
        entry.add_computed(ComputedData::Distance(1.5));
        assert_eq!(entry.distance(), Some(1.5));
        assert!(entry.has_computed(ComputedKind::Distance));
        assert!(!entry.has_computed(ComputedKind::NearPoint));
    }
}
