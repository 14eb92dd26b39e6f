//! In-memory record store and index
//!
//! Reference implementations of [`RecordStore`] and [`IndexAccess`] used
//! when embedding the engine over data already in memory, and by tests.
//! Both tolerate mutation while a scan is suspended.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use super::index::{IndexAccess, IndexEntry, IndexKey, KeyRange};
use super::record::{field_at, Document, RecordId};
use super::store::RecordStore;
use crate::near::{points_from_value, GeoHashConverter, SphereCellConverter};

/// Records kept in a `BTreeMap` keyed by [`RecordId`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<RecordId, Document>>,
    /// Records that must be paged in before they can be read
    non_resident: RwLock<HashSet<RecordId>>,
    next_id: AtomicU64,
    page_ins: AtomicU64,
}

impl MemoryRecordStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    /// Creates a store holding `documents`, assigning ids from 1 upward
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        for doc in documents {
            store.insert(doc);
        }
        store
    }

    /// Inserts a document under a fresh record id
    pub fn insert(&self, document: Document) -> RecordId {
        let id = RecordId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, document);
        id
    }

    /// Replaces the document at `id`. Returns false if there is no such record.
    pub fn update(&self, id: RecordId, document: Document) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(&id) {
            Some(slot) => {
                *slot = document;
                true
            }
            None => false,
        }
    }

    /// Deletes the record at `id`, returning its last document
    pub fn remove(&self, id: RecordId) -> Option<Document> {
        self.non_resident
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Marks `id` as not resident; reads of it will ask for a fetch first
    pub fn mark_non_resident(&self, id: RecordId) {
        self.non_resident
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    /// Number of records paged in so far
    pub fn page_in_count(&self) -> u64 {
        self.page_ins.load(Ordering::Relaxed)
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch_document(&self, id: RecordId) -> Option<Document> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn exists(&self, id: RecordId) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn next_after(&self, after: Option<RecordId>) -> Option<RecordId> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        records
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(id, _)| *id)
    }

    fn num_records(&self) -> u64 {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64
    }

    fn needs_fetch(&self, id: RecordId) -> bool {
        self.non_resident
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    fn page_in(&self, id: RecordId) {
        let removed = self
            .non_resident
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed {
            self.page_ins.fetch_add(1, Ordering::Relaxed);
        }
    }
}

type KeyExtractor = Box<dyn Fn(&Document) -> Vec<IndexKey> + Send + Sync>;

/// Sorted set of index entries with a pluggable key extractor.
pub struct MemoryIndex {
    name: String,
    key_pattern: String,
    extractor: KeyExtractor,
    entries: RwLock<BTreeSet<IndexEntry>>,
}

impl MemoryIndex {
    /// Creates an index using `extractor` to derive keys from documents
    pub fn new(
        name: impl Into<String>,
        key_pattern: impl Into<String>,
        extractor: impl Fn(&Document) -> Vec<IndexKey> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            key_pattern: key_pattern.into(),
            extractor: Box::new(extractor),
            entries: RwLock::new(BTreeSet::new()),
        }
    }

    /// Value index over `field`. Arrays produce one key per element.
    pub fn on_field(name: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        let path = field.clone();
        Self::new(name, field, move |doc| match field_at(doc, &path) {
            None => vec![IndexKey::Null],
            Some(Value::Array(items)) => items.iter().filter_map(IndexKey::from_value).collect(),
            Some(value) => IndexKey::from_value(value).into_iter().collect(),
        })
    }

    /// 2D index over the location stored at `field`.
    ///
    /// A field holding several points produces one key per point.
    pub fn geo_2d(
        name: impl Into<String>,
        field: impl Into<String>,
        converter: GeoHashConverter,
    ) -> Self {
        let field = field.into();
        let path = field.clone();
        Self::new(name, field, move |doc| {
            field_at(doc, &path)
                .map(points_from_value)
                .unwrap_or_default()
                .into_iter()
                .map(|p| IndexKey::GeoHash(converter.hash(&p)))
                .collect()
        })
    }

    /// Spherical index over the longitude/latitude stored at `field`.
    ///
    /// Locations outside the longitude/latitude range produce no key.
    pub fn geo_2dsphere(
        name: impl Into<String>,
        field: impl Into<String>,
        converter: SphereCellConverter,
    ) -> Self {
        let field = field.into();
        let path = field.clone();
        Self::new(name, field, move |doc| {
            field_at(doc, &path)
                .map(points_from_value)
                .unwrap_or_default()
                .into_iter()
                .filter(|p| p.x.abs() <= 180.0 && p.y.abs() <= 90.0)
                .map(|p| IndexKey::SphereCell(converter.key(&p)))
                .collect()
        })
    }

    /// Indexes every record currently in `store`
    pub fn build_from(&self, store: &dyn RecordStore) {
        let mut cursor = None;
        while let Some(id) = store.next_after(cursor) {
            if let Some(doc) = store.fetch_document(id) {
                self.insert_document(id, &doc);
            }
            cursor = Some(id);
        }
    }

    /// Adds the keys of `document`
    pub fn insert_document(&self, id: RecordId, document: &Document) {
        let keys = (self.extractor)(document);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.insert(IndexEntry::new(key, id));
        }
    }

    /// Removes the keys of `document`
    pub fn remove_document(&self, id: RecordId, document: &Document) {
        let keys = (self.extractor)(document);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(&IndexEntry::new(key, id));
        }
    }

    /// Number of entries in the index
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexAccess for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_pattern(&self) -> &str {
        &self.key_pattern
    }

    fn seek(&self, range: &KeyRange, after: Option<&IndexEntry>) -> Option<IndexEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let range_start = IndexEntry::new(range.start.clone(), RecordId(0));
        let lower = match after {
            Some(prev) if *prev >= range_start => Bound::Excluded(prev.clone()),
            _ => Bound::Included(range_start),
        };

        entries
            .range((lower, Bound::Unbounded))
            .take_while(|e| !range.is_past_end(&e.key))
            .find(|e| range.contains(&e.key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_insert_and_scan_order() {
        let store = MemoryRecordStore::with_documents(vec![json!({"a": 1}), json!({"a": 2})]);
        let first = store.next_after(None).unwrap();
        let second = store.next_after(Some(first)).unwrap();
        assert!(first < second);
        assert_eq!(store.next_after(Some(second)), None);
        assert_eq!(store.num_records(), 2);
    }

    #[test]
    fn test_scan_resumes_after_deleted_position() {
        let store = MemoryRecordStore::with_documents((0..3).map(|i| json!({"i": i})));
        let first = store.next_after(None).unwrap();
        store.remove(first);
        assert!(!store.exists(first));
        assert_eq!(store.next_after(Some(first)), Some(RecordId(2)));
    }

    #[test]
    fn test_non_resident_records_page_in_once() {
        let store = MemoryRecordStore::new();
        let id = store.insert(json!({}));
        store.mark_non_resident(id);
        assert!(store.needs_fetch(id));
        store.page_in(id);
        store.page_in(id);
        assert!(!store.needs_fetch(id));
        assert_eq!(store.page_in_count(), 1);
    }

    #[test]
    fn test_index_seek_respects_range_and_after() {
        let store = MemoryRecordStore::with_documents((0..10).map(|i| json!({"n": i})));
        let index = MemoryIndex::on_field("n_1", "n");
        index.build_from(&store);

        let range = KeyRange::new(IndexKey::Number(2.0), false, IndexKey::Number(5.0), true);
        let mut seen = Vec::new();
        let mut after = None;
        while let Some(entry) = index.seek(&range, after.as_ref()) {
            seen.push(entry.key.clone());
            after = Some(entry);
        }
        assert_eq!(
            seen,
            vec![IndexKey::Number(3.0), IndexKey::Number(4.0), IndexKey::Number(5.0)]
        );
    }

    #[test]
    fn test_multikey_field() {
        let store = MemoryRecordStore::with_documents(vec![json!({"tags": ["a", "b"]})]);
        let index = MemoryIndex::on_field("tags_1", "tags");
        index.build_from(&store);
        assert_eq!(index.len(), 2);
    }
}
