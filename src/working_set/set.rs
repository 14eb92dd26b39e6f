//! Generation-checked arena of working set entries

use std::collections::HashSet;
use std::fmt;

use super::entry::{EntryState, WorkingSetEntry};

/// Handle to a [`WorkingSetEntry`].
///
/// Handles are only meaningful for the working set that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkingSetId {
    index: u32,
    generation: u32,
}

impl fmt::Display for WorkingSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wsid:{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<WorkingSetEntry>,
}

/// Owns every in-flight entry of one query execution.
///
/// Using a handle after it was freed, or one that was never issued, is a
/// programming error and panics.
#[derive(Debug, Default)]
pub struct WorkingSet {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    flagged: HashSet<WorkingSetId>,
    record_and_key: HashSet<WorkingSetId>,
    live: usize,
}

impl WorkingSet {
    /// Creates an empty working set
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh entry in the `Invalid` state
    pub fn allocate(&mut self) -> WorkingSetId {
        self.live += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(WorkingSetEntry::default());
            return WorkingSetId {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("working set exhausted: more than {} live entries", u32::MAX)
        });
        self.slots.push(Slot {
            generation: 0,
            entry: Some(WorkingSetEntry::default()),
        });
        WorkingSetId {
            index,
            generation: 0,
        }
    }

    /// Returns the entry for `id`
    pub fn get(&self, id: WorkingSetId) -> &WorkingSetEntry {
        match self.slots.get(id.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == id.generation => entry,
            _ => panic!("working set handle {} is not allocated", id),
        }
    }

    /// Returns the entry for `id` mutably
    pub fn get_mut(&mut self, id: WorkingSetId) -> &mut WorkingSetEntry {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == id.generation => entry,
            _ => panic!("working set handle {} is not allocated", id),
        }
    }

    /// Frees `id`. The handle and every copy of it become invalid.
    pub fn free(&mut self, id: WorkingSetId) {
        let slot = match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.entry.is_some() => slot,
            _ => panic!("freeing working set handle {} that is not allocated", id),
        };
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        self.free_slots.push(id.index);
        self.flagged.remove(&id);
        self.record_and_key.remove(&id);
    }

    /// Returns true if `id` does not name a live entry
    pub fn is_free(&self, id: WorkingSetId) -> bool {
        !matches!(
            self.slots.get(id.index as usize),
            Some(Slot { generation, entry: Some(_) }) if *generation == id.generation
        )
    }

    /// Marks `id` as needing review: its storage position went away while
    /// it was buffered. Flagged entries stay allocated until freed.
    pub fn flag_for_review(&mut self, id: WorkingSetId) {
        // Panics on a stale handle.
        let _ = self.get(id);
        self.flagged.insert(id);
    }

    pub fn is_flagged(&self, id: WorkingSetId) -> bool {
        self.flagged.contains(&id)
    }

    /// Handles currently flagged for review, in handle order
    pub fn flagged(&self) -> Vec<WorkingSetId> {
        let mut ids: Vec<_> = self.flagged.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Notes that `id` moved into `RecordAndKey`, so a later force-fetch
    /// can find it without walking the whole arena.
    pub fn track_record_and_key(&mut self, id: WorkingSetId) {
        if self.get(id).state() == EntryState::RecordAndKey {
            self.record_and_key.insert(id);
        }
    }

    /// Drains the handles registered through [`track_record_and_key`](Self::track_record_and_key)
    pub fn take_record_and_key_ids(&mut self) -> Vec<WorkingSetId> {
        let mut ids: Vec<_> = self.record_and_key.drain().collect();
        ids.sort();
        ids
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordId;
    use serde_json::json;

    #[test]
    fn test_allocate_get_free() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate();
        assert_eq!(ws.get(id).state(), EntryState::Invalid);

        ws.get_mut(id).set_record_and_document(RecordId(1), json!({"x": 1}));
        assert_eq!(ws.get(id).record_id(), Some(RecordId(1)));

        ws.free(id);
        assert!(ws.is_free(id));
        assert!(ws.is_empty());
    }

    #[test]
    fn test_freed_handle_never_reissued() {
        let mut ws = WorkingSet::new();
        let first = ws.allocate();
        ws.free(first);
        let second = ws.allocate();
        assert_ne!(first, second);
        assert!(ws.is_free(first));
        assert!(!ws.is_free(second));
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_get_after_free_panics() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate();
        ws.free(id);
        let _ = ws.get(id);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_double_free_panics() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate();
        ws.free(id);
        ws.free(id);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_foreign_handle_panics() {
        let mut other = WorkingSet::new();
        other.allocate();
        other.allocate();
        let foreign = other.allocate();

        let ws = WorkingSet::new();
        let _ = ws.get(foreign);
    }

    #[test]
    fn test_flag_survives_until_free() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate();
        ws.flag_for_review(id);
        assert!(ws.is_flagged(id));
        assert_eq!(ws.flagged(), vec![id]);
        assert!(!ws.is_free(id));

        ws.free(id);
        assert!(!ws.is_flagged(id));
    }

    #[test]
    fn test_len_counts_live_entries() {
        let mut ws = WorkingSet::new();
        let ids: Vec<_> = (0..5).map(|_| ws.allocate()).collect();
        ws.free(ids[1]);
        ws.free(ids[3]);
        assert_eq!(ws.len(), 3);
        let reused = ws.allocate();
        assert_eq!(ws.len(), 4);
        ws.free(reused);
        assert_eq!(ws.len(), 3);
    }

    #[test]
    fn test_record_and_key_tracking() {
        let mut ws = WorkingSet::new();
        let keyed = ws.allocate();
        ws.get_mut(keyed).set_record_and_key(RecordId(3), Vec::new());
        ws.track_record_and_key(keyed);

        let plain = ws.allocate();
        ws.track_record_and_key(plain);

        assert_eq!(ws.take_record_and_key_ids(), vec![keyed]);
        assert!(ws.take_record_and_key_ids().is_empty());
    }

    #[test]
    fn test_many_cycles_keep_handles_distinct() {
        let mut ws = WorkingSet::new();
        let mut issued = HashSet::new();
        for _ in 0..100 {
            let a = ws.allocate();
            let b = ws.allocate();
            assert!(issued.insert(a));
            assert!(issued.insert(b));
            ws.free(a);
            ws.free(b);
        }
        assert!(ws.is_empty());
    }
}
