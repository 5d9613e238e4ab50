//! Process-wide slot state shared between the polling thread and readers
//!
//! Copy-on-write: readers clone an `Arc` to an immutable snapshot, the single
//! writer swaps in a modified copy. The lock is held only for the clone or the
//! swap, never across hardware or network I/O.

use crate::domain::types::{Occupancy, Slot, SlotId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Point-in-time view of every slot, ordered by slot id
pub type Snapshot = BTreeMap<SlotId, Slot>;

pub struct SharedStateStore {
    inner: RwLock<Arc<Snapshot>>,
}

impl SharedStateStore {
    /// Create a store for a fixed set of slots, all starting unknown
    pub fn new(slot_ids: &[SlotId]) -> Self {
        let snapshot: Snapshot = slot_ids.iter().map(|&id| (id, Slot::UNKNOWN)).collect();
        Self { inner: RwLock::new(Arc::new(snapshot)) }
    }

    /// Consistent copy of all slots; later writes never show through it
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.inner.read().clone()
    }

    /// Replace the state of one slot.
    ///
    /// Returns false (and leaves the store untouched) for ids outside the
    /// configured set.
    pub fn apply_transition(&self, slot_id: SlotId, state: Slot) -> bool {
        let mut guard = self.inner.write();
        if !guard.contains_key(&slot_id) {
            warn!(slot = %slot_id, "state_store_unknown_slot");
            return false;
        }
        Arc::make_mut(&mut *guard).insert(slot_id, state);
        true
    }

    /// Whether at least one slot is known to be vacant
    pub fn any_vacant(&self) -> bool {
        self.inner.read().values().any(|slot| slot.occupancy == Occupancy::Vacant)
    }

    pub fn slot(&self, slot_id: SlotId) -> Option<Slot> {
        self.inner.read().get(&slot_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SharedStateStore {
        SharedStateStore::new(&[SlotId(1), SlotId(2), SlotId(3), SlotId(4)])
    }

    fn occupied_at(t: u64) -> Slot {
        Slot { occupancy: Occupancy::Occupied, last_transition_time: Some(t) }
    }

    #[test]
    fn test_slots_start_unknown() {
        let store = store();
        let snapshot = store.get_snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.values().all(|s| *s == Slot::UNKNOWN));
        assert!(!store.any_vacant());
    }

    #[test]
    fn test_snapshot_is_not_a_live_alias() {
        let store = store();
        let before = store.get_snapshot();
        assert!(store.apply_transition(SlotId(2), occupied_at(100)));

        assert_eq!(before[&SlotId(2)], Slot::UNKNOWN);
        assert_eq!(store.get_snapshot()[&SlotId(2)], occupied_at(100));
    }

    #[test]
    fn test_unknown_slot_rejected() {
        let store = store();
        assert!(!store.apply_transition(SlotId(9), occupied_at(1)));
        assert_eq!(store.get_snapshot().len(), 4);
    }

    #[test]
    fn test_any_vacant() {
        let store = store();
        for id in 1..=4 {
            store.apply_transition(SlotId(id), occupied_at(1));
        }
        assert!(!store.any_vacant());

        store.apply_transition(
            SlotId(2),
            Slot { occupancy: Occupancy::Vacant, last_transition_time: Some(5) },
        );
        assert!(store.any_vacant());
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let store = Arc::new(store());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for t in 0..500u64 {
                    for id in 1..=4 {
                        store.apply_transition(SlotId(id), occupied_at(t));
                    }
                }
            })
        };

        for _ in 0..500 {
            let snapshot = store.get_snapshot();
            assert_eq!(snapshot.len(), 4);
        }
        writer.join().unwrap();
        assert!(store.get_snapshot().values().all(|s| *s == occupied_at(499)));
    }
}
