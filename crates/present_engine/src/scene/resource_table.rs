//! Stable-handle storage for scene resources
//!
//! Records live in a dense array so per-frame iteration touches contiguous
//! memory. A sparse slot array maps every handle to its dense position and
//! carries a generation counter per slot. Removing a record swaps the last
//! record into the hole and frees the slot with a bumped generation, so a
//! handle to a removed record can never resolve to whatever reuses the slot.
//!
//! The storage is `slotmap::DenseSlotMap`, which implements exactly this
//! packed free list. This module adds the typed errors the renderer reports
//! and the fixed-width [`HandleId`] used in diagnostics.

use std::fmt;

use slotmap::{DenseSlotMap, Key, KeyData};
use thiserror::Error;

/// Fixed-width view of a handle: slot index plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    /// Slot in the sparse array
    pub index: u32,
    /// Generation the handle was issued under
    pub generation: u32,
}

impl HandleId {
    /// Extract the slot and generation from any table handle
    pub fn of<K: Key>(key: K) -> Self {
        Self::from_bits(key.data().as_ffi())
    }

    /// Decode the 64-bit token form
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: (bits & 0xffff_ffff) as u32,
            generation: (bits >> 32) as u32,
        }
    }

    /// Encode as a single 64-bit token
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Errors returned by resource table lookups
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// `remove` was given a handle that does not name a live record
    #[error("Resource not found: {0}")]
    NotFound(HandleId),

    /// `get` was given a handle whose record has been removed
    #[error("Stale resource handle: {0}")]
    Stale(HandleId),
}

/// Dense, generation-checked registry for one resource category
pub struct ResourceTable<K: Key, T> {
    records: DenseSlotMap<K, T>,
}

impl<K: Key, T> ResourceTable<K, T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            records: DenseSlotMap::with_key(),
        }
    }

    /// Create an empty table with room for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: DenseSlotMap::with_capacity_and_key(capacity),
        }
    }

    /// Store a record and return its handle
    pub fn add(&mut self, record: T) -> K {
        self.records.insert(record)
    }

    /// Remove a record, returning it
    ///
    /// GPU objects referenced by the record must already be released.
    pub fn remove(&mut self, handle: K) -> Result<T, ResourceError> {
        self.records
            .remove(handle)
            .ok_or_else(|| ResourceError::NotFound(HandleId::of(handle)))
    }

    /// Look up a live record
    pub fn get(&self, handle: K) -> Result<&T, ResourceError> {
        self.records
            .get(handle)
            .ok_or_else(|| ResourceError::Stale(HandleId::of(handle)))
    }

    /// Look up a live record mutably
    pub fn get_mut(&mut self, handle: K) -> Result<&mut T, ResourceError> {
        self.records
            .get_mut(handle)
            .ok_or_else(|| ResourceError::Stale(HandleId::of(handle)))
    }

    /// Whether the handle names a live record
    pub fn contains(&self, handle: K) -> bool {
        self.records.contains_key(handle)
    }

    /// Number of live records
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Live `(handle, record)` pairs in dense order
    ///
    /// The order only changes through `remove`, which moves the last record
    /// into the freed position, so identical operation sequences always
    /// iterate identically.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.records.iter()
    }

    /// Live handles in dense order
    pub fn handles(&self) -> impl Iterator<Item = K> + '_ {
        self.records.keys()
    }

    /// Drop every record; all outstanding handles become stale
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl<K: Key, T> Default for ResourceTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, T: fmt::Debug> fmt::Debug for ResourceTable<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.records.iter().map(|(k, v)| (HandleId::of(k), v)))
            .finish()
    }
}

/// Rebuild a handle from its 64-bit token, e.g. one read back from a log
pub fn handle_from_bits<K: Key>(bits: u64) -> K {
    KeyData::from_ffi(bits).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{HashMap, HashSet};

    slotmap::new_key_type! {
        struct TestHandle;
    }

    #[test]
    fn test_add_get_remove() {
        let mut table: ResourceTable<TestHandle, &str> = ResourceTable::new();
        let a = table.add("a");
        let b = table.add("b");

        assert_eq!(table.size(), 2);
        assert_eq!(table.get(a), Ok(&"a"));
        assert_eq!(table.get(b), Ok(&"b"));

        assert_eq!(table.remove(a), Ok("a"));
        assert_eq!(table.size(), 1);
        assert_eq!(table.get(a), Err(ResourceError::Stale(HandleId::of(a))));
        assert_eq!(table.remove(a), Err(ResourceError::NotFound(HandleId::of(a))));
        assert_eq!(table.get(b), Ok(&"b"));
    }

    #[test]
    fn test_reused_slot_does_not_alias_old_handle() {
        let mut table: ResourceTable<TestHandle, u32> = ResourceTable::new();
        let old = table.add(1);
        table.remove(old).unwrap();

        let new = table.add(2);
        let old_id = HandleId::of(old);
        let new_id = HandleId::of(new);

        // Same slot, different generation
        assert_eq!(old_id.index, new_id.index);
        assert_ne!(old_id.generation, new_id.generation);
        assert!(table.get(old).is_err());
        assert_eq!(table.get(new), Ok(&2));
    }

    #[test]
    fn test_swap_remove_keeps_moved_record_reachable() {
        let mut table: ResourceTable<TestHandle, u32> = ResourceTable::new();
        let first = table.add(10);
        let _middle = table.add(20);
        let last = table.add(30);

        table.remove(first).unwrap();

        // The last record was moved into the freed dense position
        assert_eq!(table.get(last), Ok(&30));
        let order: Vec<u32> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, vec![30, 20]);
    }

    #[test]
    fn test_handle_bits_round_trip() {
        let mut table: ResourceTable<TestHandle, u8> = ResourceTable::new();
        let handle = table.add(7);
        let id = HandleId::of(handle);

        assert_eq!(HandleId::from_bits(id.to_bits()), id);
        let rebuilt: TestHandle = handle_from_bits(id.to_bits());
        assert_eq!(rebuilt, handle);
        assert_eq!(table.get(rebuilt), Ok(&7));
    }

    #[test]
    fn test_null_handle_is_stale() {
        let table: ResourceTable<TestHandle, u8> = ResourceTable::new();
        assert!(matches!(table.get(TestHandle::null()), Err(ResourceError::Stale(_))));
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let mut table: ResourceTable<TestHandle, u8> = ResourceTable::new();
        let handles: Vec<_> = (0..8).map(|i| table.add(i)).collect();
        table.clear();

        assert!(table.is_empty());
        assert!(handles.iter().all(|h| table.get(*h).is_err()));
    }

    /// Randomized add/remove sequences checked against a plain model
    #[test]
    fn test_random_sequences_keep_handles_exact() {
        for seed in 0..32_u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut table: ResourceTable<TestHandle, u64> = ResourceTable::new();
            let mut live: HashMap<TestHandle, u64> = HashMap::new();
            let mut dead: Vec<TestHandle> = Vec::new();
            let mut adds = 0_usize;
            let mut removes = 0_usize;

            for step in 0..400_u64 {
                let remove = !live.is_empty() && rng.gen_bool(0.45);
                if remove {
                    let pick = rng.gen_range(0..live.len());
                    let handle = *live.keys().nth(pick).unwrap();
                    let expected = live.remove(&handle).unwrap();
                    assert_eq!(table.remove(handle), Ok(expected));
                    dead.push(handle);
                    removes += 1;
                } else {
                    let value = seed * 10_000 + step;
                    let handle = table.add(value);
                    assert!(live.insert(handle, value).is_none());
                    adds += 1;
                }

                // Stable-handle integrity
                for (handle, value) in &live {
                    assert_eq!(table.get(*handle), Ok(value));
                }
                for handle in &dead {
                    assert_eq!(table.get(*handle), Err(ResourceError::Stale(HandleId::of(*handle))));
                }

                // Dense packing
                assert_eq!(table.size(), adds - removes);
                let seen: HashSet<TestHandle> = table.handles().collect();
                assert_eq!(seen.len(), table.size());
                assert_eq!(table.iter().count(), table.size());
                assert!(seen.iter().all(|h| live.contains_key(h)));
            }
        }
    }

    #[test]
    fn test_iteration_is_deterministic() {
        let build = || {
            let mut table: ResourceTable<TestHandle, u32> = ResourceTable::new();
            let handles: Vec<_> = (0..10).map(|i| table.add(i)).collect();
            table.remove(handles[3]).unwrap();
            table.remove(handles[7]).unwrap();
            table.add(100);
            table.iter().map(|(_, v)| *v).collect::<Vec<_>>()
        };

        assert_eq!(build(), build());
    }
}
