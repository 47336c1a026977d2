// # Hash Index
//
// Chained hash table mapping keys to chunk slots, with power-of-two bucket
// counts. Chains are threaded through the slots' `h_next` indices, so the
// table itself only stores chain heads.
//
// Growth is incremental: when the load factor passes 1.5 the bucket array is
// doubled, and each subsequent insert migrates one bucket from the old array.
// While the migration is in flight, lookups consult the old array for buckets
// that have not been drained yet. Dropping that window would lose items
// mid-growth.

use crate::item::ItemId;
use crate::slab::SlabAllocator;

/// Seed passed to the host hash for every key.
pub(crate) const HASH_SEED: u32 = 0;

/// Initial table size is `2^HASH_POWER_DEFAULT` buckets.
const HASH_POWER_DEFAULT: u32 = 16;

#[derive(Debug)]
pub struct HashIndex {
    primary: Vec<Option<ItemId>>,
    old: Vec<Option<ItemId>>,
    hashpower: u32,
    expanding: bool,
    expand_bucket: usize,
    items: usize,
}

impl HashIndex {
    pub(crate) fn new() -> Self {
        Self::with_power(HASH_POWER_DEFAULT)
    }

    fn with_power(power: u32) -> Self {
        Self {
            primary: vec![None; 1 << power],
            old: Vec::new(),
            hashpower: power,
            expanding: false,
            expand_bucket: 0,
            items: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items
    }

    /// Find the slot holding `key`, walking the chain in whichever table
    /// currently owns the bucket.
    pub(crate) fn find(&self, slabs: &SlabAllocator, key: &[u8], hv: u32) -> Option<ItemId> {
        let (in_old, bucket) = self.locate(hv);
        let table = if in_old { &self.old } else { &self.primary };
        let mut cur = table[bucket];
        while let Some(id) = cur {
            let slot = slabs.slot(id);
            if slot.key() == key {
                return Some(id);
            }
            cur = slot.h_next;
        }
        None
    }

    /// Insert a slot whose key hashes to `hv`. The key must not be present.
    ///
    /// `hash` re-hashes arbitrary keys and is needed to migrate chains into
    /// the grown table.
    pub(crate) fn insert<F>(&mut self, slabs: &mut SlabAllocator, id: ItemId, hv: u32, hash: F)
    where
        F: Fn(&[u8]) -> u32,
    {
        debug_assert!(self.find(slabs, slabs.slot(id).key(), hv).is_none());
        let (in_old, bucket) = self.locate(hv);
        let table = if in_old { &mut self.old } else { &mut self.primary };
        let head = table[bucket];
        table[bucket] = Some(id);
        slabs.slot_mut(id).h_next = head;
        self.items += 1;

        if self.expanding {
            self.migrate_bucket(slabs, hash);
        } else if self.items > self.primary.len() * 3 / 2 {
            self.begin_expand();
        }
    }

    /// Unlink a slot from its chain. Returns false when the slot was not in
    /// the table.
    pub(crate) fn remove(&mut self, slabs: &mut SlabAllocator, id: ItemId, hv: u32) -> bool {
        let (in_old, bucket) = self.locate(hv);
        let table = if in_old { &mut self.old } else { &mut self.primary };
        let mut cur = table[bucket];
        if cur == Some(id) {
            table[bucket] = slabs.slot(id).h_next;
            slabs.slot_mut(id).h_next = None;
            self.items -= 1;
            return true;
        }
        while let Some(c) = cur {
            let next = slabs.slot(c).h_next;
            if next == Some(id) {
                let after = slabs.slot(id).h_next;
                slabs.slot_mut(c).h_next = after;
                slabs.slot_mut(id).h_next = None;
                self.items -= 1;
                return true;
            }
            cur = next;
        }
        false
    }

    /// Bucket owning `hv`: the old table for buckets not yet migrated, the
    /// primary otherwise.
    fn locate(&self, hv: u32) -> (bool, usize) {
        if self.expanding {
            let old_bucket = (hv as usize) & (self.old.len() - 1);
            if old_bucket >= self.expand_bucket {
                return (true, old_bucket);
            }
        }
        (false, (hv as usize) & (self.primary.len() - 1))
    }

    fn begin_expand(&mut self) {
        let grown = vec![None; self.primary.len() * 2];
        self.old = std::mem::replace(&mut self.primary, grown);
        self.hashpower += 1;
        self.expanding = true;
        self.expand_bucket = 0;
        tracing::debug!(
            hashpower = self.hashpower,
            buckets = self.primary.len(),
            "hash table expansion started"
        );
    }

    /// Drain one old bucket into the primary table.
    fn migrate_bucket<F>(&mut self, slabs: &mut SlabAllocator, hash: F)
    where
        F: Fn(&[u8]) -> u32,
    {
        let mut cur = self.old[self.expand_bucket].take();
        while let Some(id) = cur {
            let next = slabs.slot(id).h_next;
            let hv = hash(slabs.slot(id).key());
            let bucket = (hv as usize) & (self.primary.len() - 1);
            slabs.slot_mut(id).h_next = self.primary[bucket];
            self.primary[bucket] = Some(id);
            cur = next;
        }
        self.expand_bucket += 1;
        if self.expand_bucket >= self.old.len() {
            self.expanding = false;
            self.old = Vec::new();
            tracing::debug!("hash table expansion complete");
        }
    }
}
