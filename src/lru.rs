// # LRU Manager
//
// Per-size-class recency lists threaded through the slots' `next`/`prev`
// indices. The head is the most recently accessed item, the tail the least;
// eviction and expired-chunk reclamation walk backwards from the tail.

use crate::item::{ItemFlags, ItemId};
use crate::slab::SlabAllocator;

#[derive(Debug)]
pub struct LruQueues {
    heads: Vec<Option<ItemId>>,
    tails: Vec<Option<ItemId>>,
    sizes: Vec<u32>,
}

impl LruQueues {
    pub(crate) fn new(num_classes: usize) -> Self {
        Self {
            heads: vec![None; num_classes],
            tails: vec![None; num_classes],
            sizes: vec![0; num_classes],
        }
    }

    pub(crate) fn head(&self, cls: u8) -> Option<ItemId> {
        self.heads[cls as usize]
    }

    pub(crate) fn tail(&self, cls: u8) -> Option<ItemId> {
        self.tails[cls as usize]
    }

    pub(crate) fn size(&self, cls: u8) -> u32 {
        self.sizes[cls as usize]
    }

    /// Prepend a slot to its class's list.
    pub(crate) fn link_head(&mut self, slabs: &mut SlabAllocator, id: ItemId) {
        let cls = slabs.slot(id).clsid as usize;
        debug_assert!(!slabs.slot(id).iflag.contains(ItemFlags::SLABBED));
        let head = self.heads[cls];
        debug_assert_ne!(head, Some(id));
        debug_assert_eq!(head.is_some(), self.tails[cls].is_some());
        {
            let slot = slabs.slot_mut(id);
            slot.prev = None;
            slot.next = head;
        }
        if let Some(h) = head {
            slabs.slot_mut(h).prev = Some(id);
        }
        self.heads[cls] = Some(id);
        if self.tails[cls].is_none() {
            self.tails[cls] = Some(id);
        }
        self.sizes[cls] += 1;
    }

    /// Detach a slot from its class's list.
    pub(crate) fn unlink(&mut self, slabs: &mut SlabAllocator, id: ItemId) {
        let cls = slabs.slot(id).clsid as usize;
        let (next, prev) = {
            let slot = slabs.slot(id);
            (slot.next, slot.prev)
        };
        if self.heads[cls] == Some(id) {
            debug_assert!(prev.is_none());
            self.heads[cls] = next;
        }
        if self.tails[cls] == Some(id) {
            debug_assert!(next.is_none());
            self.tails[cls] = prev;
        }
        if let Some(n) = next {
            slabs.slot_mut(n).prev = prev;
        }
        if let Some(p) = prev {
            slabs.slot_mut(p).next = next;
        }
        {
            let slot = slabs.slot_mut(id);
            slot.next = None;
            slot.prev = None;
        }
        self.sizes[cls] -= 1;
    }
}
