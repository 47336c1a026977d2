// # Statistics Counters
//
// Aggregate engine counters live behind their own mutex, separate from the
// cache lock; per-size-class item counters are part of the cache state and
// are read under the cache lock. Lock order is always cache then stats.

use crate::server::RelTime;
use serde::{Deserialize, Serialize};

/// Engine-wide aggregate counters, guarded by the stats lock.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Items pushed out of the cache to make room.
    pub evictions: u64,

    /// Bytes currently held by linked items.
    pub curr_bytes: u64,

    /// Number of currently linked items.
    pub curr_items: u64,

    /// Total items ever linked.
    pub total_items: u64,
}

/// Per-size-class item counters.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClassItemStats {
    /// Unexpired items evicted from this class.
    pub evicted: u64,

    /// Age of the most recently evicted item at eviction time.
    pub evicted_time: RelTime,

    /// Allocation failures in this class.
    pub outofmemory: u64,

    /// Chunks reclaimed from items with a stuck reference count.
    pub tailrepairs: u64,
}
