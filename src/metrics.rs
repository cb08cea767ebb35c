//! Engine-wide counters, returned by value on request.
//!
//! Single-threaded core, so plain `u64` fields suffice — no atomics, unlike
//! the teacher's concurrent `SlabAllocatorStats`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStats {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub cas_hits: u64,
    pub cas_misses: u64,
    pub cas_badval: u64,
    pub deletes: u64,
    pub expired_unlinks: u64,
    /// Evictions by strategy.
    pub evictions_lru: u64,
    pub evictions_random: u64,
    /// Allocation attempts that failed with no evictable slab.
    pub oom: u64,
    /// Chunks currently sitting in per-class freelists, summed across
    /// classes.
    pub freeq_depth: u64,
    pub chain_nodes_allocated: u64,
    pub chain_nodes_freed: u64,
}

impl EngineStats {
    pub fn record_get(&mut self, hit: bool) {
        self.gets += 1;
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}
