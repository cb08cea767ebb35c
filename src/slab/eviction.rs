//! Eviction strategy selector (spec §4.1.1). The walk itself lives on
//! `Heap::pick_eviction_victim`; this module just names the policy.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Random,
}

impl EvictionPolicy {
    pub fn from_config(evict_lru: bool) -> Self {
        if evict_lru {
            EvictionPolicy::Lru
        } else {
            EvictionPolicy::Random
        }
    }
}
