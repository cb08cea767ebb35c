//! The heap: owns slab metadata, the slab LRU queue, and per-class
//! bookkeeping. Item payloads are *not* stored here — see `item::manager`,
//! which keeps its own arena indexed the same way (spec §9: arena + stable
//! indices instead of pointer arithmetic).

use std::collections::VecDeque;

use rand::Rng;
use tracing::debug;

use crate::config::Config;
use crate::consts::SLAB_HDR_SIZE;

use super::class::{slab_id, ClassId, SlabClass};
use super::eviction::EvictionPolicy;
use super::ItemRef;

/// Per-slab metadata. No payload lives here; `class` tracks which
/// `SlabClass` the slab's chunks currently belong to.
#[derive(Debug, Clone)]
pub struct Slab {
    pub id: u32,
    pub class: u8,
    pub refcount: u32,
    pub last_touch: u32,
}

pub struct Heap {
    pub slabs: Vec<Slab>,
    pub classes: Vec<SlabClass>,
    max_slabs: u32,
    slab_lru: VecDeque<u32>,
    use_freeq: bool,
    profile: Vec<u32>,
}

/// Outcome of a `get_item` attempt that could not be satisfied without
/// eviction; the caller (which owns item data) must reconcile the victim's
/// live chunks before calling `reclaim_slab`.
pub enum AllocOutcome {
    Chunk(ItemRef),
    NeedsEviction { victim: u32 },
    OutOfMemory,
}

impl Heap {
    pub fn new(config: &Config) -> Self {
        let payload = config.slab_size - SLAB_HDR_SIZE as u32;
        let classes = config
            .profile
            .iter()
            .map(|&sz| SlabClass::new(sz, payload / sz))
            .collect();
        let max_slabs = (config.maxbytes / config.slab_size as u64) as u32;
        let mut heap = Self {
            slabs: Vec::new(),
            classes,
            max_slabs,
            slab_lru: VecDeque::new(),
            use_freeq: config.use_freeq,
            profile: config.profile.clone(),
        };
        if config.prealloc {
            // spec §6/§4.1.1: "allocate the entire heap up front at startup."
            // `Config::validate` guarantees one slab per class fits in
            // `max_slabs` before this ever runs, so every class starts with
            // a ready-to-bump slab instead of carving lazily on first use.
            for class_id in 1..=heap.classes.len() as u8 {
                heap.carve_new_slab(class_id);
            }
        }
        heap
    }

    pub fn class_id(&self, requested: usize) -> ClassId {
        slab_id(&self.profile, requested)
    }

    pub fn class(&self, id: u8) -> &SlabClass {
        &self.classes[id as usize - 1]
    }

    pub fn class_mut(&mut self, id: u8) -> &mut SlabClass {
        &mut self.classes[id as usize - 1]
    }

    pub fn slab(&self, id: u32) -> &Slab {
        &self.slabs[id as usize]
    }

    pub fn slab_mut(&mut self, id: u32) -> &mut Slab {
        &mut self.slabs[id as usize]
    }

    /// Step 1 of spec §4.1's allocation protocol: freelist, then bump, then
    /// (if room) a fresh slab. Returns `NeedsEviction`/`OutOfMemory` when the
    /// caller must evict first.
    pub fn get_item(&mut self, class_id: u8, policy: EvictionPolicy) -> AllocOutcome {
        if let Some(item) = self.class_mut(class_id).pop_free(self.use_freeq) {
            return AllocOutcome::Chunk(item);
        }
        if let Some(item) = self.class_mut(class_id).bump() {
            return AllocOutcome::Chunk(item);
        }
        if (self.slabs.len() as u32) < self.max_slabs {
            let id = self.carve_new_slab(class_id);
            if let Some(item) = self.class_mut(class_id).bump() {
                debug!(slab = id, class = class_id, "carved fresh slab");
                return AllocOutcome::Chunk(item);
            }
        }
        match self.pick_eviction_victim(policy) {
            Some(victim) => AllocOutcome::NeedsEviction { victim },
            None => AllocOutcome::OutOfMemory,
        }
    }

    fn carve_new_slab(&mut self, class_id: u8) -> u32 {
        let id = self.slabs.len() as u32;
        self.slabs.push(Slab {
            id,
            class: class_id,
            refcount: 0,
            last_touch: 0,
        });
        self.slab_lru.push_back(id);
        self.class_mut(class_id).adopt_slab(id);
        id
    }

    /// Reassign an already-emptied slab (caller has freed/reused every live
    /// item in it) to `new_class`, ready for bump allocation.
    pub fn reclaim_slab(&mut self, victim: u32, new_class: u8) {
        let slab = self.slab_mut(victim);
        slab.class = new_class;
        slab.refcount = 0;
        self.class_mut(new_class).adopt_slab(victim);
    }

    /// Bounded walk over the slab LRU queue (policy `Lru`) or uniform
    /// sampling over the slab index (policy `Random`); returns the first
    /// zero-refcount candidate found within `EVICT_PROBE_MAX` probes.
    pub fn pick_eviction_victim(&self, policy: EvictionPolicy) -> Option<u32> {
        if self.slabs.is_empty() {
            return None;
        }
        match policy {
            EvictionPolicy::Lru => self
                .slab_lru
                .iter()
                .take(crate::consts::EVICT_PROBE_MAX)
                .copied()
                .find(|&id| self.slab(id).refcount == 0),
            EvictionPolicy::Random => {
                let mut rng = rand::rng();
                (0..crate::consts::EVICT_PROBE_MAX)
                    .map(|_| rng.random_range(0..self.slabs.len() as u32))
                    .find(|&id| self.slab(id).refcount == 0)
            }
        }
    }

    /// Move `slab_id` to the tail of the LRU queue, throttled to once per
    /// `SLAB_TOUCH_INTERVAL_SECS`, and only when LRU eviction is in effect
    /// (spec §9 open question: preserved literally — no touch under random
    /// eviction).
    pub fn touch(&mut self, slab_id: u32, now: u32, evict_lru: bool) {
        if !evict_lru {
            return;
        }
        let slab = self.slab_mut(slab_id);
        if now.saturating_sub(slab.last_touch) < crate::consts::SLAB_TOUCH_INTERVAL_SECS {
            return;
        }
        slab.last_touch = now;
        if let Some(pos) = self.slab_lru.iter().position(|&id| id == slab_id) {
            self.slab_lru.remove(pos);
        }
        self.slab_lru.push_back(slab_id);
    }

    pub fn acquire_refcount(&mut self, slab_id: u32) {
        self.slab_mut(slab_id).refcount += 1;
    }

    pub fn release_refcount(&mut self, slab_id: u32) {
        let slab = self.slab_mut(slab_id);
        slab.refcount = slab.refcount.saturating_sub(1);
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    pub fn nitem(&self, class_id: u8) -> u32 {
        self.class(class_id).nitem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::scenario_default()
    }

    #[test]
    fn allocates_until_slabs_exhausted_then_needs_eviction() {
        let config = cfg();
        let mut heap = Heap::new(&config);
        // class 1 (size 128): payload 1024 -> 8 items/slab, 8 slabs max.
        let mut got = 0;
        loop {
            match heap.get_item(1, EvictionPolicy::Lru) {
                AllocOutcome::Chunk(_) => got += 1,
                AllocOutcome::NeedsEviction { .. } => break,
                AllocOutcome::OutOfMemory => panic!("unexpected OOM"),
            }
            if got > 1000 {
                panic!("alloc loop did not terminate");
            }
        }
        assert_eq!(got, 8 * 8);
    }

    #[test]
    fn prealloc_carves_one_slab_per_class_up_front() {
        let mut config = cfg();
        config.prealloc = true;
        let heap = Heap::new(&config);
        assert_eq!(heap.slab_count(), config.profile.len());
        for (i, class) in heap.classes.iter().enumerate() {
            assert_eq!(heap.slab(i as u32).class, (i + 1) as u8);
            assert!(class.nitem > 0, "class {} should have a bumpable slab", i + 1);
        }
    }

    #[test]
    fn no_prealloc_starts_with_an_empty_heap() {
        let mut config = cfg();
        config.prealloc = false;
        let heap = Heap::new(&config);
        assert_eq!(heap.slab_count(), 0);
    }

    #[test]
    fn refcount_blocks_eviction_candidates() {
        let config = cfg();
        let mut heap = Heap::new(&config);
        heap.carve_new_slab(1);
        heap.acquire_refcount(0);
        assert_eq!(heap.pick_eviction_victim(EvictionPolicy::Lru), None);
        heap.release_refcount(0);
        assert_eq!(heap.pick_eviction_victim(EvictionPolicy::Lru), Some(0));
    }
}
