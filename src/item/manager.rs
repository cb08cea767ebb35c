//! Item manager (spec §4.2): owns the slab heap, the hash index, and item
//! storage; implements the CRUD operation set and the state machine
//! `alloc → unlinked → linked → unlinked → freed`.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::consts::{item_ntotal, ITEM_HDR_SIZE};
use crate::hash::HashIndex;
use crate::metrics::EngineStats;
use crate::slab::{ClassId, EvictionPolicy, Heap, ItemRef};

use super::chain::NodeBudget;
use super::header::{AddResult, CasResult, DeleteResult, Item, ItemFlags, ReplaceResult};

pub struct ItemManager<C: Clock> {
    pub(crate) heap: Heap,
    pub(crate) hash: HashIndex,
    pub(crate) storage: Vec<Vec<Option<Item>>>,
    pub(crate) clock: C,
    pub(crate) config: Config,
    pub stats: EngineStats,
    policy: EvictionPolicy,
    /// Global CAS id generator (`original_source/src/mem/cc_item.c`'s
    /// `cas_id`/`item_next_cas`): assigned fresh on every `set`, never on
    /// `alloc`. Minimum issued value is 1; stays 0 while `use_cas` is off.
    cas_id: u64,
}

impl<C: Clock> ItemManager<C> {
    pub fn new(config: Config, clock: C) -> Self {
        let policy = EvictionPolicy::from_config(config.evict_lru);
        let heap = Heap::new(&config);
        Self {
            heap,
            hash: HashIndex::new(config.hash_power),
            storage: Vec::new(),
            clock,
            config,
            stats: EngineStats::default(),
            policy,
            cas_id: 0,
        }
    }

    /// `item_next_cas` (spec §4.2 "On success… cas = 0" on alloc; the stored
    /// CAS is only ever assigned when an item is linked). Minimum issued
    /// value is 1; stays 0 whenever `use_cas` is disabled, so `cas()`
    /// checks against an always-zero field and effectively never rejects.
    fn next_cas(&mut self) -> u64 {
        if self.config.use_cas {
            self.cas_id += 1;
            self.cas_id
        } else {
            0
        }
    }

    fn sync_storage(&mut self) {
        while self.storage.len() < self.heap.slab_count() {
            let id = self.storage.len() as u32;
            let class = self.heap.slab(id).class;
            let nitem = self.heap.nitem(class) as usize;
            self.storage.push(vec![None; nitem]);
        }
    }

    pub(crate) fn chunk_at(&self, r: ItemRef) -> Option<&Item> {
        self.storage
            .get(r.slab as usize)
            .and_then(|s| s.get(r.chunk as usize))
            .and_then(|c| c.as_ref())
    }

    pub(crate) fn chunk_at_mut(&mut self, r: ItemRef) -> Option<&mut Item> {
        self.storage
            .get_mut(r.slab as usize)
            .and_then(|s| s.get_mut(r.chunk as usize))
            .and_then(|c| c.as_mut())
    }

    pub(crate) fn largest_class(&self) -> u8 {
        self.config.profile.len() as u8
    }

    pub(crate) fn largest_size(&self) -> usize {
        *self.config.profile.last().expect("non-empty profile") as usize
    }

    pub(crate) fn cas_overhead(&self) -> usize {
        if self.config.use_cas {
            crate::consts::CAS_SIZE
        } else {
            0
        }
    }

    /// Allocation protocol (spec §4.1): freelist → bump → fresh slab →
    /// evict. Loops because eviction may need to run more than once if the
    /// freshly reclaimed slab belongs to a different class than requested
    /// (never true here, but the loop also covers the degenerate "reclaimed
    /// slab still can't satisfy" case defensively).
    pub(crate) fn alloc_chunk(&mut self, class: u8) -> Option<ItemRef> {
        self.sync_storage();
        loop {
            match self.heap.get_item(class, self.policy) {
                crate::slab::AllocOutcome::Chunk(r) => {
                    self.sync_storage();
                    self.sync_freeq_stats();
                    return Some(r);
                }
                crate::slab::AllocOutcome::NeedsEviction { victim } => {
                    self.evict_slab(victim);
                    self.heap.reclaim_slab(victim, class);
                    let nitem = self.heap.nitem(class) as usize;
                    self.storage[victim as usize] = vec![None; nitem];
                    match self.policy {
                        EvictionPolicy::Lru => self.stats.evictions_lru += 1,
                        EvictionPolicy::Random => self.stats.evictions_random += 1,
                    }
                    debug!(slab = victim, class, "reclaimed slab via eviction");
                }
                crate::slab::AllocOutcome::OutOfMemory => {
                    self.stats.oom += 1;
                    warn!(class, "allocation failed: no evictable slab");
                    return None;
                }
            }
        }
    }

    /// Free a chunk this call just pulled from the allocator but decided not
    /// to use (same-slab collision while growing a chain).
    pub(crate) fn return_chunk_unused(&mut self, r: ItemRef, class: u8) {
        self.storage[r.slab as usize][r.chunk as usize] = None;
        self.heap.class_mut(class).push_free(r);
        self.sync_freeq_stats();
    }

    /// Recompute `stats.freeq_depth` as the sum of every class's freelist
    /// length. Called after anything that pushes to or pops from a class's
    /// freelist, so the stat never drifts from the heap's actual state.
    fn sync_freeq_stats(&mut self) {
        self.stats.freeq_depth = self.heap.classes.iter().map(|c| c.freeq_depth() as u64).sum();
    }

    /// Eviction reconciliation (spec §4.1): for every occupied chunk in
    /// `victim`, unlink its head (if linked) and free every other-slab node
    /// of its chain; chunks already in `victim` are dropped wholesale by the
    /// caller's subsequent slab reset.
    fn evict_slab(&mut self, victim: u32) {
        let nitem = self.storage[victim as usize].len();
        let mut processed_heads = HashSet::new();
        for chunk in 0..nitem {
            let item = match &self.storage[victim as usize][chunk] {
                Some(it) if it.flags.linked => it.clone(),
                _ => continue,
            };
            let head_ref = item.head.unwrap_or(item.myref);
            if !processed_heads.insert(head_ref) {
                continue;
            }
            self.item_reuse(head_ref, victim);
        }
        for class in self.heap.classes.iter_mut() {
            class.free_chunks.retain(|r| r.slab != victim);
        }
        self.sync_freeq_stats();
    }

    fn item_reuse(&mut self, head_ref: ItemRef, victim: u32) {
        let head_key = match self.chunk_at(head_ref) {
            Some(it) => it.key.clone(),
            None => return,
        };
        self.hash.remove(&head_key);
        let mut cur = Some(head_ref);
        while let Some(r) = cur {
            let next = match self.chunk_at(r) {
                Some(it) => {
                    let next = it.next_node;
                    if r.slab != victim {
                        let class = it.class;
                        self.storage[r.slab as usize][r.chunk as usize] = None;
                        self.heap.class_mut(class).push_free(r);
                        self.stats.chain_nodes_freed += 1;
                    }
                    next
                }
                None => break,
            };
            cur = next;
        }
    }

    pub(crate) fn acquire_chain_slabs(&mut self, head: ItemRef) {
        let mut cur = Some(head);
        while let Some(r) = cur {
            self.heap.acquire_refcount(r.slab);
            cur = self.chunk_at(r).and_then(|it| it.next_node);
        }
    }

    pub(crate) fn release_chain_slabs(&mut self, head: ItemRef) {
        let mut cur = Some(head);
        while let Some(r) = cur {
            self.heap.release_refcount(r.slab);
            cur = self.chunk_at(r).and_then(|it| it.next_node);
        }
    }

    fn touch_chain(&mut self, head: ItemRef) {
        let now = self.clock.now_sec();
        let evict_lru = self.config.evict_lru;
        let mut cur = Some(head);
        while let Some(r) = cur {
            self.heap.touch(r.slab, now, evict_lru);
            cur = self.chunk_at(r).and_then(|it| it.next_node);
        }
    }

    fn free_nodes(&mut self, nodes: &[ItemRef]) {
        for &r in nodes {
            if let Some(it) = self.chunk_at(r) {
                let class = it.class;
                self.storage[r.slab as usize][r.chunk as usize] = None;
                self.heap.class_mut(class).push_free(r);
            }
        }
        self.sync_freeq_stats();
    }

    /// `alloc(nkey, exptime, nbyte)` (spec §4.2). Chooses the smallest class
    /// that fits, or forms a chain when chaining is enabled and the value is
    /// too large for any single class.
    pub fn alloc(&mut self, key: &[u8], exptime: u32, value: &[u8]) -> Option<ItemRef> {
        let want = item_ntotal(key.len() as u8, value.len() as u32, self.config.use_cas);
        match self.heap.class_id(want) {
            ClassId::Class(class) => {
                let r = self.alloc_chunk(class)?;
                let item = Item {
                    last_access: self.clock.now_sec(),
                    exptime,
                    nbyte: value.len() as u32,
                    refcount: 1,
                    flags: ItemFlags {
                        linked: false,
                        has_cas: self.config.use_cas,
                        in_freeq: false,
                        right_aligned: false,
                        chained: false,
                    },
                    class,
                    key: key.into(),
                    value: value.to_vec(),
                    cas: 0,
                    next_node: None,
                    head: None,
                    myref: r,
                };
                self.storage[r.slab as usize][r.chunk as usize] = Some(item);
                self.heap.acquire_refcount(r.slab);
                Some(r)
            }
            ClassId::Chain => {
                if !self.config.chained {
                    warn!(nkey = key.len(), nbyte = value.len(), "oversized, chaining disabled");
                    return None;
                }
                self.alloc_chained(key, exptime, value)
            }
        }
    }

    fn alloc_chained(&mut self, key: &[u8], exptime: u32, value: &[u8]) -> Option<ItemRef> {
        let largest_id = self.largest_class();
        let largest_size = self.largest_size();
        let head_cap = largest_size.saturating_sub(ITEM_HDR_SIZE + self.cas_overhead() + key.len());
        let node_cap = largest_size.saturating_sub(ITEM_HDR_SIZE);

        let mut budget = NodeBudget::new();
        let mut used_slabs: Vec<u32> = Vec::new();
        let mut nodes: Vec<ItemRef> = Vec::new();

        // Each node's slab is pinned (refcount +1) the instant it is kept,
        // not after the whole chain is assembled: since heap pressure during
        // a chained alloc can itself trigger eviction (the next node's
        // allocation may need to reclaim a slab), an unpinned
        // already-claimed node would otherwise be a legal eviction victim
        // for its own chain's later nodes.
        macro_rules! take_node {
            () => {{
                loop {
                    let r = match self.alloc_chunk(largest_id) {
                        Some(r) => r,
                        None => {
                            self.release_nodes(&nodes);
                            self.free_nodes(&nodes);
                            return None;
                        }
                    };
                    if used_slabs.contains(&r.slab) {
                        self.return_chunk_unused(r, largest_id);
                        if !budget.collide() {
                            self.release_nodes(&nodes);
                            self.free_nodes(&nodes);
                            return None;
                        }
                        continue;
                    }
                    used_slabs.push(r.slab);
                    self.heap.acquire_refcount(r.slab);
                    break r;
                }
            }};
        }

        let head_ref = take_node!();
        nodes.push(head_ref);
        let head_value_len = head_cap.min(value.len());
        let mut offset = head_value_len;
        while offset < value.len() {
            let r = take_node!();
            nodes.push(r);
            offset += node_cap.min(value.len() - offset);
        }

        let mut cursor = head_value_len;
        for (i, &r) in nodes.iter().enumerate() {
            let is_head = i == 0;
            let next = nodes.get(i + 1).copied();
            let (nbyte, bytes) = if is_head {
                (head_value_len, value[0..head_value_len].to_vec())
            } else {
                let take = node_cap.min(value.len() - cursor);
                let bytes = value[cursor..cursor + take].to_vec();
                cursor += take;
                (take, bytes)
            };
            let item = Item {
                last_access: self.clock.now_sec(),
                exptime,
                nbyte: nbyte as u32,
                refcount: if is_head { 1 } else { 0 },
                flags: ItemFlags {
                    linked: false,
                    has_cas: is_head && self.config.use_cas,
                    in_freeq: false,
                    right_aligned: true,
                    chained: true,
                },
                class: largest_id,
                key: if is_head { key.into() } else { Box::from([]) },
                value: bytes,
                cas: 0,
                next_node: next,
                head: Some(head_ref),
                myref: r,
            };
            self.storage[r.slab as usize][r.chunk as usize] = Some(item);
        }
        Some(head_ref)
    }

    /// Release the slab pins taken incrementally by `take_node!` when a
    /// chain allocation fails partway through.
    fn release_nodes(&mut self, nodes: &[ItemRef]) {
        for &r in nodes {
            self.heap.release_refcount(r.slab);
        }
    }

    fn is_expired(&self, item: &Item) -> bool {
        let now = self.clock.now_sec();
        if item.exptime != 0 && item.exptime <= now {
            return true;
        }
        self.config.oldest_live != 0 && item.last_access <= self.config.oldest_live
    }

    /// `get(key)` (spec §4.2): pins (acquires a reference) and returns the
    /// head, lazily unlinking if expired.
    pub fn get(&mut self, key: &[u8]) -> Option<ItemRef> {
        let head_ref = match self.hash.find(key) {
            Some(r) => r,
            None => {
                self.stats.record_get(false);
                return None;
            }
        };
        let expired = match self.chunk_at(head_ref) {
            Some(it) => self.is_expired(it),
            None => true,
        };
        if expired {
            self.unlink_and_maybe_free(head_ref);
            self.stats.record_get(false);
            self.stats.expired_unlinks += 1;
            return None;
        }
        self.stats.record_get(true);
        self.touch_chain(head_ref);
        self.acquire_chain_slabs(head_ref);
        if let Some(it) = self.chunk_at_mut(head_ref) {
            it.refcount += 1;
            it.last_access = self.clock.now_sec();
        }
        Some(head_ref)
    }

    /// Concatenated value bytes across every node of the chain rooted at
    /// `head`.
    pub fn value_of(&self, head: ItemRef) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cur = Some(head);
        while let Some(r) = cur {
            match self.chunk_at(r) {
                Some(it) => {
                    out.extend_from_slice(&it.value);
                    cur = it.next_node;
                }
                None => break,
            }
        }
        out
    }

    pub fn key_of(&self, head: ItemRef) -> Option<&[u8]> {
        self.chunk_at(head).map(|it| it.key.as_ref())
    }

    /// The CAS value currently stored against `head`, for callers that want
    /// to read-then-CAS-write a key.
    pub fn cas_of(&self, head: ItemRef) -> u64 {
        self.chunk_at(head).map(|it| it.cas).unwrap_or(0)
    }

    /// Every node of the chain rooted at `head`, in order.
    pub(crate) fn chain_refs(&self, head: ItemRef) -> Vec<ItemRef> {
        let mut out = Vec::new();
        let mut cur = Some(head);
        while let Some(r) = cur {
            out.push(r);
            cur = self.chunk_at(r).and_then(|it| it.next_node);
        }
        out
    }

    pub(crate) fn node_len(&self, r: ItemRef) -> usize {
        self.chunk_at(r).map(|it| it.value.len()).unwrap_or(0)
    }

    /// Free a single non-head chain node, releasing `pins` worth of slab
    /// reference counts (callers pass the head's current refcount, since a
    /// node's slab pins are always kept in lockstep with the head's — see
    /// `acquire_chain_slabs`/`release_chain_slabs`).
    pub(crate) fn free_chain_node(&mut self, r: ItemRef, pins: u32) {
        if let Some(it) = self.chunk_at(r) {
            let class = it.class;
            for _ in 0..pins {
                self.heap.release_refcount(r.slab);
            }
            self.storage[r.slab as usize][r.chunk as usize] = None;
            self.heap.class_mut(class).push_free(r);
            self.sync_freeq_stats();
        }
    }

    /// `remove(item)` (spec §4.2): drop the caller's own pin; free the whole
    /// chain once refcount reaches zero and it's unlinked.
    pub fn remove(&mut self, head: ItemRef) {
        self.release_chain_slabs(head);
        if let Some(it) = self.chunk_at_mut(head) {
            it.refcount = it.refcount.saturating_sub(1);
            let (refcount, linked) = (it.refcount, it.flags.linked);
            if refcount == 0 && !linked {
                self.free_chain(head);
            }
        }
    }

    fn free_chain(&mut self, head: ItemRef) {
        let mut cur = Some(head);
        let mut nodes = Vec::new();
        while let Some(r) = cur {
            match self.chunk_at(r) {
                Some(it) => {
                    nodes.push(r);
                    cur = it.next_node;
                }
                None => break,
            }
        }
        self.free_nodes(&nodes);
        self.stats.chain_nodes_freed += nodes.len() as u64;
    }

    fn unlink_and_maybe_free(&mut self, head: ItemRef) {
        if let Some(key) = self.chunk_at(head).map(|it| it.key.clone()) {
            self.hash.remove(&key);
        }
        if let Some(it) = self.chunk_at_mut(head) {
            it.flags.linked = false;
            if it.refcount == 0 {
                self.free_chain(head);
            }
        }
    }

    /// `set(item)` (spec §4.2): link, displacing and releasing any prior
    /// item for the same key.
    pub fn set(&mut self, head: ItemRef) {
        let key = match self.chunk_at(head) {
            Some(it) => it.key.clone(),
            None => return,
        };
        let cas = self.next_cas();
        if let Some(it) = self.chunk_at_mut(head) {
            it.flags.linked = true;
            it.cas = cas;
        }
        if let Some(prev) = self.hash.insert(&key, head) {
            if prev != head {
                self.unlink_only(prev);
                self.remove(prev);
            }
        }
        self.stats.sets += 1;
    }

    fn unlink_only(&mut self, head: ItemRef) {
        if let Some(it) = self.chunk_at_mut(head) {
            it.flags.linked = false;
        }
    }

    /// `add(item)` (spec §4.2): link only when absent.
    pub fn add(&mut self, head: ItemRef) -> AddResult {
        let key = match self.chunk_at(head) {
            Some(it) => it.key.clone(),
            None => return AddResult::Exists,
        };
        if self.hash.find(&key).is_some() {
            return AddResult::Exists;
        }
        self.set(head);
        AddResult::Ok
    }

    /// `replace(item)` (spec §4.2): link only when present.
    pub fn replace(&mut self, head: ItemRef) -> ReplaceResult {
        let key = match self.chunk_at(head) {
            Some(it) => it.key.clone(),
            None => return ReplaceResult::NotFound,
        };
        if self.hash.find(&key).is_none() {
            return ReplaceResult::NotFound;
        }
        self.set(head);
        ReplaceResult::Ok
    }

    /// `cas(item)` (spec §4.2): replace only when the caller's CAS matches
    /// the stored value's CAS.
    pub fn cas(&mut self, head: ItemRef, expected_cas: u64) -> CasResult {
        let key = match self.chunk_at(head) {
            Some(it) => it.key.clone(),
            None => {
                self.stats.cas_misses += 1;
                return CasResult::NotFound;
            }
        };
        let existing = match self.hash.find(&key) {
            Some(r) => r,
            None => {
                self.stats.cas_misses += 1;
                return CasResult::NotFound;
            }
        };
        let stored_cas = self.chunk_at(existing).map(|it| it.cas).unwrap_or_default();
        if stored_cas != expected_cas {
            self.stats.cas_badval += 1;
            return CasResult::Exists;
        }
        self.stats.cas_hits += 1;
        self.set(head);
        CasResult::Ok
    }

    /// `delete(key)` (spec §4.2): unlink by key, freeing when refcount
    /// reaches zero.
    pub fn delete(&mut self, key: &[u8]) -> DeleteResult {
        let head = match self.hash.remove(key) {
            Some(r) => r,
            None => {
                self.stats.deletes += 0;
                return DeleteResult::NotFound;
            }
        };
        self.stats.deletes += 1;
        self.unlink_and_maybe_free(head);
        DeleteResult::Ok
    }
}
