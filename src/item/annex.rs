//! `append` / `append_contig` / `prepend` (spec §4.2): growing a stored
//! value is always classified the same three-way way before any bytes
//! move — in place, reallocate the tail whole into a bigger single class,
//! or spill into one or more max-class chain nodes — mirroring
//! `_item_append`/`_item_prepend`'s `nid`-driven branch in
//! `original_source/src/mem/cc_item.c`.

use crate::consts::{item_ntotal, ITEM_HDR_SIZE};
use crate::slab::{ClassId, ItemRef};

use super::header::{AnnexResult, Item, ItemFlags};
use super::manager::ItemManager;
use crate::clock::Clock;

/// Outcome of classifying a tail node's growth by `added` bytes (spec
/// §4.2's Append: "Compute `total`… `nid = slab_id(entry_size(...))`").
enum TailGrowth {
    /// `nid <= tail.class`: the grown content still fits the tail's own
    /// chunk.
    InPlace,
    /// `nid` resolves to a real (non-chain) class bigger than the tail's
    /// current one: reallocate the tail whole into it.
    Realloc(u8),
    /// No single class fits: spill into the chain.
    Chain,
}

impl<C: Clock> ItemManager<C> {
    fn tail_ref(&self, head: ItemRef) -> ItemRef {
        let mut cur = head;
        while let Some(next) = self.chunk_at(cur).and_then(|it| it.next_node) {
            cur = next;
        }
        cur
    }

    pub(crate) fn node_capacity(&self, r: ItemRef) -> usize {
        let it = self.chunk_at(r).expect("node exists");
        let class_size = self.heap.class(it.class).size as usize;
        let overhead = ITEM_HDR_SIZE
            + if it.is_head() {
                self.cas_overhead() + it.key.len()
            } else {
                0
            };
        class_size.saturating_sub(overhead)
    }

    /// Classify growing `tail` (the head iff `tail_is_head`) by `added`
    /// more bytes. Returns the growth mode plus the tail's current used
    /// length, so callers don't need to re-borrow the item.
    fn classify_tail_growth(&self, tail: ItemRef, tail_is_head: bool, added: usize) -> (TailGrowth, usize) {
        let tail_item = self.chunk_at(tail).expect("tail exists");
        let used = tail_item.value.len();
        let tail_class = tail_item.class;
        let tail_nkey = if tail_is_head { tail_item.nkey() } else { 0 };
        let total = used + added;
        let want = item_ntotal(tail_nkey, total as u32, tail_is_head && self.config.use_cas);
        let growth = match self.heap.class_id(want) {
            ClassId::Class(nid) if nid <= tail_class => TailGrowth::InPlace,
            ClassId::Class(nid) => TailGrowth::Realloc(nid),
            ClassId::Chain => TailGrowth::Chain,
        };
        (growth, used)
    }

    /// The `Realloc` branch of `classify_tail_growth`: reallocate `tail`
    /// into `new_class`, whole, with `combined` as its new content — as a
    /// full whole-item relink if `tail` is still the (unchained) head, or
    /// as an in-chain tail splice otherwise (spec §4.2: "If the value was
    /// not previously chained, relink head→new. If it was chained, splice
    /// the new node in as the new tail and free the old tail.").
    fn realloc_tail_for_growth(
        &mut self,
        head: ItemRef,
        tail: ItemRef,
        tail_is_head: bool,
        new_class: u8,
        combined: Vec<u8>,
    ) -> Option<ItemRef> {
        let already_chained = self.chunk_at(head).map(|it| it.flags.chained).unwrap_or(false);
        if tail_is_head && !already_chained {
            let key = self.chunk_at(head)?.key.clone();
            self.realloc_whole_item(&key, head, combined)
        } else {
            self.realloc_tail_node(head, tail, new_class, combined)
        }
    }

    /// Reallocate an entire not-yet-chained item into whatever single
    /// class fits its grown value, relinking in place of the old one.
    fn realloc_whole_item(&mut self, key: &[u8], head: ItemRef, new_value: Vec<u8>) -> Option<ItemRef> {
        let exptime = self.chunk_at(head)?.exptime;
        let new_head = self.alloc(key, exptime, &new_value)?;
        self.set(new_head);
        self.remove(new_head);
        Some(new_head)
    }

    /// Reallocate just the tail node of an already-chained item into a
    /// larger single class, leaving every earlier node untouched.
    fn realloc_tail_node(
        &mut self,
        head: ItemRef,
        tail: ItemRef,
        new_class: u8,
        new_value: Vec<u8>,
    ) -> Option<ItemRef> {
        let exptime = self.chunk_at(head)?.exptime;
        let refs = self.chain_refs(head);
        let idx = refs.iter().position(|&r| r == tail).expect("tail is part of its own chain");
        debug_assert!(idx > 0, "a chained item's tail is never its own head");
        let pred = refs[idx - 1];
        let pins = self.chunk_at(head).map(|it| it.refcount).unwrap_or(0);

        let new_ref = self.alloc_chunk(new_class)?;
        let item = Item {
            last_access: self.clock.now_sec(),
            exptime,
            nbyte: new_value.len() as u32,
            refcount: 0,
            flags: ItemFlags {
                linked: false,
                has_cas: false,
                in_freeq: false,
                right_aligned: true,
                chained: true,
            },
            class: new_class,
            key: Box::from([]),
            value: new_value,
            cas: 0,
            next_node: None,
            head: Some(head),
            myref: new_ref,
        };
        self.storage[new_ref.slab as usize][new_ref.chunk as usize] = Some(item);
        for _ in 0..pins {
            self.heap.acquire_refcount(new_ref.slab);
        }
        if let Some(it) = self.chunk_at_mut(pred) {
            it.next_node = Some(new_ref);
        }
        self.free_chain_node(tail, pins);
        Some(new_ref)
    }

    fn new_chain_node(&mut self, head: ItemRef, class: u8, bytes: Vec<u8>) -> Option<ItemRef> {
        let exptime = self.chunk_at(head)?.exptime;
        let r = self.alloc_chunk(class)?;
        let item = Item {
            last_access: self.clock.now_sec(),
            exptime,
            nbyte: bytes.len() as u32,
            refcount: 0,
            flags: ItemFlags {
                linked: false,
                has_cas: false,
                in_freeq: false,
                right_aligned: true,
                chained: true,
            },
            class,
            key: Box::from([]),
            value: bytes,
            cas: 0,
            next_node: None,
            head: Some(head),
            myref: r,
        };
        self.storage[r.slab as usize][r.chunk as usize] = Some(item);
        let pins = self.chunk_at(head).map(|it| it.refcount).unwrap_or(0);
        for _ in 0..pins {
            self.heap.acquire_refcount(r.slab);
        }
        self.stats.chain_nodes_allocated += 1;
        Some(r)
    }

    fn mark_chained(&mut self, head: ItemRef) {
        if let Some(it) = self.chunk_at_mut(head) {
            it.flags.chained = true;
            if it.head.is_none() {
                it.head = Some(head);
            }
        }
    }

    /// Grow the stored value for `key` by appending `delta`. May straddle
    /// the current tail's free suffix and a freshly allocated node.
    pub fn append(&mut self, key: &[u8], delta: &[u8]) -> AnnexResult {
        let head = match self.hash.find(key) {
            Some(h) => h,
            None => return AnnexResult::NotFound,
        };
        if delta.is_empty() {
            return AnnexResult::Ok;
        }
        // Pin the chain for the duration of the call: growing it may need to
        // allocate further nodes, and those allocations must not be able to
        // evict a node this same call already extended.
        self.acquire_chain_slabs(head);
        let result = self.append_unpinned(head, delta);
        self.release_chain_slabs(head);
        result
    }

    fn append_unpinned(&mut self, head: ItemRef, delta: &[u8]) -> AnnexResult {
        let tail = self.tail_ref(head);
        let tail_is_head = tail == head;
        let (growth, used) = self.classify_tail_growth(tail, tail_is_head, delta.len());
        match growth {
            TailGrowth::InPlace => {
                let it = self.chunk_at_mut(tail).expect("tail exists");
                it.value.extend_from_slice(delta);
                it.nbyte = it.value.len() as u32;
                AnnexResult::Ok
            }
            TailGrowth::Realloc(new_class) => {
                let mut combined = self.chunk_at(tail).expect("tail exists").value.clone();
                combined.extend_from_slice(delta);
                match self.realloc_tail_for_growth(head, tail, tail_is_head, new_class, combined) {
                    Some(_) => AnnexResult::Ok,
                    None => AnnexResult::NoMemory,
                }
            }
            TailGrowth::Chain => {
                let room = self.node_capacity(tail).saturating_sub(used);
                self.append_chain_growth(head, tail, delta, room)
            }
        }
    }

    /// The `nid == chain` sub-mode of plain `append` (spec §4.2): straddle
    /// the old tail's free suffix and one or more fresh max-class nodes.
    fn append_chain_growth(&mut self, head: ItemRef, tail: ItemRef, delta: &[u8], room: usize) -> AnnexResult {
        if !self.config.chained {
            return AnnexResult::Oversized;
        }
        let in_tail_len = room.min(delta.len());
        if in_tail_len > 0 {
            let it = self.chunk_at_mut(tail).expect("tail exists");
            it.value.extend_from_slice(&delta[..in_tail_len]);
            it.nbyte = it.value.len() as u32;
        }
        let mut remaining = &delta[in_tail_len..];
        if remaining.is_empty() {
            self.mark_chained(head);
            return AnnexResult::Ok;
        }
        let largest_id = self.largest_class();
        let node_cap = self.largest_size().saturating_sub(ITEM_HDR_SIZE);
        let mut prev_tail = tail;
        // Nodes created in this loop are pinned the instant they're linked,
        // same rationale as alloc_chained's take_node!: a later iteration's
        // allocation must not be able to evict an earlier iteration's
        // brand-new node. The extra pin is released once the whole value is
        // linked in (see the loop's end below).
        let mut construction_pins: Vec<ItemRef> = Vec::new();
        let result = loop {
            if remaining.is_empty() {
                self.mark_chained(head);
                break AnnexResult::Ok;
            }
            let take = remaining.len().min(node_cap);
            let new_ref = match self.new_chain_node(head, largest_id, remaining[..take].to_vec()) {
                Some(r) => r,
                None => break AnnexResult::NoMemory,
            };
            self.heap.acquire_refcount(new_ref.slab);
            construction_pins.push(new_ref);
            if let Some(it) = self.chunk_at_mut(prev_tail) {
                it.next_node = Some(new_ref);
            }
            prev_tail = new_ref;
            remaining = &remaining[take..];
        };
        for r in construction_pins {
            self.heap.release_refcount(r.slab);
        }
        result
    }

    /// Like `append`, but guarantees the new bytes land in a single node —
    /// required by the zipmap layer, which must never split an entry across
    /// a node boundary.
    pub fn append_contig(&mut self, key: &[u8], delta: &[u8]) -> AnnexResult {
        let head = match self.hash.find(key) {
            Some(h) => h,
            None => return AnnexResult::NotFound,
        };
        if delta.is_empty() {
            return AnnexResult::Ok;
        }
        self.acquire_chain_slabs(head);
        let result = self.append_contig_unpinned(head, delta);
        self.release_chain_slabs(head);
        result
    }

    fn append_contig_unpinned(&mut self, head: ItemRef, delta: &[u8]) -> AnnexResult {
        let node_cap_max = self.largest_size().saturating_sub(ITEM_HDR_SIZE);
        if delta.len() > node_cap_max {
            return AnnexResult::Oversized;
        }
        let tail = self.tail_ref(head);
        let tail_is_head = tail == head;
        let (growth, _used) = self.classify_tail_growth(tail, tail_is_head, delta.len());
        match growth {
            TailGrowth::InPlace => {
                let it = self.chunk_at_mut(tail).expect("tail exists");
                it.value.extend_from_slice(delta);
                it.nbyte = it.value.len() as u32;
                AnnexResult::Ok
            }
            TailGrowth::Realloc(new_class) => {
                let mut combined = self.chunk_at(tail).expect("tail exists").value.clone();
                combined.extend_from_slice(delta);
                match self.realloc_tail_for_growth(head, tail, tail_is_head, new_class, combined) {
                    Some(_) => AnnexResult::Ok,
                    None => AnnexResult::NoMemory,
                }
            }
            TailGrowth::Chain => {
                if !self.config.chained {
                    return AnnexResult::Oversized;
                }
                let largest_id = self.largest_class();
                let new_ref = match self.new_chain_node(head, largest_id, delta.to_vec()) {
                    Some(r) => r,
                    None => return AnnexResult::NoMemory,
                };
                if let Some(it) = self.chunk_at_mut(tail) {
                    it.next_node = Some(new_ref);
                }
                self.mark_chained(head);
                AnnexResult::Ok
            }
        }
    }

    /// Grow the stored value for `key` by prepending `delta` (spec §4.2).
    /// Exploits the head's `right_aligned` flag (set at alloc time) to grow
    /// leftward in place when the result still fits the head's own chunk
    /// capacity — no other node in the chain is read or written. Only when
    /// the head has no spare room does this fall back to rebuilding the
    /// head portion of the value.
    pub fn prepend(&mut self, key: &[u8], delta: &[u8]) -> AnnexResult {
        let head = match self.hash.find(key) {
            Some(h) => h,
            None => return AnnexResult::NotFound,
        };
        if delta.is_empty() {
            return AnnexResult::Ok;
        }
        let (right_aligned, used, cap) = {
            let it = self.chunk_at(head).expect("head exists");
            (it.flags.right_aligned, it.value.len(), self.node_capacity(head))
        };
        if right_aligned && used + delta.len() <= cap {
            let it = self.chunk_at_mut(head).expect("head exists");
            it.value.splice(0..0, delta.iter().copied());
            it.nbyte = it.value.len() as u32;
            return AnnexResult::Ok;
        }
        self.prepend_with_new_head(key, head, delta)
    }

    fn prepend_with_new_head(&mut self, key: &[u8], head: ItemRef, delta: &[u8]) -> AnnexResult {
        let (exptime, head_value, old_next, was_chained) = {
            let it = self.chunk_at(head).expect("head exists");
            (it.exptime, it.value.clone(), it.next_node, it.flags.chained)
        };
        let mut new_head_value = delta.to_vec();
        new_head_value.extend_from_slice(&head_value);

        match old_next {
            Some(old_next) if was_chained => {
                // Already chained: only the head node is undersized for the
                // grown content. Rebuild the head (and, if still oversized,
                // one additional max-class node) from the head's *own*
                // bytes plus delta, then reattach the chain's existing
                // trailing nodes unchanged — mirroring `_item_prepend`'s
                // chained branch (`nit_second->next_node = oit->next_node`)
                // rather than flattening and rebuilding the whole value.
                self.prepend_into_chain_head(key, head, old_next, exptime, new_head_value)
            }
            _ => {
                // Not (yet) chained: the head node is the whole value, so
                // this is a normal whole-item reallocation.
                let want = item_ntotal(key.len() as u8, new_head_value.len() as u32, self.config.use_cas);
                if matches!(self.heap.class_id(want), ClassId::Chain) && !self.config.chained {
                    return AnnexResult::Oversized;
                }
                match self.realloc_whole_item(key, head, new_head_value) {
                    Some(_) => AnnexResult::Ok,
                    None => AnnexResult::NoMemory,
                }
            }
        }
    }

    /// Rebuild just the head node (and, if the grown content still
    /// overflows one chunk, one additional max-class node) of an
    /// already-chained item, then splice the chain's untouched trailing
    /// nodes (`old_next` onward) back in unchanged.
    fn prepend_into_chain_head(
        &mut self,
        key: &[u8],
        old_head: ItemRef,
        old_next: ItemRef,
        exptime: u32,
        new_head_value: Vec<u8>,
    ) -> AnnexResult {
        if !self.config.chained {
            return AnnexResult::Oversized;
        }
        let cas = self.chunk_at(old_head).map(|it| it.cas).unwrap_or(0);
        let pins = self.chunk_at(old_head).map(|it| it.refcount).unwrap_or(0);
        let largest_id = self.largest_class();
        let largest_size = self.largest_size();
        let head_cap = largest_size.saturating_sub(ITEM_HDR_SIZE + self.cas_overhead() + key.len());
        let node_cap = largest_size.saturating_sub(ITEM_HDR_SIZE);

        let head_len = head_cap.min(new_head_value.len());
        let (head_bytes, extra_bytes) = new_head_value.split_at(head_len);
        if extra_bytes.len() > node_cap {
            return AnnexResult::Oversized;
        }
        let head_bytes = head_bytes.to_vec();
        let extra_bytes = extra_bytes.to_vec();

        let new_head_ref = match self.alloc_chunk(largest_id) {
            Some(r) => r,
            None => return AnnexResult::NoMemory,
        };
        // Pinned immediately, same rationale as alloc_chained's take_node!:
        // the next allocation (the extra node, if any) must not be able to
        // evict this one before the chain is fully linked.
        self.heap.acquire_refcount(new_head_ref.slab);

        let second_ref = if extra_bytes.is_empty() {
            None
        } else {
            match self.alloc_chunk(largest_id) {
                Some(r) => {
                    self.heap.acquire_refcount(r.slab);
                    Some(r)
                }
                None => {
                    self.heap.release_refcount(new_head_ref.slab);
                    self.return_chunk_unused(new_head_ref, largest_id);
                    return AnnexResult::NoMemory;
                }
            }
        };

        let next_after_new = second_ref.unwrap_or(old_next);
        let head_item = Item {
            last_access: self.clock.now_sec(),
            exptime,
            nbyte: head_bytes.len() as u32,
            refcount: pins,
            flags: ItemFlags {
                linked: true,
                has_cas: self.config.use_cas,
                in_freeq: false,
                right_aligned: true,
                chained: true,
            },
            class: largest_id,
            key: key.into(),
            value: head_bytes,
            cas,
            next_node: Some(next_after_new),
            head: Some(new_head_ref),
            myref: new_head_ref,
        };
        self.storage[new_head_ref.slab as usize][new_head_ref.chunk as usize] = Some(head_item);

        if let Some(second_ref) = second_ref {
            let second_item = Item {
                last_access: self.clock.now_sec(),
                exptime,
                nbyte: extra_bytes.len() as u32,
                refcount: 0,
                flags: ItemFlags {
                    linked: false,
                    has_cas: false,
                    in_freeq: false,
                    right_aligned: true,
                    chained: true,
                },
                class: largest_id,
                key: Box::from([]),
                value: extra_bytes,
                cas: 0,
                next_node: Some(old_next),
                head: Some(new_head_ref),
                myref: second_ref,
            };
            self.storage[second_ref.slab as usize][second_ref.chunk as usize] = Some(second_item);
        }

        // Bring each new node's pin count down from the temporary +1 taken
        // above to the steady-state `pins` (the number of outstanding
        // `get()` holds on this chain), matching every other node already
        // in the chain.
        self.heap.release_refcount(new_head_ref.slab);
        for _ in 0..pins {
            self.heap.acquire_refcount(new_head_ref.slab);
        }
        if let Some(second_ref) = second_ref {
            self.heap.release_refcount(second_ref.slab);
            for _ in 0..pins {
                self.heap.acquire_refcount(second_ref.slab);
            }
        }

        self.retarget_chain_head(old_next, new_head_ref);
        self.hash.insert(key, new_head_ref);
        self.free_chain_node(old_head, pins);

        AnnexResult::Ok
    }

    /// Walk from `start` to the end of the chain, updating every node's
    /// `head` back-pointer to `new_head` — used when a chain's head node is
    /// replaced but its trailing nodes are kept in place (spec §8 universal
    /// invariant 3: "every node's `head` pointer equals the chain's head").
    fn retarget_chain_head(&mut self, start: ItemRef, new_head: ItemRef) {
        let mut cur = Some(start);
        while let Some(r) = cur {
            cur = match self.chunk_at_mut(r) {
                Some(it) => {
                    it.head = Some(new_head);
                    it.next_node
                }
                None => None,
            };
        }
    }
}
