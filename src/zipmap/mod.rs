//! Zipmap: an ordered, encoded (secondary key, value) sequence stored as
//! the payload of one logical item (spec §4.3). Built on top of
//! `item::ItemManager` — a zipmap is identified by its host item's primary
//! key, and every mutation goes through `append_contig` so an entry never
//! straddles a chain-node boundary.
//!
//! Mutations touch only the node(s) an entry actually lives in: a fit-in-place
//! overwrite splices bytes directly into the existing slot, a delete follows
//! the three cases from `cc_zipmap.c`'s `zmap_delete_raw` (sole entry in a
//! non-head node, last entry in a node with predecessors, entry in the
//! middle), and `realloc_from_tail` folds the chain's tail node forward into
//! whichever node just shrank so a sequence of deletes doesn't leave the
//! chain full of half-empty nodes. `last-in-node` is a per-node invariant —
//! exactly one entry per node carries it — so every helper that changes
//! which entry ends a node recomputes it from scratch via
//! `normalize_last_in_node` rather than tracking clear/set transitions by
//! hand.

pub mod entry;

use crate::clock::Clock;
use crate::consts::{ITEM_HDR_SIZE, ZMAP_ENTRY_HDR_SIZE, ZMAP_PADDING_MAX};
use crate::item::{AnnexResult, ItemManager};
use crate::slab::ItemRef;

pub use entry::ZmapEntry;
use entry::FLAG_LAST_IN_NODE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmapSetResult {
    Ok,
    NotFound,
    Oversized,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmapAddResult {
    Ok,
    Exists,
    NotFound,
    Oversized,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmapReplaceResult {
    Ok,
    NotFound,
    EntryNotFound,
    Oversized,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmapDeleteResult {
    Ok,
    NotFound,
    EntryNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZmapGetResult {
    Found(Vec<u8>),
    NotFound,
    EntryNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmapDeltaResult {
    Ok(i64),
    NotFound,
    EntryNotFound,
    NonNumeric,
    Overflow,
}

/// Where one entry lives: which node, whether that node is the chain head
/// (so its entries sit after the 4-byte length header), and its byte range
/// within that node's *entries region* (i.e. already excluding the header).
struct EntryLoc {
    node: ItemRef,
    is_head: bool,
    start: usize,
    size: usize,
}

/// Full chain flatten, used only by the bulk read paths (`zmap_len`,
/// `zmap_get_all`, `zmap_get_multiple`) where every entry is wanted anyway.
fn read_entries<C: Clock>(m: &ItemManager<C>, head: ItemRef) -> (u32, Vec<ZmapEntry>) {
    let full = m.value_of(head);
    if full.len() < 4 {
        return (0, Vec::new());
    }
    let len = u32::from_le_bytes(full[0..4].try_into().unwrap());
    let mut entries = Vec::new();
    let mut offset = 4;
    while offset < full.len() {
        match ZmapEntry::decode(&full[offset..]) {
            Some((entry, sz)) => {
                entries.push(entry);
                offset += sz;
            }
            None => break,
        }
    }
    (len, entries)
}

fn max_entry_size<C: Clock>(m: &ItemManager<C>) -> usize {
    m.largest_size() - ITEM_HDR_SIZE
}

/// The entries region of one node: everything after the 4-byte zipmap
/// header on the head node, the whole value elsewhere.
fn entries_bytes<C: Clock>(m: &ItemManager<C>, r: ItemRef, is_head: bool) -> Vec<u8> {
    let it = m.chunk_at(r).expect("node exists");
    if is_head {
        it.value[4.min(it.value.len())..].to_vec()
    } else {
        it.value.clone()
    }
}

fn entries_len<C: Clock>(m: &ItemManager<C>, r: ItemRef, is_head: bool) -> usize {
    m.node_len(r).saturating_sub(if is_head { 4 } else { 0 })
}

/// Overwrite a node's entries region in place, leaving the 4-byte header
/// (on the head node) untouched.
fn set_entries_bytes<C: Clock>(m: &mut ItemManager<C>, r: ItemRef, is_head: bool, bytes: &[u8]) {
    let it = m.chunk_at_mut(r).expect("node exists");
    if is_head {
        it.value.truncate(4);
        it.value.extend_from_slice(bytes);
    } else {
        it.value.clear();
        it.value.extend_from_slice(bytes);
    }
    it.nbyte = it.value.len() as u32;
}

fn reset_head_entries<C: Clock>(m: &mut ItemManager<C>, head: ItemRef) {
    let it = m.chunk_at_mut(head).expect("head exists");
    it.value.truncate(4);
    it.nbyte = it.value.len() as u32;
}

fn truncate_node_at<C: Clock>(m: &mut ItemManager<C>, node: ItemRef, abs_offset: usize) {
    let it = m.chunk_at_mut(node).expect("node exists");
    it.value.truncate(abs_offset);
    it.nbyte = it.value.len() as u32;
}

fn remove_bytes_in_node<C: Clock>(m: &mut ItemManager<C>, node: ItemRef, abs_offset: usize, len: usize) {
    let it = m.chunk_at_mut(node).expect("node exists");
    it.value.drain(abs_offset..abs_offset + len);
    it.nbyte = it.value.len() as u32;
}

/// Adjust the zipmap's stored entry count (the head's 4-byte header).
fn bump_header_count<C: Clock>(m: &mut ItemManager<C>, head: ItemRef, delta: i32) {
    if let Some(it) = m.chunk_at_mut(head) {
        if it.value.len() >= 4 {
            let cur = u32::from_le_bytes(it.value[0..4].try_into().unwrap());
            let new = (cur as i64 + delta as i64).max(0) as u32;
            it.value[0..4].copy_from_slice(&new.to_le_bytes());
        }
    }
}

/// Find the entry keyed by `skey`, scanning node by node rather than
/// flattening the whole chain — mirrors `zmap_lookup_with_node`.
fn locate_entry<C: Clock>(m: &ItemManager<C>, head: ItemRef, skey: &[u8]) -> Option<EntryLoc> {
    for (i, r) in m.chain_refs(head).into_iter().enumerate() {
        let is_head = i == 0;
        let region = entries_bytes(m, r, is_head);
        let mut offset = 0;
        while offset < region.len() {
            match ZmapEntry::decode(&region[offset..]) {
                Some((entry, sz)) => {
                    if entry.key == skey {
                        return Some(EntryLoc {
                            node: r,
                            is_head,
                            start: offset,
                            size: sz,
                        });
                    }
                    offset += sz;
                }
                None => break,
            }
        }
    }
    None
}

fn decode_entry_at<C: Clock>(m: &ItemManager<C>, loc: &EntryLoc) -> ZmapEntry {
    let region = entries_bytes(m, loc.node, loc.is_head);
    ZmapEntry::decode(&region[loc.start..]).expect("entry at location").0
}

/// Overwrite an existing entry without touching any other entry or node,
/// when the new encoding fits within the old slot and the resulting padding
/// stays within the one-byte `npadding` field (spec §4.3: "in-place replace
/// when `new_size <= old_size <= new_size + 255`"). Preserves the slot's
/// `last-in-node` bit regardless of the caller's flags, since an in-place
/// replace never changes which entry ends the node.
fn replace_in_place<C: Clock>(m: &mut ItemManager<C>, loc: &EntryLoc, new_entry: &ZmapEntry) -> bool {
    let raw_new = ZMAP_ENTRY_HDR_SIZE + new_entry.key.len() + new_entry.value.len();
    if raw_new > loc.size || loc.size - raw_new > ZMAP_PADDING_MAX {
        return false;
    }
    let npadding = (loc.size - raw_new) as u8;
    let base = (if loc.is_head { 4 } else { 0 }) + loc.start;
    let it = m.chunk_at_mut(loc.node).expect("node exists");
    let preserve_last = it.value[base + 6] & FLAG_LAST_IN_NODE;
    let mut bytes = Vec::with_capacity(loc.size);
    bytes.extend_from_slice(&(new_entry.value.len() as u32).to_le_bytes());
    bytes.push(new_entry.key.len() as u8);
    bytes.push(npadding);
    bytes.push((new_entry.flags & !FLAG_LAST_IN_NODE) | preserve_last);
    bytes.extend_from_slice(&new_entry.key);
    bytes.extend_from_slice(&new_entry.value);
    bytes.resize(loc.size, 0);
    it.value[base..base + loc.size].copy_from_slice(&bytes);
    true
}

/// Recompute which entry in `node` carries `last-in-node`, from scratch.
/// Exactly one entry per node should have the bit set (its own terminal
/// entry) — simpler and more robust than threading clear/set transitions
/// through every mutation that can change a node's entry count.
fn normalize_last_in_node<C: Clock>(m: &mut ItemManager<C>, node: ItemRef, is_head: bool) {
    let it = m.chunk_at_mut(node).expect("node exists");
    let base = if is_head { 4.min(it.value.len()) } else { 0 };
    let mut offset = base;
    let mut last = None;
    loop {
        if offset >= it.value.len() {
            break;
        }
        match ZmapEntry::decode(&it.value[offset..]) {
            Some((_e, sz)) => {
                it.value[offset + 6] &= !FLAG_LAST_IN_NODE;
                last = Some(offset);
                offset += sz;
            }
            None => break,
        }
    }
    if let Some(off) = last {
        it.value[off + 6] |= FLAG_LAST_IN_NODE;
    }
}

/// Detach `node` (not the head) from the chain rooted at `head`, relinking
/// its predecessor and freeing its chunk.
fn remove_node_from_chain<C: Clock>(m: &mut ItemManager<C>, head: ItemRef, node: ItemRef) {
    let refs = m.chain_refs(head);
    let idx = refs.iter().position(|&r| r == node).expect("node in chain");
    assert!(idx > 0, "head is never removed from its own chain");
    let next = m.chunk_at(node).and_then(|it| it.next_node);
    let pins = m.chunk_at(head).map(|it| it.refcount).unwrap_or(0);
    if let Some(it) = m.chunk_at_mut(refs[idx - 1]) {
        it.next_node = next;
    }
    m.free_chain_node(node, pins);
    m.stats.chain_nodes_freed += 1;
}

/// `zmap_realloc_from_tail` (spec §4.3.1): after a deletion shrinks `node`,
/// fold the chain's actual tail forward into the freed room — whole nodes
/// when they fit entirely, otherwise the longest whole-entry prefix that
/// does — so a run of deletes doesn't leave the chain full of half-empty
/// nodes. Never splits an entry across a node boundary.
fn realloc_from_tail<C: Clock>(m: &mut ItemManager<C>, head: ItemRef, node: ItemRef) {
    loop {
        let refs = m.chain_refs(head);
        let tail = *refs.last().expect("chain is non-empty");
        if tail == node {
            break;
        }
        let node_is_head = node == head;
        let room = m.node_capacity(node).saturating_sub(entries_len(m, node, node_is_head));
        let tail_bytes = entries_bytes(m, tail, false);
        if tail_bytes.is_empty() {
            remove_node_from_chain(m, head, tail);
            continue;
        }
        if tail_bytes.len() <= room {
            let mut combined = entries_bytes(m, node, node_is_head);
            combined.extend_from_slice(&tail_bytes);
            set_entries_bytes(m, node, node_is_head, &combined);
            remove_node_from_chain(m, head, tail);
            normalize_last_in_node(m, node, node_is_head);
            continue;
        }
        // Tail doesn't wholly fit: pull the longest whole-entry prefix that
        // does, leave the remainder in a shrunk tail node.
        let mut offset = 0usize;
        loop {
            if offset >= tail_bytes.len() {
                break;
            }
            match ZmapEntry::decode(&tail_bytes[offset..]) {
                Some((_e, sz)) => {
                    if offset + sz > room {
                        break;
                    }
                    offset += sz;
                }
                None => break,
            }
        }
        if offset == 0 {
            break;
        }
        let mut combined = entries_bytes(m, node, node_is_head);
        combined.extend_from_slice(&tail_bytes[..offset]);
        set_entries_bytes(m, node, node_is_head, &combined);
        set_entries_bytes(m, tail, false, &tail_bytes[offset..]);
        normalize_last_in_node(m, node, node_is_head);
        normalize_last_in_node(m, tail, false);
        break;
    }
}

/// `zmap_delete_raw`'s three cases (spec §4.3): sole entry in a non-head
/// node removes the node outright; last entry in a node with predecessors
/// truncates the node and promotes the predecessor; anything else shifts
/// the trailing bytes down over the deleted entry. Every case ends by
/// folding the tail forward via `realloc_from_tail`, except removing a
/// whole node (nothing to refill) and the whole-zipmap-emptied case
/// (nothing left to fold).
fn delete_entry_at<C: Clock>(m: &mut ItemManager<C>, head: ItemRef, loc: &EntryLoc) {
    let refs = m.chain_refs(head);
    let base = (if loc.is_head { 4 } else { 0 }) + loc.start;
    let is_last_in_node = m
        .chunk_at(loc.node)
        .map(|it| it.value[base + 6] & FLAG_LAST_IN_NODE != 0)
        .unwrap_or(false);

    if is_last_in_node {
        if loc.start == 0 {
            // Sole entry in its node.
            let sole_node_in_chain = refs.len() == 1;
            if !sole_node_in_chain && !loc.is_head {
                remove_node_from_chain(m, head, loc.node);
            } else if !sole_node_in_chain && loc.is_head {
                reset_head_entries(m, head);
                realloc_from_tail(m, head, head);
            } else {
                reset_head_entries(m, head);
            }
        } else {
            truncate_node_at(m, loc.node, base);
            normalize_last_in_node(m, loc.node, loc.is_head);
            realloc_from_tail(m, head, loc.node);
        }
    } else {
        remove_bytes_in_node(m, loc.node, base, loc.size);
        realloc_from_tail(m, head, loc.node);
    }
}

/// Append a brand new entry (flagged as its node's terminal entry, then
/// renormalized) via `append_contig`, which already guarantees it lands
/// whole in a single node — the tail's free room, the tail reallocated into
/// a larger class, or (only once no single class fits) a fresh max-class
/// node — so zipmap entries never end up split across a node boundary.
fn insert_new_entry<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8], head: ItemRef, mut entry: ZmapEntry) -> bool {
    entry.flags |= FLAG_LAST_IN_NODE;
    let bytes = entry.encode();
    if !matches!(m.append_contig(primary_key, &bytes), AnnexResult::Ok) {
        return false;
    }
    let refs = m.chain_refs(head);
    let landed = *refs.last().expect("chain is non-empty");
    normalize_last_in_node(m, landed, landed == head);
    true
}

/// `init(primary_key)` (spec §4.3): store a zipmap header with length 0.
pub fn zmap_init<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8]) -> bool {
    match m.alloc(primary_key, 0, &0u32.to_le_bytes()) {
        Some(r) => {
            m.set(r);
            m.remove(r);
            true
        }
        None => false,
    }
}

pub fn zmap_len<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8]) -> Option<u32> {
    let head = m.get(primary_key)?;
    let (_stored_len, entries) = read_entries(m, head);
    m.remove(head);
    Some(entries.len() as u32)
}

fn set_or_add<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    skey: &[u8],
    value: Vec<u8>,
    numeric: bool,
    reject_if_present: bool,
) -> Result<bool, ()> {
    let head = match m.get(primary_key) {
        Some(h) => h,
        None => return Err(()),
    };
    let new_size = ZmapEntry::entry_size(skey.len(), value.len());
    if new_size > max_entry_size(m) {
        m.remove(head);
        return Err(());
    }
    let new_entry = ZmapEntry::new(skey, value, numeric);
    let ok = match locate_entry(m, head, skey) {
        Some(loc) => {
            if reject_if_present {
                m.remove(head);
                return Ok(false);
            }
            if replace_in_place(m, &loc, &new_entry) {
                true
            } else {
                // Existing slot too small: delete it and re-add, same as
                // `zmap_replace_raw` falling back to `zmap_delete_raw` +
                // `zmap_add_raw` when the entry grew past its padding room.
                delete_entry_at(m, head, &loc);
                bump_header_count(m, head, -1);
                let inserted = insert_new_entry(m, primary_key, head, new_entry);
                if inserted {
                    bump_header_count(m, head, 1);
                }
                inserted
            }
        }
        None => {
            let inserted = insert_new_entry(m, primary_key, head, new_entry);
            if inserted {
                bump_header_count(m, head, 1);
            }
            inserted
        }
    };
    m.remove(head);
    if ok {
        Ok(true)
    } else {
        Err(())
    }
}

/// `set(m, s, v)` (spec §4.3): insert or overwrite.
pub fn zmap_set<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    skey: &[u8],
    value: Vec<u8>,
) -> ZmapSetResult {
    match set_or_add(m, primary_key, skey, value, false, false) {
        Ok(true) => ZmapSetResult::Ok,
        Ok(false) => unreachable!("set never rejects on presence"),
        Err(()) => {
            if m.get(primary_key).map(|h| m.remove(h)).is_none() {
                ZmapSetResult::NotFound
            } else {
                ZmapSetResult::Oversized
            }
        }
    }
}

/// `add(m, s, v)` (spec §4.3): insert only when absent.
pub fn zmap_add<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    skey: &[u8],
    value: Vec<u8>,
) -> ZmapAddResult {
    match set_or_add(m, primary_key, skey, value, false, true) {
        Ok(true) => ZmapAddResult::Ok,
        Ok(false) => ZmapAddResult::Exists,
        Err(()) => {
            if m.get(primary_key).map(|h| m.remove(h)).is_none() {
                ZmapAddResult::NotFound
            } else {
                ZmapAddResult::Oversized
            }
        }
    }
}

/// `replace(m, s, v)` (spec §4.3): overwrite only when present.
pub fn zmap_replace<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    skey: &[u8],
    value: Vec<u8>,
) -> ZmapReplaceResult {
    let head = match m.get(primary_key) {
        Some(h) => h,
        None => return ZmapReplaceResult::NotFound,
    };
    let exists = locate_entry(m, head, skey).is_some();
    m.remove(head);
    if !exists {
        return ZmapReplaceResult::EntryNotFound;
    }
    match set_or_add(m, primary_key, skey, value, false, false) {
        Ok(true) => ZmapReplaceResult::Ok,
        Ok(false) => ZmapReplaceResult::EntryNotFound,
        Err(()) => ZmapReplaceResult::Oversized,
    }
}

/// `delete(m, s)` (spec §4.3).
pub fn zmap_delete<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8], skey: &[u8]) -> ZmapDeleteResult {
    let head = match m.get(primary_key) {
        Some(h) => h,
        None => return ZmapDeleteResult::NotFound,
    };
    let loc = match locate_entry(m, head, skey) {
        Some(l) => l,
        None => {
            m.remove(head);
            return ZmapDeleteResult::EntryNotFound;
        }
    };
    delete_entry_at(m, head, &loc);
    bump_header_count(m, head, -1);
    m.remove(head);
    ZmapDeleteResult::Ok
}

/// `get(m, s)` (spec §4.3).
pub fn zmap_get<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8], skey: &[u8]) -> ZmapGetResult {
    let head = match m.get(primary_key) {
        Some(h) => h,
        None => return ZmapGetResult::NotFound,
    };
    let found = locate_entry(m, head, skey).map(|loc| decode_entry_at(m, &loc));
    m.remove(head);
    match found {
        Some(e) => ZmapGetResult::Found(e.value),
        None => ZmapGetResult::EntryNotFound,
    }
}

pub fn zmap_exists<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8], skey: &[u8]) -> bool {
    matches!(zmap_get(m, primary_key, skey), ZmapGetResult::Found(_))
}

/// `get_all`/`get_keys`/`get_vals` (spec §4.3 iteration).
pub fn zmap_get_all<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8]) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
    let head = m.get(primary_key)?;
    let (_len, entries) = read_entries(m, head);
    m.remove(head);
    Some(entries.into_iter().map(|e| (e.key, e.value)).collect())
}

pub fn zmap_get_keys<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8]) -> Option<Vec<Vec<u8>>> {
    zmap_get_all(m, primary_key).map(|all| all.into_iter().map(|(k, _)| k).collect())
}

pub fn zmap_get_vals<C: Clock>(m: &mut ItemManager<C>, primary_key: &[u8]) -> Option<Vec<Vec<u8>>> {
    zmap_get_all(m, primary_key).map(|all| all.into_iter().map(|(_, v)| v).collect())
}

pub fn zmap_get_multiple<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    keys: &[Vec<u8>],
) -> Option<Vec<Option<Vec<u8>>>> {
    let head = m.get(primary_key)?;
    let (_len, entries) = read_entries(m, head);
    m.remove(head);
    Some(
        keys.iter()
            .map(|k| entries.iter().find(|e| &e.key == k).map(|e| e.value.clone()))
            .collect(),
    )
}

/// `delta(m, s, signed_delta)` (spec §4.3): numeric entries store a fixed
/// 8-byte signed integer, so a delta is always an in-place replace.
pub fn zmap_delta<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    skey: &[u8],
    delta: i64,
) -> ZmapDeltaResult {
    let head = match m.get(primary_key) {
        Some(h) => h,
        None => return ZmapDeltaResult::NotFound,
    };
    let loc = match locate_entry(m, head, skey) {
        Some(l) => l,
        None => {
            m.remove(head);
            return ZmapDeltaResult::EntryNotFound;
        }
    };
    let current_entry = decode_entry_at(m, &loc);
    if !current_entry.is_numeric() || current_entry.value.len() != 8 {
        m.remove(head);
        return ZmapDeltaResult::NonNumeric;
    }
    let current = i64::from_le_bytes(current_entry.value.clone().try_into().unwrap());
    let new_val = match current.checked_add(delta) {
        Some(v) => v,
        None => {
            m.remove(head);
            return ZmapDeltaResult::Overflow;
        }
    };
    let mut new_entry = current_entry;
    new_entry.value = new_val.to_le_bytes().to_vec();
    replace_in_place(m, &loc, &new_entry);
    m.remove(head);
    ZmapDeltaResult::Ok(new_val)
}

pub fn zmap_set_numeric<C: Clock>(
    m: &mut ItemManager<C>,
    primary_key: &[u8],
    skey: &[u8],
    value: i64,
) -> ZmapSetResult {
    match set_or_add(m, primary_key, skey, value.to_le_bytes().to_vec(), true, false) {
        Ok(true) => ZmapSetResult::Ok,
        Ok(false) => unreachable!("set never rejects on presence"),
        Err(()) => {
            if m.get(primary_key).map(|h| m.remove(h)).is_none() {
                ZmapSetResult::NotFound
            } else {
                ZmapSetResult::Oversized
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;

    fn manager() -> ItemManager<ManualClock> {
        ItemManager::new(Config::scenario_default(), ManualClock::new(0))
    }

    #[test]
    fn seeded_scenario_5() {
        let mut m = manager();
        assert!(zmap_init(&mut m, b"z"));
        assert_eq!(zmap_set(&mut m, b"z", b"a", b"1".to_vec()), ZmapSetResult::Ok);
        assert_eq!(zmap_set(&mut m, b"z", b"b", b"2".to_vec()), ZmapSetResult::Ok);
        assert_eq!(zmap_set(&mut m, b"z", b"a", b"11".to_vec()), ZmapSetResult::Ok);
        assert_eq!(zmap_len(&mut m, b"z"), Some(2));
        assert_eq!(zmap_get(&mut m, b"z", b"a"), ZmapGetResult::Found(b"11".to_vec()));
        assert_eq!(zmap_delete(&mut m, b"z", b"a"), ZmapDeleteResult::Ok);
        assert_eq!(zmap_len(&mut m, b"z"), Some(1));
    }

    #[test]
    fn add_rejects_existing_entry() {
        let mut m = manager();
        zmap_init(&mut m, b"z");
        zmap_add(&mut m, b"z", b"a", b"1".to_vec());
        assert_eq!(zmap_add(&mut m, b"z", b"a", b"2".to_vec()), ZmapAddResult::Exists);
        assert_eq!(zmap_get(&mut m, b"z", b"a"), ZmapGetResult::Found(b"1".to_vec()));
    }

    #[test]
    fn replace_requires_existing_entry() {
        let mut m = manager();
        zmap_init(&mut m, b"z");
        assert_eq!(
            zmap_replace(&mut m, b"z", b"a", b"1".to_vec()),
            ZmapReplaceResult::EntryNotFound
        );
    }

    #[test]
    fn delete_of_only_entry_leaves_length_zero() {
        let mut m = manager();
        zmap_init(&mut m, b"z");
        zmap_set(&mut m, b"z", b"a", b"1".to_vec());
        zmap_delete(&mut m, b"z", b"a");
        assert_eq!(zmap_len(&mut m, b"z"), Some(0));
    }

    #[test]
    fn numeric_delta_round_trips() {
        let mut m = manager();
        zmap_init(&mut m, b"z");
        zmap_set_numeric(&mut m, b"z", b"n", 10);
        assert_eq!(zmap_delta(&mut m, b"z", b"n", 5), ZmapDeltaResult::Ok(15));
        assert_eq!(zmap_delta(&mut m, b"z", b"n", -5), ZmapDeltaResult::Ok(10));
    }

    #[test]
    fn operations_on_missing_primary_key_are_not_found() {
        let mut m = manager();
        assert_eq!(zmap_len(&mut m, b"missing"), None);
        assert_eq!(zmap_get(&mut m, b"missing", b"a"), ZmapGetResult::NotFound);
        assert_eq!(
            zmap_set(&mut m, b"missing", b"a", b"1".to_vec()),
            ZmapSetResult::NotFound
        );
    }

    #[test]
    fn replace_in_place_preserves_other_entries_untouched() {
        let mut m = manager();
        zmap_init(&mut m, b"z");
        zmap_set(&mut m, b"z", b"a", b"1".to_vec());
        zmap_set(&mut m, b"z", b"b", b"22".to_vec());
        zmap_set(&mut m, b"z", b"c", b"3".to_vec());
        // "22" -> "9": same length, must go through replace_in_place, not a
        // delete-and-reinsert, so neighboring entries are untouched.
        assert_eq!(zmap_set(&mut m, b"z", b"b", b"9".to_vec()), ZmapSetResult::Ok);
        assert_eq!(zmap_get(&mut m, b"z", b"a"), ZmapGetResult::Found(b"1".to_vec()));
        assert_eq!(zmap_get(&mut m, b"z", b"b"), ZmapGetResult::Found(b"9".to_vec()));
        assert_eq!(zmap_get(&mut m, b"z", b"c"), ZmapGetResult::Found(b"3".to_vec()));
        assert_eq!(zmap_len(&mut m, b"z"), Some(3));
    }

    #[test]
    fn zipmap_spans_multiple_chain_nodes_and_survives_mutation() {
        let mut m = manager();
        assert!(zmap_init(&mut m, b"z"));
        // entry_size(nkey=2, nval=200) = 208 bytes; six of them (1248 bytes)
        // overflow the head node's ~975-byte capacity, forcing a second node.
        let value = vec![b'v'; 200];
        for i in 0..6u8 {
            let key = [b'k', i];
            assert_eq!(zmap_set(&mut m, b"z", &key, value.clone()), ZmapSetResult::Ok);
        }
        let head = m.get(b"z").unwrap();
        let node_count = m.chain_refs(head).len();
        m.remove(head);
        assert!(node_count >= 2, "expected a chained zipmap, got {node_count} node(s)");
        assert_eq!(zmap_len(&mut m, b"z"), Some(6));

        // "k0" is the first (and not last-in-node) entry of the head node:
        // exercises the shift-down-then-realloc-from-tail delete path.
        assert_eq!(zmap_delete(&mut m, b"z", &[b'k', 0]), ZmapDeleteResult::Ok);
        assert_eq!(zmap_len(&mut m, b"z"), Some(5));
        assert_eq!(zmap_get(&mut m, b"z", &[b'k', 0]), ZmapGetResult::EntryNotFound);
        for i in 1..6u8 {
            let key = [b'k', i];
            assert_eq!(zmap_get(&mut m, b"z", &key), ZmapGetResult::Found(value.clone()));
        }

        // Growing "k1" past its old slot forces the delete+reinsert fallback
        // across a (possibly different) node.
        let bigger = vec![b'w'; 400];
        assert_eq!(zmap_set(&mut m, b"z", &[b'k', 1], bigger.clone()), ZmapSetResult::Ok);
        assert_eq!(zmap_get(&mut m, b"z", &[b'k', 1]), ZmapGetResult::Found(bigger));
        assert_eq!(zmap_len(&mut m, b"z"), Some(5));
        for i in [2u8, 3, 4, 5] {
            let key = [b'k', i];
            assert_eq!(zmap_get(&mut m, b"z", &key), ZmapGetResult::Found(value.clone()));
        }
    }
}
