//! Sizing constants shared across the slab, item, and zipmap layers.
//!
//! These mirror `original_source/src/mem/cc_item.h`,
//! `original_source/src/mem/cc_slab.h`, and
//! `original_source/src/data_structure/cc_zipmap.h`. Chunks are not raw byte
//! buffers here (see DESIGN.md), but callers still need to reason about "how
//! many bytes would this item occupy" to pick a slab class, so these
//! constants stand in for the original's header `sizeof`s.

/// Logical overhead of an item header, used only for slab-class sizing math.
pub const ITEM_HDR_SIZE: usize = 48;

/// Size of the optional inline CAS value.
pub const CAS_SIZE: usize = 8;

/// Logical overhead of a slab header, used only for payload-capacity math.
/// 32 bytes matches spec.md §8's seeded scenario (`slab_size = 1056` = 32-byte
/// header + 1024 payload) exactly, so class-4 (1024-byte chunks) carves to
/// precisely one chunk per slab rather than leaving an unexplained remainder.
pub const SLAB_HDR_SIZE: usize = 32;

/// Highest usable slab class id; id 0 and 255 are reserved (0 unused here,
/// 255 is the chain sentinel), mirroring `SLABCLASS_MAX_ID` in `cc_slab.h`.
pub const SLABCLASS_MAX_ID: u8 = 254;

/// Bound on repeated same-slab collisions while growing a chain, per
/// spec.md §4.2 ("Bounded by MAX_NODE_TRIES").
pub const MAX_NODE_TRIES: u32 = 50;

/// Bound on eviction candidate probes (`T_lru` / `T_rand`), per spec.md
/// §4.1.1.
pub const EVICT_PROBE_MAX: usize = 50;

/// Minimum interval between slab-LRU touches for the same slab, per
/// spec.md §4.1 ("Slab touch policy").
pub const SLAB_TOUCH_INTERVAL_SECS: u32 = 1;

/// Zipmap header size: one `u32` entry count.
pub const ZMAP_HDR_SIZE: usize = 4;

/// Zipmap entry header size: `nval(u32) + nkey(u8) + npadding(u8) + flags(u8)`.
pub const ZMAP_ENTRY_HDR_SIZE: usize = 7;

/// Zipmap entries are padded out to a multiple of this many bytes.
pub const ZMAP_ALIGN: usize = 4;

/// Largest representable padding length (`npadding` is a single byte).
pub const ZMAP_PADDING_MAX: usize = 255;

/// Round `n` up to the next multiple of `ZMAP_ALIGN`.
pub const fn zmap_align_up(n: usize) -> usize {
    (n + ZMAP_ALIGN - 1) / ZMAP_ALIGN * ZMAP_ALIGN
}

/// `item_ntotal`: total logical size of an item given key/value lengths and
/// whether CAS is enabled. Used exclusively to classify which slab class an
/// item belongs to.
pub const fn item_ntotal(nkey: u8, nbyte: u32, use_cas: bool) -> usize {
    ITEM_HDR_SIZE + if use_cas { CAS_SIZE } else { 0 } + nkey as usize + nbyte as usize
}
