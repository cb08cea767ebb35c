//! Item header and the per-operation result enums (spec §4.2, §6).

use crate::slab::ItemRef;

/// Structural flags, exposed as a struct of booleans rather than a packed
/// bitmask (spec §9: "the public contract is nominal").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFlags {
    pub linked: bool,
    pub has_cas: bool,
    pub in_freeq: bool,
    pub right_aligned: bool,
    pub chained: bool,
}

/// One node of a (possibly chained) item. Only the head node carries a
/// non-empty key and is registered in the hash index.
#[derive(Debug, Clone)]
pub struct Item {
    pub last_access: u32,
    pub exptime: u32,
    pub nbyte: u32,
    pub refcount: u32,
    pub flags: ItemFlags,
    pub class: u8,
    pub key: Box<[u8]>,
    pub value: Vec<u8>,
    pub cas: u64,
    pub next_node: Option<ItemRef>,
    pub head: Option<ItemRef>,
    pub myref: ItemRef,
}

impl Item {
    pub fn nkey(&self) -> u8 {
        self.key.len() as u8
    }

    pub fn is_head(&self) -> bool {
        !self.flags.chained || self.head == Some(self.myref)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    Ok,
    Exists,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Ok,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceResult {
    Ok,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnexResult {
    Ok,
    NotFound,
    Oversized,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaResult {
    Ok,
    NotFound,
    NonNumeric,
    Overflow,
    Chained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Ok,
    NotFound,
}
