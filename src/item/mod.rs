//! Item manager: header/flags, CRUD, annex, delta, and chained-item support
//! (spec §4.2).

pub mod annex;
pub mod chain;
pub mod delta;
pub mod header;
pub mod manager;

pub use header::{
    AddResult, AnnexResult, CasResult, DeleteResult, DeltaResult, Item, ItemFlags, ReplaceResult,
};
pub use manager::ItemManager;
