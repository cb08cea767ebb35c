//! Crate-wide error type.
//!
//! Per-operation outcomes (CAS mismatch, key not found, oversized request,
//! …) are *not* routed through this type — each operation returns its own
//! discriminated result enum (see `item` and `zipmap`), so unrelated
//! outcomes are never collapsed into one code. `CacheError` exists only for
//! the "programmer" class of failure from the spec: invalid configuration,
//! detected once at start-up and meant to be fatal.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
