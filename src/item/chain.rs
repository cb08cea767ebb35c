//! Pure helpers for chained-item bookkeeping. Traversal that needs storage
//! access lives on `ItemManager` in `manager.rs`; this module holds the
//! parts that don't.

use crate::consts::MAX_NODE_TRIES;
use crate::slab::ItemRef;

use super::header::Item;

/// Counts down same-slab collisions while growing a chain. Spec §4.2:
/// "Bounded by MAX_NODE_TRIES (≤ 50): if repeated allocation attempts keep
/// yielding a chunk already in the forming chain, alloc fails."
pub struct NodeBudget {
    tries_left: u32,
}

impl NodeBudget {
    pub fn new() -> Self {
        Self {
            tries_left: MAX_NODE_TRIES,
        }
    }

    /// Record a collision; returns `false` once the budget is exhausted.
    pub fn collide(&mut self) -> bool {
        if self.tries_left == 0 {
            return false;
        }
        self.tries_left -= 1;
        self.tries_left > 0
    }
}

impl Default for NodeBudget {
    fn default() -> Self {
        Self::new()
    }
}

/// How many additional max-class nodes are needed to hold `remaining` bytes.
pub fn nodes_needed(remaining: usize, max_class_size: usize) -> usize {
    if remaining == 0 {
        0
    } else {
        remaining.div_ceil(max_class_size)
    }
}

/// Invariant check (spec §8, universal invariant 3 & 4): every node's `head`
/// pointer equals the chain head, and only the head has a non-zero key
/// length.
pub fn chain_invariants_hold(head_ref: ItemRef, nodes: &[&Item]) -> bool {
    nodes.iter().enumerate().all(|(i, node)| {
        let head_ok = node.head == Some(head_ref);
        let key_ok = if i == 0 {
            true
        } else {
            node.key.is_empty()
        };
        head_ok && key_ok
    })
}
