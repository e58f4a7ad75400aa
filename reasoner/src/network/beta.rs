//! Beta (join) nodes (spec §4.3).
//!
//! A beta node has a left parent (a prior token stream) and a right parent
//! (an alpha stream or another beta). It keeps both sides' tokens in
//! per-node memories, keyed by the contributing fact tuple, and emits a
//! composite token whenever a left and a right token agree on every
//! variable bound by both ("join semantics", spec §4.3).

use indexmap::IndexMap;

use crate::fact::FactId;
use crate::network::token::Token;

pub struct BetaNode {
    pub left_parent: crate::network::node::NodeId,
    pub right_parent: crate::network::node::NodeId,
    pub left_memory: IndexMap<Vec<FactId>, Token>,
    pub right_memory: IndexMap<Vec<FactId>, Token>,
    /// Composite tokens currently emitted, keyed by the pair of contributing
    /// (left, right) fact tuples — this pairing, not the combined fact set,
    /// is the node's notion of identity.
    pub own_memory: IndexMap<(Vec<FactId>, Vec<FactId>), Token>,
}

impl BetaNode {
    pub fn new(left_parent: crate::network::node::NodeId, right_parent: crate::network::node::NodeId) -> Self {
        Self {
            left_parent,
            right_parent,
            left_memory: IndexMap::new(),
            right_memory: IndexMap::new(),
            own_memory: IndexMap::new(),
        }
    }

    /// Tries to join a freshly-arrived left token against every token
    /// currently in the right memory. Returns the newly composed tokens.
    pub fn join_new_left(&self, left: &Token, next_seq: &mut u64) -> Vec<((Vec<FactId>, Vec<FactId>), Token)> {
        let mut out = Vec::new();
        for right in self.right_memory.values() {
            if let Some(joined) = left.join(right, *next_seq) {
                *next_seq += 1;
                out.push(((left.facts.clone(), right.facts.clone()), joined));
            }
        }
        out
    }

    pub fn join_new_right(&self, right: &Token, next_seq: &mut u64) -> Vec<((Vec<FactId>, Vec<FactId>), Token)> {
        let mut out = Vec::new();
        for left in self.left_memory.values() {
            if let Some(joined) = left.join(right, *next_seq) {
                *next_seq += 1;
                out.push(((left.facts.clone(), right.facts.clone()), joined));
            }
        }
        out
    }
}

