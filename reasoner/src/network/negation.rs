//! Negation (NOT-EXISTS) nodes (spec §4.3, §4.4 "MINUS lowers to a negation
//! node").
//!
//! Emits a left token iff no right token matches it under shared-variable
//! equality. Implemented as an anti-join: each left token carries a match
//! counter; the token is forwarded (ADD) the instant its counter drops to
//! zero, and withdrawn (REMOVE) the instant a matching right token arrives.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::fact::FactId;
use crate::intern::ValueId;
use crate::network::token::Token;

pub struct NegationNode {
    pub left_parent: crate::network::node::NodeId,
    pub right_parent: crate::network::node::NodeId,
    /// Variables shared between the left and right sub-patterns; a right
    /// token "matches" a left token iff they agree on all of these.
    pub join_vars: Vec<ValueId>,
    pub left_memory: IndexMap<Vec<FactId>, Token>,
    pub right_memory: IndexMap<Vec<FactId>, Token>,
    pub match_count: HashMap<Vec<FactId>, usize>,
}

impl NegationNode {
    pub fn new(left_parent: crate::network::node::NodeId, right_parent: crate::network::node::NodeId, join_vars: Vec<ValueId>) -> Self {
        Self {
            left_parent,
            right_parent,
            join_vars,
            left_memory: IndexMap::new(),
            right_memory: IndexMap::new(),
            match_count: HashMap::new(),
        }
    }

    pub fn matches(&self, left: &Token, right: &Token) -> bool {
        self.join_vars.iter().all(|var| match (left.bindings.get(var), right.bindings.get(var)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
    }

    pub fn count_matches(&self, left: &Token) -> usize {
        self.right_memory.values().filter(|r| self.matches(left, r)).count()
    }
}
