//! Tokens: the unit of currency flowing through the discrimination network
//! (spec §3 "Token", GLOSSARY).

use indexmap::IndexMap;

use crate::fact::FactId;
use crate::intern::ValueId;

/// variable name (interned) -> bound value (interned).
pub type Bindings = IndexMap<ValueId, ValueId>;

/// An ordered tuple of facts plus the binding map they jointly produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub facts: Vec<FactId>,
    pub bindings: Bindings,
    /// Insertion sequence, used to tie-break otherwise-indistinguishable
    /// tokens (spec §4.3 "Join semantics").
    pub seq: u64,
}

impl Token {
    pub fn new(facts: Vec<FactId>, bindings: Bindings, seq: u64) -> Self {
        Self { facts, bindings, seq }
    }

    /// Identity within a node's memory: the exact fact tuple.
    pub fn key(&self) -> &[FactId] {
        &self.facts
    }

    /// Merges `self` with `other` over shared variables, returning `None` if
    /// any shared variable disagrees (spec §4.3: "equal as strings", which
    /// for us means equal interned ids).
    pub fn join(&self, other: &Token, next_seq: u64) -> Option<Token> {
        let mut bindings = self.bindings.clone();
        for (var, val) in &other.bindings {
            match bindings.get(var) {
                Some(existing) if existing != val => return None,
                Some(_) => {}
                None => {
                    bindings.insert(*var, *val);
                }
            }
        }
        let mut facts = self.facts.clone();
        for f in &other.facts {
            if !facts.contains(f) {
                facts.push(*f);
            }
        }
        Some(Token::new(facts, bindings, next_seq))
    }
}

/// The polarity of a propagation message (spec §4.3 "Propagation protocol").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Add,
    Remove,
}
