//! Alpha (constant-test) nodes (spec §4.3, GLOSSARY).
//!
//! An alpha node's only job is checking that a fact carries specific
//! constants in specific attributes. Because that check is a pure function
//! of one immutable fact, the node keeps no token memory of its own beyond
//! the set of fact ids currently satisfying it — tokens are reconstructed
//! on demand from the fact and the node's binding spec.

use indexmap::IndexSet;

use crate::fact::{Fact, FactId};
use crate::intern::{AttrId, ValueId};
use crate::network::token::{Bindings, Token};

pub struct AlphaNode {
    /// Conjunction of `attribute = constant` tests a fact must satisfy.
    pub tests: Vec<(AttrId, ValueId)>,
    /// Attributes to project into the token's binding map, tagged with the
    /// REQL variable name that should receive each one.
    pub bind: Vec<(ValueId, AttrId)>,
    pub memory: IndexSet<FactId>,
}

impl AlphaNode {
    pub fn new(tests: Vec<(AttrId, ValueId)>, bind: Vec<(ValueId, AttrId)>) -> Self {
        Self {
            tests,
            bind,
            memory: IndexSet::new(),
        }
    }

    pub fn matches(&self, fact: &Fact) -> bool {
        if !self.tests.iter().all(|(a, v)| fact.get(*a) == Some(*v)) {
            return false;
        }
        // A variable bound twice in the same triple (e.g. `?x knows ?x`)
        // requires the two attributes to agree, not just the later one to
        // silently win in the binding map.
        for i in 0..self.bind.len() {
            for j in (i + 1)..self.bind.len() {
                let (var_i, attr_i) = self.bind[i];
                let (var_j, attr_j) = self.bind[j];
                if var_i == var_j && fact.get(attr_i) != fact.get(attr_j) {
                    return false;
                }
            }
        }
        true
    }

    pub fn extract_token(&self, fact: &Fact, seq: u64) -> Token {
        let mut bindings = Bindings::new();
        for (var, attr) in &self.bind {
            if let Some(v) = fact.get(*attr) {
                bindings.insert(*var, v);
            }
        }
        Token::new(vec![fact.id], bindings, seq)
    }

    /// Structural fingerprint used to reuse existing fragments (spec §4.4
    /// step 4, "existing sub-fragments matching a structural fingerprint are
    /// reused"). Must include `bind` as well as `tests`: two patterns with
    /// the same constant tests but different variable projections (e.g. one
    /// binding `?a` to `sub` and the other binding `?a` to `sup`) are
    /// different fragments and must not collapse onto the same node.
    pub fn fingerprint(&self) -> Vec<(u32, u32, u32)> {
        let mut tests: Vec<(u32, u32, u32)> = self
            .tests
            .iter()
            .map(|(a, v)| (0, lasso::Key::into_usize(*a) as u32, lasso::Key::into_usize(*v) as u32))
            .collect();
        let binds = self
            .bind
            .iter()
            .map(|(var, a)| (1, lasso::Key::into_usize(*a) as u32, lasso::Key::into_usize(*var) as u32));
        tests.extend(binds);
        tests.sort_unstable();
        tests
    }
}
