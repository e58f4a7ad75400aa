//! Union-find over individual names, backing `same_as` handling (spec §4.3
//! "Same-as handling", §9 "Equality (`same_as`)").

use std::collections::HashMap;

use crate::intern::ValueId;

#[derive(Default)]
pub struct UnionFind {
    parent: HashMap<ValueId, ValueId>,
    rank: HashMap<ValueId, u32>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&mut self, x: ValueId) {
        self.parent.entry(x).or_insert(x);
        self.rank.entry(x).or_insert(0);
    }

    pub fn find(&mut self, x: ValueId) -> ValueId {
        self.ensure(x);
        let parent = self.parent[&x];
        if parent == x {
            return x;
        }
        let root = self.find(parent);
        self.parent.insert(x, root);
        root
    }

    /// Non-mutating lookup for read-heavy call sites that can't take `&mut
    /// self` (e.g. α-index canonicalization during a query). Does not path
    /// compress.
    pub fn representative(&self, x: ValueId) -> ValueId {
        let mut cur = x;
        while let Some(&p) = self.parent.get(&cur) {
            if p == cur {
                break;
            }
            cur = p;
        }
        cur
    }

    /// Merges the classes of `a` and `b`. Returns `true` if they were
    /// previously distinct (a real merge happened).
    pub fn union(&mut self, a: ValueId, b: ValueId) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        let rank_a = self.rank[&ra];
        let rank_b = self.rank[&rb];
        match rank_a.cmp(&rank_b) {
            std::cmp::Ordering::Less => {
                self.parent.insert(ra, rb);
            }
            std::cmp::Ordering::Greater => {
                self.parent.insert(rb, ra);
            }
            std::cmp::Ordering::Equal => {
                self.parent.insert(rb, ra);
                self.rank.insert(ra, rank_a + 1);
            }
        }
        true
    }

    /// All members sharing `x`'s class (including `x`).
    pub fn class_members(&self, x: ValueId) -> Vec<ValueId> {
        let root = self.representative(x);
        self.parent
            .keys()
            .filter(|&&k| self.representative(k) == root)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn union_merges_and_finds_converge() {
        let mut i = Interner::new();
        let a = i.intern("Alice");
        let b = i.intern("Alicia");
        let c = i.intern("A.");
        let mut uf = UnionFind::new();
        assert!(uf.union(a, b));
        assert!(uf.union(b, c));
        assert_eq!(uf.find(a), uf.find(c));
        assert!(!uf.union(a, c));
    }
}
