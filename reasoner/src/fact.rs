//! Fact Store (C1, spec §4.1).
//!
//! Owns every fact in the network, keyed by a dense 64-bit id. Facts are
//! stored as a sorted array of `(AttrId, ValueId)` pairs (see [`crate::intern`]):
//! content hashing for duplicate detection and attribute lookup both become
//! cheap array operations instead of general hash-map traffic per fact.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use indexmap::IndexSet;
use lasso::Key;

use crate::intern::{AttrId, ValueId};

pub type FactId = u64;
pub type SourceId = ValueId;

/// A single fact: an attribute map plus provenance bookkeeping (spec §3).
#[derive(Clone, Debug)]
pub struct Fact {
    pub id: FactId,
    /// Sorted by `(AttrId, ValueId)`; no duplicate attribute names.
    pub attrs: Vec<(AttrId, ValueId)>,
    pub sources: Vec<SourceId>,
    pub seq: u64,
    pub inferred: bool,
    pub inferred_by: Option<String>,
    /// Ids of the facts that support this inference (empty for asserted facts).
    pub support: Vec<FactId>,
}

impl Fact {
    pub fn get(&self, attr: AttrId) -> Option<ValueId> {
        self.attrs
            .iter()
            .find(|(a, _)| *a == attr)
            .map(|(_, v)| *v)
    }

    pub fn has(&self, attr: AttrId, value: ValueId) -> bool {
        self.get(attr) == Some(value)
    }
}

fn sort_key(id: AttrId) -> usize {
    id.into_usize()
}

fn content_fingerprint(attrs: &[(AttrId, ValueId)]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (a, v) in attrs {
        a.into_usize().hash(&mut hasher);
        v.into_usize().hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Default)]
pub struct FactStore {
    facts: Vec<Option<Fact>>,
    fingerprint_index: HashMap<u64, Vec<FactId>>,
    attr_index: HashMap<(AttrId, ValueId), IndexSet<FactId>>,
    indexed_attrs: IndexSet<AttrId>,
    source_index: HashMap<SourceId, IndexSet<FactId>>,
    next_id: FactId,
    seq_counter: u64,
    live_count: usize,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an attribute name as high-selectivity: facts carrying it get an
    /// inverted `(attr, value) -> {fact ids}` entry. Spec §4.1 names the
    /// minimal configured set: `type`, `concept`, `individual`, `subject`,
    /// `role`, `property`.
    pub fn index_attribute(&mut self, attr: AttrId) {
        self.indexed_attrs.insert(attr);
    }

    pub fn is_indexed(&self, attr: AttrId) -> bool {
        self.indexed_attrs.contains(&attr)
    }

    fn next_fact_id(&mut self) -> FactId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Inserts a fact, deduplicating on exact attribute-map equality.
    /// Returns `(id, true)` when a new fact was created, or the existing
    /// fact's id with `false` on an exact duplicate (spec §3, §7
    /// `DuplicateFact`).
    pub fn add(&mut self, mut attrs: Vec<(AttrId, ValueId)>) -> (FactId, bool) {
        attrs.sort_unstable_by_key(|(a, v)| (sort_key(*a), sort_key(*v)));
        attrs.dedup();

        let fp = content_fingerprint(&attrs);
        if let Some(candidates) = self.fingerprint_index.get(&fp) {
            for &cand in candidates {
                if let Some(Some(existing)) = self.facts.get(cand as usize) {
                    if existing.attrs == attrs {
                        return (cand, false);
                    }
                }
            }
        }

        let id = self.next_fact_id();
        let seq = self.seq_counter;
        self.seq_counter += 1;

        for &(a, v) in &attrs {
            if self.indexed_attrs.contains(&a) {
                self.attr_index.entry((a, v)).or_default().insert(id);
            }
        }

        let fact = Fact {
            id,
            attrs,
            sources: Vec::new(),
            seq,
            inferred: false,
            inferred_by: None,
            support: Vec::new(),
        };

        if (id as usize) == self.facts.len() {
            self.facts.push(Some(fact));
        } else {
            // next_id is monotone, so this only happens if a hole exists;
            // grow the dense array to keep indices == ids.
            self.facts.resize_with(id as usize + 1, || None);
            self.facts[id as usize] = Some(fact);
        }

        self.fingerprint_index.entry(fp).or_default().push(id);
        self.live_count += 1;
        (id, true)
    }

    pub fn attach_source(&mut self, id: FactId, source: SourceId) {
        if let Some(Some(fact)) = self.facts.get_mut(id as usize) {
            if !fact.sources.contains(&source) {
                fact.sources.push(source);
            }
        }
        self.source_index.entry(source).or_default().insert(id);
    }

    /// Drops `source`'s tag from `id` without touching the fact itself.
    /// Returns the number of sources remaining on the fact (spec §3,
    /// §8-invariant-2: a fact asserted by two sources survives either
    /// source's retraction and is only deleted once every source that
    /// contributed it has been removed).
    pub fn detach_source(&mut self, id: FactId, source: SourceId) -> usize {
        if let Some(set) = self.source_index.get_mut(&source) {
            set.shift_remove(&id);
            if set.is_empty() {
                self.source_index.remove(&source);
            }
        }
        if let Some(Some(fact)) = self.facts.get_mut(id as usize) {
            fact.sources.retain(|&s| s != source);
            fact.sources.len()
        } else {
            0
        }
    }

    pub fn mark_inferred(&mut self, id: FactId, rule_name: &str, support: Vec<FactId>) {
        if let Some(Some(fact)) = self.facts.get_mut(id as usize) {
            fact.inferred = true;
            fact.inferred_by = Some(rule_name.to_string());
            fact.support = support;
        }
    }

    pub fn get(&self, id: FactId) -> Option<&Fact> {
        self.facts.get(id as usize).and_then(|f| f.as_ref())
    }

    /// Inference depth of `id`: `0` for an asserted fact (or one with no
    /// recorded support), otherwise `1 + max(depth of its support facts)`.
    /// Used by the transitive-closure rules (spec §9 Open Question 3,
    /// `SPEC_FULL.md` §E4) to enforce the hard depth cap. Recursion is
    /// bounded defensively at 64 in case support ever formed a cycle.
    pub fn depth(&self, id: FactId) -> u32 {
        self.depth_bounded(id, 64)
    }

    fn depth_bounded(&self, id: FactId, budget: u32) -> u32 {
        if budget == 0 {
            return 0;
        }
        match self.get(id) {
            None => 0,
            Some(fact) if fact.support.is_empty() => 0,
            Some(fact) => 1 + fact.support.iter().map(|&s| self.depth_bounded(s, budget - 1)).max().unwrap_or(0),
        }
    }

    /// Removes a fact from the store's bookkeeping. The caller (the
    /// `Network`) is responsible for retracting it from the discrimination
    /// network *before* calling this (spec §4.1: "retracts from network
    /// first, then deletes").
    pub fn remove_by_id(&mut self, id: FactId) -> Option<Fact> {
        let slot = self.facts.get_mut(id as usize)?;
        let fact = slot.take()?;

        let fp = content_fingerprint(&fact.attrs);
        if let Some(v) = self.fingerprint_index.get_mut(&fp) {
            v.retain(|&x| x != id);
            if v.is_empty() {
                self.fingerprint_index.remove(&fp);
            }
        }

        for &(a, v) in &fact.attrs {
            if let Some(set) = self.attr_index.get_mut(&(a, v)) {
                set.shift_remove(&id);
                if set.is_empty() {
                    self.attr_index.remove(&(a, v));
                }
            }
        }

        for &src in &fact.sources {
            if let Some(set) = self.source_index.get_mut(&src) {
                set.shift_remove(&id);
                if set.is_empty() {
                    self.source_index.remove(&src);
                }
            }
        }

        self.live_count -= 1;
        Some(fact)
    }

    pub fn remove_source_ids(&self, source: SourceId) -> Vec<FactId> {
        self.source_index
            .get(&source)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iterate(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().filter_map(|f| f.as_ref())
    }

    pub fn index_by_attribute(&self, attr: AttrId, value: ValueId) -> Vec<FactId> {
        self.attr_index
            .get(&(attr, value))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn next_id_hint(&self) -> FactId {
        self.next_id
    }

    /// Used by persistence materialize/eager-load to restore a store whose
    /// ids must match exactly what the journal/snapshot recorded.
    pub(crate) fn restore(&mut self, fact: Fact, next_id_floor: FactId) {
        let id = fact.id;
        if (id as usize) >= self.facts.len() {
            self.facts.resize_with(id as usize + 1, || None);
        }
        let fp = content_fingerprint(&fact.attrs);
        for &(a, v) in &fact.attrs {
            if self.indexed_attrs.contains(&a) {
                self.attr_index.entry((a, v)).or_default().insert(id);
            }
        }
        for &src in &fact.sources {
            self.source_index.entry(src).or_default().insert(id);
        }
        self.fingerprint_index.entry(fp).or_default().push(id);
        self.live_count += 1;
        self.seq_counter = self.seq_counter.max(fact.seq + 1);
        self.facts[id as usize] = Some(fact);
        self.next_id = self.next_id.max(next_id_floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    fn attrs(i: &mut Interner, pairs: &[(&str, &str)]) -> Vec<(AttrId, ValueId)> {
        pairs
            .iter()
            .map(|(a, v)| (i.intern(a), i.intern(v)))
            .collect()
    }

    #[test]
    fn add_is_idempotent() {
        let mut interner = Interner::new();
        let mut store = FactStore::new();
        let a = attrs(&mut interner, &[("type", "instance_of"), ("individual", "Felix")]);
        let (id1, added1) = store.add(a.clone());
        let (id2, added2) = store.add(a);
        assert!(added1);
        assert!(!added2);
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_source_cascades() {
        let mut interner = Interner::new();
        let mut store = FactStore::new();
        let src = interner.intern("source1");
        let a = attrs(&mut interner, &[("type", "instance_of"), ("individual", "Felix")]);
        let (id, _) = store.add(a);
        store.attach_source(id, src);
        let ids = store.remove_source_ids(src);
        assert_eq!(ids, vec![id]);
        store.remove_by_id(id);
        assert_eq!(store.len(), 0);
    }
}
