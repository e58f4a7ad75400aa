//! Entity Accumulator (C2, spec §4.2).
//!
//! Active only between `begin_entity_accumulation()` and
//! `end_entity_accumulation()`. While active, facts sharing a canonical
//! entity id are merged attribute-by-attribute instead of becoming distinct
//! facts; `end_entity_accumulation()` flushes one consolidated fact per
//! entity into the fact store.

use indexmap::IndexMap;
use tracing::warn;

use crate::intern::{AttrId, Interner, ValueId};

/// Per-attribute merge policy (spec §3 "Entity").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// First write wins. A later write with an equal value is a no-op; a
    /// later write with a conflicting value is rejected and logged.
    SingleValue,
    /// Comma-joined ordered union of distinct values, in first-seen order.
    CollectAll,
    /// Any `true` value wins, permanently, for the life of the entity.
    BooleanOr,
    /// Keeps the numerically largest value seen. Non-numeric values are
    /// rejected and logged.
    MaxNumeric,
    /// Last write wins unconditionally.
    Replace,
}

#[derive(Clone, Debug)]
enum AccumulatedValue {
    Single(ValueId),
    Collected(Vec<ValueId>),
}

struct EntityRecord {
    /// Attributes that do not participate in merging (e.g. the entity-id
    /// attribute itself), carried through verbatim from first sight.
    passthrough: Vec<(AttrId, ValueId)>,
    merged: IndexMap<AttrId, AccumulatedValue>,
}

/// Accumulates facts keyed by a canonical entity id between
/// `begin`/`end`, merging per-attribute by the configured [`MergeStrategy`].
pub struct EntityAccumulator {
    /// The attribute whose value identifies the entity (typically
    /// `individual` or `subject`).
    entity_key: AttrId,
    strategies: IndexMap<AttrId, MergeStrategy>,
    entities: IndexMap<ValueId, EntityRecord>,
    active: bool,
}

impl EntityAccumulator {
    pub fn new(entity_key: AttrId) -> Self {
        Self {
            entity_key,
            strategies: IndexMap::new(),
            entities: IndexMap::new(),
            active: false,
        }
    }

    pub fn set_strategy(&mut self, attr: AttrId, strategy: MergeStrategy) {
        self.strategies.insert(attr, strategy);
    }

    pub fn begin(&mut self) {
        self.active = true;
        self.entities.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Routes one fact's attribute map through the accumulator. Returns
    /// `true` if the fact was absorbed (accumulation active), `false` if the
    /// caller should fall through to a direct `FactStore::add`.
    pub fn accumulate(&mut self, attrs: &[(AttrId, ValueId)], interner: &Interner) -> bool {
        if !self.active {
            return false;
        }
        let Some(&(_, entity_id)) = attrs.iter().find(|(a, _)| *a == self.entity_key) else {
            return false;
        };

        let record = self.entities.entry(entity_id).or_insert_with(|| EntityRecord {
            passthrough: Vec::new(),
            merged: IndexMap::new(),
        });

        for &(attr, value) in attrs {
            if attr == self.entity_key {
                continue;
            }
            let strategy = self.strategies.get(&attr).copied().unwrap_or(MergeStrategy::Replace);
            merge_one(record, attr, value, strategy, interner);
        }
        if record.passthrough.iter().all(|(a, _)| *a != self.entity_key) {
            record.passthrough.push((self.entity_key, entity_id));
        }
        true
    }

    /// Flushes every accumulated entity to its consolidated attribute map
    /// and clears accumulator state. Each returned `Vec` is ready to hand to
    /// `FactStore::add`.
    pub fn end(&mut self) -> Vec<Vec<(AttrId, ValueId)>> {
        self.active = false;
        let mut out = Vec::with_capacity(self.entities.len());
        for (_, record) in self.entities.drain(..) {
            let mut attrs = record.passthrough;
            for (attr, value) in record.merged {
                match value {
                    AccumulatedValue::Single(v) => attrs.push((attr, v)),
                    AccumulatedValue::Collected(vs) => {
                        attrs.push((attr, vs[0]));
                        // Additional collected members beyond the first are
                        // represented by repeating the attribute; FactStore
                        // dedups exact (attr, value) pairs so each distinct
                        // member survives as its own pair.
                        for v in &vs[1..] {
                            attrs.push((attr, *v));
                        }
                    }
                }
            }
            out.push(attrs);
        }
        out
    }
}

fn merge_one(
    record: &mut EntityRecord,
    attr: AttrId,
    value: ValueId,
    strategy: MergeStrategy,
    interner: &Interner,
) {
    match strategy {
        MergeStrategy::SingleValue => match record.merged.get(&attr) {
            None => {
                record.merged.insert(attr, AccumulatedValue::Single(value));
            }
            Some(AccumulatedValue::Single(existing)) if *existing == value => {}
            Some(AccumulatedValue::Single(existing)) => {
                warn!(
                    attr = interner.resolve(attr),
                    existing = interner.resolve(*existing),
                    rejected = interner.resolve(value),
                    "SINGLE_VALUE merge conflict, keeping first write"
                );
            }
            Some(AccumulatedValue::Collected(_)) => unreachable!("strategy is fixed per attr"),
        },
        MergeStrategy::Replace => {
            record.merged.insert(attr, AccumulatedValue::Single(value));
        }
        MergeStrategy::BooleanOr => {
            let is_true = interner.resolve(value) == "true";
            match record.merged.get(&attr) {
                Some(AccumulatedValue::Single(existing)) if interner.resolve(*existing) == "true" => {}
                _ => {
                    if is_true {
                        record.merged.insert(attr, AccumulatedValue::Single(value));
                    } else {
                        record.merged.entry(attr).or_insert(AccumulatedValue::Single(value));
                    }
                }
            }
        }
        MergeStrategy::MaxNumeric => {
            let candidate: Option<f64> = interner.resolve(value).parse().ok();
            match (record.merged.get(&attr), candidate) {
                (_, None) => {
                    warn!(attr = interner.resolve(attr), value = interner.resolve(value), "MAX_NUMERIC merge saw non-numeric value, ignoring");
                }
                (None, Some(_)) => {
                    record.merged.insert(attr, AccumulatedValue::Single(value));
                }
                (Some(AccumulatedValue::Single(existing)), Some(c)) => {
                    let current: f64 = interner.resolve(*existing).parse().unwrap_or(f64::MIN);
                    if c > current {
                        record.merged.insert(attr, AccumulatedValue::Single(value));
                    }
                }
                (Some(AccumulatedValue::Collected(_)), _) => unreachable!("strategy is fixed per attr"),
            }
        }
        MergeStrategy::CollectAll => {
            match record.merged.entry(attr).or_insert_with(|| AccumulatedValue::Collected(Vec::new())) {
                AccumulatedValue::Collected(vs) => {
                    if !vs.contains(&value) {
                        vs.push(value);
                    }
                }
                AccumulatedValue::Single(_) => unreachable!("strategy is fixed per attr"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_value_keeps_first_write() {
        let mut i = Interner::new();
        let entity = i.intern("individual");
        let name = i.intern("name");
        let mut acc = EntityAccumulator::new(entity);
        acc.set_strategy(name, MergeStrategy::SingleValue);
        acc.begin();

        let felix = i.intern("Felix");
        let rex = i.intern("Rex");
        let cat = i.intern("cat1");
        acc.accumulate(&[(entity, cat), (name, felix)], &i);
        acc.accumulate(&[(entity, cat), (name, rex)], &i);

        let flushed = acc.end();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].contains(&(name, felix)));
        assert!(!flushed[0].contains(&(name, rex)));
    }

    #[test]
    fn collect_all_unions_distinct_values() {
        let mut i = Interner::new();
        let entity = i.intern("individual");
        let tag = i.intern("tag");
        let mut acc = EntityAccumulator::new(entity);
        acc.set_strategy(tag, MergeStrategy::CollectAll);
        acc.begin();

        let cat = i.intern("cat1");
        let a = i.intern("fluffy");
        let b = i.intern("orange");
        acc.accumulate(&[(entity, cat), (tag, a)], &i);
        acc.accumulate(&[(entity, cat), (tag, b)], &i);
        acc.accumulate(&[(entity, cat), (tag, a)], &i);

        let flushed = acc.end();
        let tags: Vec<_> = flushed[0].iter().filter(|(k, _)| *k == tag).map(|(_, v)| *v).collect();
        assert_eq!(tags, vec![a, b]);
    }

    #[test]
    fn max_numeric_keeps_largest() {
        let mut i = Interner::new();
        let entity = i.intern("individual");
        let score = i.intern("score");
        let mut acc = EntityAccumulator::new(entity);
        acc.set_strategy(score, MergeStrategy::MaxNumeric);
        acc.begin();

        let cat = i.intern("cat1");
        let five = i.intern("5");
        let nine = i.intern("9");
        acc.accumulate(&[(entity, cat), (score, five)], &i);
        acc.accumulate(&[(entity, cat), (score, nine)], &i);

        let flushed = acc.end();
        assert!(flushed[0].contains(&(score, nine)));
    }
}
