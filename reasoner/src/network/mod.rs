//! Discrimination network (C3, spec §4.3).
//!
//! A DAG of six node kinds (root, α, β, negation, filter, production)
//! propagating `(token, polarity)` messages to quiescence on every
//! top-level `add_fact`/`remove_by_id`/`remove_source` call. See the
//! per-kind modules for the node protocols and [`token`] for the message
//! shape itself.

pub mod agenda;
pub mod alpha;
pub mod beta;
pub mod filter;
pub mod negation;
pub mod node;
pub mod production;
pub mod token;
pub mod unionfind;

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::entity::EntityAccumulator;
use crate::error::EngineError;
use crate::fact::{Fact, FactId, FactStore, SourceId};
use crate::intern::{AttrId, Interner, ValueId};
use crate::network::agenda::{Agenda, AgendaItem};
use crate::network::alpha::AlphaNode;
use crate::network::beta::BetaNode;
use crate::network::filter::{FilterNode, Predicate};
use crate::network::negation::NegationNode;
use crate::network::node::{Node, NodeId, NodeKind};
use crate::network::production::{LiveChange, ProductionNode, ProductionSink, RuleAction};
use crate::network::token::{Polarity, Token};
use crate::network::unionfind::UnionFind;

/// Sentinel returned by `add_fact`/`add_fact_with_source` while entity
/// accumulation is active: the real fact id is not allocated until
/// `end_entity_accumulation()` flushes the consolidated entity (see
/// `SPEC_FULL.md` §E4 — an Open Question the source left unspecified).
pub const PENDING_FACT_ID: FactId = FactId::MAX;

#[derive(Default, Clone, Copy, Debug)]
pub struct NetworkStats {
    pub fact_count: usize,
    pub node_count: usize,
    pub production_count: usize,
    pub propagations: u64,
}

pub struct Network {
    pub interner: Interner,
    pub facts: FactStore,
    pub entities: EntityAccumulator,
    pub union_find: UnionFind,
    nodes: IndexMap<NodeId, Node>,
    next_node_id: NodeId,
    next_seq: u64,
    /// Alpha nodes indexed by their first constant test, for O(1) dispatch
    /// from a newly-asserted fact (spec §4.3 "α … node").
    root_dispatch: HashMap<(AttrId, ValueId), Vec<NodeId>>,
    alpha_fingerprints: HashMap<Vec<(u32, u32, u32)>, NodeId>,
    /// cache key (canonical query string) -> production node (spec §4.3
    /// "Production caching").
    cache: HashMap<String, NodeId>,
    agenda: Agenda,
    /// inferred fact id -> the distinct support tuples currently backing it.
    inference_support: HashMap<FactId, IndexSet<Vec<FactId>>>,
    /// supporting fact id -> inferred facts that depend on it, for cascade
    /// retraction (spec §8 invariant 3, scenario (f)).
    support_index: HashMap<FactId, IndexSet<FactId>>,
    stats: NetworkStats,
    /// Set by [`crate::persistence`]'s lazy loader; any mutating call
    /// transparently promotes the network to fully eager first (spec §4.7
    /// "`materialize()` promotes a lazy network to eager").
    pub(crate) lazy: Option<crate::persistence::lazy::LazySnapshot>,
}

impl Network {
    pub fn new() -> Self {
        let mut interner = Interner::new();
        let individual = interner.intern("individual");
        let mut facts = FactStore::new();
        for attr in ["type", "concept", "individual", "subject", "role", "property"] {
            let id = interner.intern(attr);
            facts.index_attribute(id);
        }
        let mut net = Self {
            interner,
            facts,
            entities: EntityAccumulator::new(individual),
            union_find: UnionFind::new(),
            nodes: IndexMap::new(),
            next_node_id: 0,
            next_seq: 0,
            root_dispatch: HashMap::new(),
            alpha_fingerprints: HashMap::new(),
            cache: HashMap::new(),
            agenda: Agenda::new(),
            inference_support: HashMap::new(),
            support_index: HashMap::new(),
            stats: NetworkStats::default(),
            lazy: None,
        };
        crate::rules::install_static_rules(&mut net);
        net
    }

    /// Promotes a lazily-opened network to fully eager by replaying every
    /// row of the mapped snapshot through the ordinary fact-ingress path.
    /// A no-op if the network isn't lazy.
    pub fn materialize(&mut self) -> Result<(), EngineError> {
        let Some(snapshot) = self.lazy.take() else {
            return Ok(());
        };
        let rows = snapshot.rows_for_materialize()?;
        crate::persistence::snapshot::replay_into(self, &rows)
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy.is_some()
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn interner_mut(&mut self) -> &mut Interner {
        &mut self.interner
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            fact_count: self.facts.len(),
            node_count: self.nodes.len(),
            production_count: self.stats.production_count,
            propagations: self.stats.propagations,
        }
    }

    // ---- query cache (spec §4.3 "Production caching") ----

    pub fn cached_production(&self, cache_key: &str) -> Option<NodeId> {
        self.cache.get(cache_key).copied()
    }

    pub fn cache_production(&mut self, cache_key: String, node: NodeId) {
        self.cache.insert(cache_key, node);
    }

    pub fn uncache(&mut self, cache_key: &str) -> bool {
        self.cache.remove(cache_key).is_some()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn production_node(&self, id: NodeId) -> Option<&ProductionNode> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::Production(p) => Some(p),
            _ => None,
        }
    }

    // ---- node construction (spec §4.4 "Fragment construction") ----

    fn alloc_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn connect(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.add_child(child);
        }
    }

    /// Gets an existing α node with the same test conjunction, or builds one
    /// and seeds it from every currently-live fact (spec §4.4 step 4:
    /// "existing sub-fragments matching a structural fingerprint are
    /// reused").
    pub fn get_or_create_alpha(&mut self, tests: Vec<(AttrId, ValueId)>, bind: Vec<(ValueId, AttrId)>) -> NodeId {
        let probe = AlphaNode::new(tests.clone(), bind.clone());
        let fp = probe.fingerprint();
        if let Some(&id) = self.alpha_fingerprints.get(&fp) {
            return id;
        }
        let id = self.alloc_node_id();
        if let Some(&(first_attr, first_val)) = probe.tests.first() {
            self.root_dispatch.entry((first_attr, first_val)).or_default().push(id);
        }
        self.alpha_fingerprints.insert(fp, id);
        self.nodes.insert(id, Node::new(id, NodeKind::Alpha(probe)));
        self.seed_alpha(id);
        id
    }

    pub fn create_beta(&mut self, left: NodeId, right: NodeId) -> NodeId {
        let id = self.alloc_node_id();
        self.nodes.insert(id, Node::new(id, NodeKind::Beta(BetaNode::new(left, right))));
        self.connect(left, id);
        self.connect(right, id);
        self.seed_binary(id);
        id
    }

    pub fn create_negation(&mut self, left: NodeId, right: NodeId, join_vars: Vec<ValueId>) -> NodeId {
        let id = self.alloc_node_id();
        self.nodes
            .insert(id, Node::new(id, NodeKind::Negation(NegationNode::new(left, right, join_vars))));
        self.connect(left, id);
        self.connect(right, id);
        self.seed_binary(id);
        id
    }

    pub fn create_filter(&mut self, parent: NodeId, predicates: Vec<Predicate>) -> NodeId {
        let id = self.alloc_node_id();
        self.nodes.insert(id, Node::new(id, NodeKind::Filter(FilterNode::new(predicates))));
        self.connect(parent, id);
        self.seed_unary(id, parent);
        id
    }

    pub fn create_production(&mut self, parent: NodeId, sink: ProductionSink) -> NodeId {
        let id = self.alloc_node_id();
        self.nodes.insert(id, Node::new(id, NodeKind::Production(ProductionNode::new(sink))));
        self.connect(parent, id);
        self.seed_unary(id, parent);
        self.stats.production_count += 1;
        id
    }

    fn current_output_tokens(&self, node_id: NodeId) -> Vec<Token> {
        match &self.nodes[&node_id].kind {
            NodeKind::Alpha(a) => a
                .memory
                .iter()
                .filter_map(|&fid| self.facts.get(fid).map(|f| a.extract_token(f, f.seq)))
                .collect(),
            NodeKind::Beta(b) => b.own_memory.values().cloned().collect(),
            NodeKind::Negation(n) => n
                .left_memory
                .iter()
                .filter(|(k, _)| n.match_count.get(*k).copied().unwrap_or(0) == 0)
                .map(|(_, t)| t.clone())
                .collect(),
            NodeKind::Filter(_) | NodeKind::Production(_) => Vec::new(),
        }
    }

    fn seed_alpha(&mut self, id: NodeId) {
        let candidates: Vec<FactId> = self.facts.iterate().map(|f| f.id).collect();
        for fid in candidates {
            let should_assert = matches!(&self.nodes[&id].kind, NodeKind::Alpha(a)
                if self.facts.get(fid).map(|f| a.matches(f)).unwrap_or(false) && !a.memory.contains(&fid));
            if should_assert {
                let _ = self.assert_into_alpha(id, fid);
            }
        }
    }

    fn seed_binary(&mut self, node_id: NodeId) {
        let (left, right) = match &self.nodes[&node_id].kind {
            NodeKind::Beta(b) => (b.left_parent, b.right_parent),
            NodeKind::Negation(n) => (n.left_parent, n.right_parent),
            _ => return,
        };
        for t in self.current_output_tokens(left) {
            let _ = self.deliver(node_id, left, t, Polarity::Add);
        }
        for t in self.current_output_tokens(right) {
            let _ = self.deliver(node_id, right, t, Polarity::Add);
        }
    }

    fn seed_unary(&mut self, node_id: NodeId, parent: NodeId) {
        for t in self.current_output_tokens(parent) {
            let _ = self.deliver(node_id, parent, t, Polarity::Add);
        }
    }

    // ---- fact ingress (spec §6 "Fact-ingress interface") ----

    pub fn add_fact(&mut self, attrs: Vec<(AttrId, ValueId)>) -> Result<(FactId, bool), EngineError> {
        self.materialize()?;
        if self.entities.is_active() && self.entities.accumulate(&attrs, &self.interner) {
            return Ok((PENDING_FACT_ID, true));
        }
        self.add_fact_with_source_opt(attrs, None)
    }

    pub fn add_fact_with_source(
        &mut self,
        attrs: Vec<(AttrId, ValueId)>,
        source: SourceId,
    ) -> Result<(FactId, bool), EngineError> {
        self.materialize()?;
        if self.entities.is_active() && self.entities.accumulate(&attrs, &self.interner) {
            return Ok((PENDING_FACT_ID, true));
        }
        self.add_fact_with_source_opt(attrs, Some(source))
    }

    fn add_fact_with_source_opt(
        &mut self,
        attrs: Vec<(AttrId, ValueId)>,
        source: Option<SourceId>,
    ) -> Result<(FactId, bool), EngineError> {
        let mut tx_log = Vec::new();
        let outcome = self
            .add_fact_internal(attrs, source, &mut tx_log)
            .and_then(|outcome| self.drain_agenda(&mut tx_log).map(|_| outcome));
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.rollback(&tx_log);
                Err(EngineError::RuleAction(e))
            }
        }
    }

    fn add_fact_internal(
        &mut self,
        attrs: Vec<(AttrId, ValueId)>,
        source: Option<SourceId>,
        tx_log: &mut Vec<FactId>,
    ) -> Result<(FactId, bool), String> {
        let (id, added) = self.facts.add(attrs);
        if let Some(src) = source {
            self.facts.attach_source(id, src);
        }
        if added {
            tx_log.push(id);
            self.validate_shape(id);
            self.maybe_union_same_as(id);
            self.propagate_new_fact(id)?;
        }
        Ok((id, added))
    }

    fn drain_agenda(&mut self, tx_log: &mut Vec<FactId>) -> Result<(), String> {
        while let Some(item) = self.agenda.pop() {
            match item {
                AgendaItem::AssertFact { attrs, source, inferred_by, support } => {
                    let id = self.assert_inferred(&inferred_by, support, attrs, tx_log)?;
                    if let Some(src) = source {
                        self.facts.attach_source(id, src);
                    }
                }
            }
        }
        Ok(())
    }

    fn assert_inferred(
        &mut self,
        rule_name: &str,
        support: Vec<FactId>,
        attrs: Vec<(AttrId, ValueId)>,
        tx_log: &mut Vec<FactId>,
    ) -> Result<FactId, String> {
        let (id, added) = self.facts.add(attrs);
        if added {
            self.facts.mark_inferred(id, rule_name, support.clone());
            tx_log.push(id);
            self.validate_shape(id);
            self.maybe_union_same_as(id);
            self.propagate_new_fact(id)?;
        }
        let is_new_support = self.inference_support.entry(id).or_default().insert(support.clone());
        if is_new_support {
            for &m in &support {
                self.support_index.entry(m).or_default().insert(id);
            }
        }
        Ok(id)
    }

    fn rollback(&mut self, tx_log: &[FactId]) {
        for &id in tx_log.iter().rev() {
            let _ = self.retract_fact(id);
            self.facts.remove_by_id(id);
        }
    }

    pub fn remove_by_id(&mut self, id: FactId) -> Result<bool, EngineError> {
        self.materialize()?;
        if self.facts.get(id).is_none() {
            return Ok(false);
        }
        self.retract_fact(id).map_err(EngineError::RuleAction)?;
        self.facts.remove_by_id(id);
        Ok(true)
    }

    /// Retracts every fact tagged with `source`. A fact also tagged with
    /// another source loses only `source`'s tag and survives (spec §3,
    /// §8-invariant-2); only a fact whose sources become empty is actually
    /// deleted from the network and the store.
    pub fn remove_source(&mut self, source: SourceId) -> Result<usize, EngineError> {
        self.materialize()?;
        let ids = self.facts.remove_source_ids(source);
        let mut count = 0;
        for id in ids {
            let remaining = self.facts.detach_source(id, source);
            if remaining == 0 && self.remove_by_id(id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn begin_entity_accumulation(&mut self) {
        if self.materialize().is_err() {
            tracing::warn!("failed to materialize lazy network before entity accumulation");
        }
        self.entities.begin();
    }

    pub fn is_entity_accumulation_active(&self) -> bool {
        self.entities.is_active()
    }

    pub fn end_entity_accumulation(&mut self) -> Result<Vec<FactId>, EngineError> {
        let consolidated = self.entities.end();
        let mut ids = Vec::with_capacity(consolidated.len());
        for attrs in consolidated {
            let (id, _) = self.add_fact_with_source_opt(attrs, None)?;
            ids.push(id);
        }
        Ok(ids)
    }

    // ---- propagation core ----

    fn candidate_alphas(&self, fact: &Fact) -> Vec<NodeId> {
        let mut set = IndexSet::new();
        for &(a, v) in &fact.attrs {
            if let Some(ids) = self.root_dispatch.get(&(a, v)) {
                for &id in ids {
                    set.insert(id);
                }
            }
        }
        set.into_iter().collect()
    }

    fn propagate_new_fact(&mut self, id: FactId) -> Result<(), String> {
        let fact = match self.facts.get(id) {
            Some(f) => f.clone(),
            None => return Ok(()),
        };
        for alpha_id in self.candidate_alphas(&fact) {
            let matches = matches!(&self.nodes[&alpha_id].kind, NodeKind::Alpha(a) if a.matches(&fact));
            if matches {
                self.assert_into_alpha(alpha_id, id)?;
            }
        }
        Ok(())
    }

    fn retract_fact(&mut self, id: FactId) -> Result<(), String> {
        if let Some(fact) = self.facts.get(id).cloned() {
            for alpha_id in self.candidate_alphas(&fact) {
                let present = matches!(&self.nodes[&alpha_id].kind, NodeKind::Alpha(a) if a.memory.contains(&id));
                if present {
                    self.retract_from_alpha(alpha_id, id)?;
                }
            }
        }

        if let Some(dependents) = self.support_index.remove(&id) {
            for dep in dependents {
                let mut now_empty = false;
                if let Some(tuples) = self.inference_support.get_mut(&dep) {
                    tuples.retain(|t| !t.contains(&id));
                    now_empty = tuples.is_empty();
                }
                if now_empty {
                    self.inference_support.remove(&dep);
                    self.retract_fact(dep)?;
                    self.facts.remove_by_id(dep);
                }
            }
        }
        Ok(())
    }

    fn assert_into_alpha(&mut self, alpha_id: NodeId, fid: FactId) -> Result<(), String> {
        let fact = match self.facts.get(fid) {
            Some(f) => f.clone(),
            None => return Ok(()),
        };
        let (token, children) = {
            let node = self.nodes.get_mut(&alpha_id).expect("alpha id must exist");
            let children = node.header.children.clone();
            match &mut node.kind {
                NodeKind::Alpha(a) => {
                    a.memory.insert(fid);
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    (a.extract_token(&fact, seq), children)
                }
                _ => return Ok(()),
            }
        };
        for child in children {
            self.deliver(child, alpha_id, token.clone(), Polarity::Add)?;
        }
        Ok(())
    }

    fn retract_from_alpha(&mut self, alpha_id: NodeId, fid: FactId) -> Result<(), String> {
        let fact = match self.facts.get(fid) {
            Some(f) => f.clone(),
            None => return Ok(()),
        };
        let (token, children) = {
            let node = self.nodes.get_mut(&alpha_id).expect("alpha id must exist");
            let children = node.header.children.clone();
            match &mut node.kind {
                NodeKind::Alpha(a) => {
                    a.memory.shift_remove(&fid);
                    (a.extract_token(&fact, 0), children)
                }
                _ => return Ok(()),
            }
        };
        for child in children {
            self.deliver(child, alpha_id, token.clone(), Polarity::Remove)?;
        }
        Ok(())
    }

    /// Delivers `token` (with `polarity`) from `from` to `node_id`, updating
    /// the node's memory and recursively forwarding to its children (spec
    /// §4.3 "Propagation protocol").
    fn deliver(&mut self, node_id: NodeId, from: NodeId, token: Token, polarity: Polarity) -> Result<(), String> {
        self.stats.propagations += 1;
        let mut outputs: Vec<(Token, Polarity)> = Vec::new();
        let mut rule_assertions: Vec<(String, Vec<FactId>, Vec<(AttrId, ValueId)>)> = Vec::new();
        let mut template_fires: Vec<Token> = Vec::new();
        let mut rule_error: Option<String> = None;
        let children;

        {
            let node = match self.nodes.get_mut(&node_id) {
                Some(n) => n,
                None => return Ok(()),
            };
            children = node.header.children.clone();

            match &mut node.kind {
                NodeKind::Alpha(_) => {
                    warn!("deliver() invoked directly on an alpha node; alpha nodes are driven by assert/retract_into_alpha");
                }
                NodeKind::Beta(beta) => {
                    if from == beta.left_parent {
                        match polarity {
                            Polarity::Add => {
                                beta.left_memory.insert(token.facts.clone(), token.clone());
                                for right in beta.right_memory.values() {
                                    if let Some(joined) = token.join(right, self.next_seq) {
                                        self.next_seq += 1;
                                        let key = (token.facts.clone(), right.facts.clone());
                                        beta.own_memory.insert(key, joined.clone());
                                        outputs.push((joined, Polarity::Add));
                                    }
                                }
                            }
                            Polarity::Remove => {
                                beta.left_memory.shift_remove(&token.facts);
                                let keys: Vec<_> =
                                    beta.own_memory.keys().filter(|(l, _)| *l == token.facts).cloned().collect();
                                for k in keys {
                                    if let Some(t) = beta.own_memory.shift_remove(&k) {
                                        outputs.push((t, Polarity::Remove));
                                    }
                                }
                            }
                        }
                    } else {
                        match polarity {
                            Polarity::Add => {
                                beta.right_memory.insert(token.facts.clone(), token.clone());
                                for left in beta.left_memory.values() {
                                    if let Some(joined) = left.join(&token, self.next_seq) {
                                        self.next_seq += 1;
                                        let key = (left.facts.clone(), token.facts.clone());
                                        beta.own_memory.insert(key, joined.clone());
                                        outputs.push((joined, Polarity::Add));
                                    }
                                }
                            }
                            Polarity::Remove => {
                                beta.right_memory.shift_remove(&token.facts);
                                let keys: Vec<_> =
                                    beta.own_memory.keys().filter(|(_, r)| *r == token.facts).cloned().collect();
                                for k in keys {
                                    if let Some(t) = beta.own_memory.shift_remove(&k) {
                                        outputs.push((t, Polarity::Remove));
                                    }
                                }
                            }
                        }
                    }
                }
                NodeKind::Negation(neg) => {
                    if from == neg.left_parent {
                        match polarity {
                            Polarity::Add => {
                                neg.left_memory.insert(token.facts.clone(), token.clone());
                                let count = neg.right_memory.values().filter(|r| neg.matches(&token, r)).count();
                                neg.match_count.insert(token.facts.clone(), count);
                                if count == 0 {
                                    outputs.push((token.clone(), Polarity::Add));
                                }
                            }
                            Polarity::Remove => {
                                let count = neg.match_count.remove(&token.facts).unwrap_or(0);
                                neg.left_memory.shift_remove(&token.facts);
                                if count == 0 {
                                    outputs.push((token.clone(), Polarity::Remove));
                                }
                            }
                        }
                    } else {
                        match polarity {
                            Polarity::Add => {
                                neg.right_memory.insert(token.facts.clone(), token.clone());
                                let affected: Vec<Vec<FactId>> = neg
                                    .left_memory
                                    .iter()
                                    .filter(|(_, l)| neg.matches(l, &token))
                                    .map(|(k, _)| k.clone())
                                    .collect();
                                for key in affected {
                                    let count = neg.match_count.entry(key.clone()).or_insert(0);
                                    *count += 1;
                                    if *count == 1 {
                                        if let Some(l) = neg.left_memory.get(&key) {
                                            outputs.push((l.clone(), Polarity::Remove));
                                        }
                                    }
                                }
                            }
                            Polarity::Remove => {
                                neg.right_memory.shift_remove(&token.facts);
                                let affected: Vec<Vec<FactId>> = neg
                                    .left_memory
                                    .iter()
                                    .filter(|(_, l)| neg.matches(l, &token))
                                    .map(|(k, _)| k.clone())
                                    .collect();
                                for key in affected {
                                    if let Some(count) = neg.match_count.get_mut(&key) {
                                        *count = count.saturating_sub(1);
                                        if *count == 0 {
                                            if let Some(l) = neg.left_memory.get(&key) {
                                                outputs.push((l.clone(), Polarity::Add));
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                NodeKind::Filter(filter) => {
                    if filter.passes(&token, &self.interner) {
                        outputs.push((token.clone(), polarity));
                    }
                }
                NodeKind::Production(prod) => {
                    match polarity {
                        Polarity::Add => {
                            prod.live.insert(token.facts.clone(), token.clone());
                        }
                        Polarity::Remove => {
                            prod.live.shift_remove(&token.facts);
                        }
                    }
                    match &prod.sink {
                        ProductionSink::Query => {}
                        ProductionSink::LiveQuery(queue) => {
                            queue.borrow_mut().push_back(LiveChange {
                                bindings: token.bindings.clone(),
                                is_addition: polarity == Polarity::Add,
                            });
                        }
                        ProductionSink::Rule(action) => {
                            if polarity == Polarity::Add {
                                match (action.build)(&token, &self.facts) {
                                    Ok(Some((attrs, extra_support))) => {
                                        let mut support = token.facts.clone();
                                        support.extend(extra_support);
                                        rule_assertions.push((action.name.clone(), support, attrs));
                                    }
                                    Ok(None) => {}
                                    Err(e) => rule_error = Some(e),
                                }
                            }
                        }
                        ProductionSink::PropertyChainTemplate => {
                            if polarity == Polarity::Add {
                                template_fires.push(token.clone());
                            }
                        }
                    }
                }
            }
        }

        if let Some(e) = rule_error {
            return Err(e);
        }
        for tok in template_fires {
            self.instantiate_property_chain(&tok)?;
        }
        for (name, support, attrs) in rule_assertions {
            self.agenda.push(AgendaItem::AssertFact { attrs, source: None, inferred_by: name, support });
        }
        for (out_token, out_pol) in outputs {
            for &child in &children {
                self.deliver(child, node_id, out_token.clone(), out_pol)?;
            }
        }
        Ok(())
    }

    /// Logs a warning if `id`'s fact is missing a required attribute for its
    /// declared `type` (spec §3 "Canonical fact shapes", §7
    /// `MalformedFact`). The fact is never rejected — it simply fails to
    /// match any α node that tests the missing attribute, which is the
    /// "yields no matches" disposition spec §7 describes.
    fn validate_shape(&self, id: FactId) {
        let Some(fact) = self.facts.get(id) else { return };
        let Some(type_attr) = self.interner.get("type") else { return };
        let Some(type_val) = fact.get(type_attr) else { return };
        let shape_name = self.interner.resolve(type_val).to_string();
        if let Some(required) = crate::shapes::requirements_for(&shape_name) {
            for req in required {
                let present = self
                    .interner
                    .get(req)
                    .map(|a| fact.get(a).is_some())
                    .unwrap_or(false);
                if !present {
                    warn!(fact_id = id, shape = %shape_name, missing = %req, "malformed fact: missing required attribute");
                }
            }
        }
    }

    /// `same_as` facts feed the union-find directly so `class_members`/
    /// representative lookups (spec §4.3 "Same-as handling") stay current;
    /// the actual query-visible closure (symmetry + substitution into other
    /// fact shapes) is implemented as ordinary static rules in
    /// [`crate::rules`], reusing the discrimination network rather than
    /// special-casing α-index rewrites.
    fn maybe_union_same_as(&mut self, id: FactId) {
        let Some(fact) = self.facts.get(id) else { return };
        let Some(type_attr) = self.interner.get("type") else { return };
        let Some(same_as_val) = self.interner.get("same_as") else { return };
        if fact.get(type_attr) != Some(same_as_val) {
            return;
        }
        let (Some(ind1_attr), Some(ind2_attr)) = (self.interner.get("ind1"), self.interner.get("ind2")) else {
            return;
        };
        if let (Some(a), Some(b)) = (fact.get(ind1_attr), fact.get(ind2_attr)) {
            self.union_find.union(a, b);
        }
    }

    /// Instantiates a concrete join chain for one `property_chain` fact
    /// (spec §4.6 "Templates"): builds `n` α nodes (one per hop role name),
    /// chains them with β joins on the shared intermediate individual, and
    /// attaches a production whose rule action asserts the derived role
    /// assertion under `super_property`, supported by the hop facts plus
    /// the defining `property_chain` fact itself.
    fn instantiate_property_chain(&mut self, token: &Token) -> Result<(), String> {
        let chain_fact_id = match token.facts.first() {
            Some(&id) => id,
            None => return Ok(()),
        };
        let super_var = self.interner.intern("?chain_super");
        let chain_var = self.interner.intern("?chain_props");
        let (Some(&super_val), Some(&chain_val)) = (token.bindings.get(&super_var), token.bindings.get(&chain_var))
        else {
            return Ok(());
        };
        let chain_str = self.interner.resolve(chain_val).to_string();
        let hops: Vec<String> = chain_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if hops.is_empty() {
            warn!(fact_id = chain_fact_id, "property_chain fact has an empty chain, ignoring");
            return Ok(());
        }

        let type_attr = self.interner.intern("type");
        let role_assertion_val = self.interner.intern("role_assertion");
        let subject_attr = self.interner.intern("subject");
        let role_attr = self.interner.intern("role");
        let object_attr = self.interner.intern("object");

        let prefix = format!("?chain{chain_fact_id}_x");
        let mut hop_vars = Vec::with_capacity(hops.len() + 1);
        for i in 0..=hops.len() {
            hop_vars.push(self.interner.intern(&format!("{prefix}{i}")));
        }

        let mut leaf: Option<NodeId> = None;
        for (i, hop) in hops.iter().enumerate() {
            let hop_val = self.interner.intern(hop);
            let tests = vec![(type_attr, role_assertion_val), (role_attr, hop_val)];
            let bind = vec![(hop_vars[i], subject_attr), (hop_vars[i + 1], object_attr)];
            let alpha = self.get_or_create_alpha(tests, bind);
            leaf = Some(match leaf {
                None => alpha,
                Some(prev) => self.create_beta(prev, alpha),
            });
        }
        let Some(leaf) = leaf else { return Ok(()) };

        let first_var = hop_vars[0];
        let last_var = hop_vars[hops.len()];
        let rule_name = format!("property_chain:{}", self.interner.resolve(super_val));
        let defining_fact = vec![chain_fact_id];
        let action = RuleAction {
            name: rule_name,
            build: Box::new(move |tok: &Token, _facts: &FactStore| match (tok.bindings.get(&first_var), tok.bindings.get(&last_var)) {
                (Some(&s), Some(&o)) => Ok(Some((
                    vec![
                        (type_attr, role_assertion_val),
                        (subject_attr, s),
                        (role_attr, super_val),
                        (object_attr, o),
                    ],
                    defining_fact.clone(),
                ))),
                _ => Ok(None),
            }),
        };
        self.create_production(leaf, ProductionSink::Rule(action));
        Ok(())
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}
