//! Query surface (C4 planner, C5 executor, REQL parser) and the `Network`
//! convenience methods built on top of them (spec §6 "External Interfaces").

pub mod ast;
pub mod executor;
pub mod filter_expr;
pub mod live;
pub mod planner;
pub mod reql;
pub mod table;
pub mod term;

pub use ast::{AggFunc, GraphPattern, Projection, QueryForm, SelectQuery};
pub use filter_expr::{Atom, BoolExpr, CompareOp};
pub use live::LiveResultSet;
pub use table::{Cell, Column, ResultTable, Row};
pub use term::{Term, Triple};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::fact::{FactId, SourceId};
use crate::network::production::ProductionSink;
use crate::network::Network;

impl Network {
    /// Inserts one ground `(subject, predicate, object)` triple, classifying
    /// `predicate` the same way the planner does for patterns (spec §6
    /// "Fact-ingress interface"). Returns `(fact_id, added)`; `added` is
    /// `false` for a duplicate.
    pub fn add_triple(&mut self, subject: &str, predicate: &str, object: &str) -> Result<(FactId, bool)> {
        let attrs = planner::ground_triple_attrs(self, subject, predicate, object);
        self.add_fact(attrs)
    }

    /// As [`Network::add_triple`], attaching a source id so the fact can
    /// later be retracted in bulk via [`Network::remove_source`].
    pub fn add_triple_with_source(
        &mut self,
        subject: &str,
        predicate: &str,
        object: &str,
        source: SourceId,
    ) -> Result<(FactId, bool)> {
        let attrs = planner::ground_triple_attrs(self, subject, predicate, object);
        self.add_fact_with_source(attrs, source)
    }

    /// Ad hoc graph-pattern query (spec §6 "Input is either (a) a list of
    /// triple patterns ... or (b) a REQL query string"): a conjunction of
    /// `triples`, an inline conjunctive `where_` filter, `VALUES` lists, and
    /// `NOT EXISTS` sub-patterns. `select` defaults to every variable the
    /// pattern binds, in first-occurrence order. `cache` controls whether
    /// the compiled production is reused across calls with an identical
    /// shape (spec §4.3 "Production caching").
    #[allow(clippy::too_many_arguments)]
    pub fn pattern(
        &mut self,
        triples: Vec<Triple>,
        where_: Vec<Atom>,
        values: Vec<(String, Vec<String>)>,
        not_exists: Vec<Vec<Triple>>,
        select: Option<Vec<String>>,
        cache: bool,
    ) -> Result<ResultTable> {
        let mut gp = GraphPattern { triples, inline_filters: where_, values, ..Default::default() };
        gp.not_exists = not_exists
            .into_iter()
            .map(|triples| GraphPattern { triples, ..Default::default() })
            .collect();
        let projection = select.unwrap_or_else(|| gp.variables()).into_iter().map(Projection::Var).collect();
        let query = SelectQuery { projection, pattern: gp, ..Default::default() };
        executor::execute(self, &query, cache)
    }

    /// Parses and executes a REQL query string (spec §6 `reql(query_string,
    /// timeout_ms=0)`). `timeout_ms == 0` means unbounded; otherwise a
    /// watcher thread sets a deadline flag the executor polls at its usual
    /// boundaries (spec §4.5/§5 "Suspension points").
    pub fn reql(&mut self, query_string: &str, timeout_ms: u64) -> Result<ResultTable> {
        let query = reql::parse(query_string)?;
        if timeout_ms == 0 {
            return executor::execute_with_deadline(self, &query, true, 0, None);
        }
        let deadline: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let done: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let watcher_flag = deadline.clone();
        let watcher_done = done.clone();
        let watcher = thread::spawn(move || {
            let budget = Duration::from_millis(timeout_ms);
            let poll = Duration::from_millis(10).min(budget);
            let start = std::time::Instant::now();
            while start.elapsed() < budget {
                if watcher_done.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(poll);
            }
            watcher_flag.store(true, Ordering::Relaxed);
        });
        let result = executor::execute_with_deadline(self, &query, true, timeout_ms, Some(&deadline));
        // Signal the watcher so a query that finishes well under its budget
        // doesn't leave a thread asleep for the rest of it; join so none
        // accumulate under high query frequency.
        done.store(true, Ordering::Relaxed);
        let _ = watcher.join();
        result
    }

    /// Compiles `pattern` as a standing subscription: every future
    /// `add_fact`/`remove_by_id`/`remove_source` call that affects its
    /// result set pushes a `(binding_map, is_addition)` change onto the
    /// returned handle (spec §6).
    pub fn live_pattern(
        &mut self,
        triples: Vec<Triple>,
        where_: Vec<Atom>,
        values: Vec<(String, Vec<String>)>,
    ) -> Option<LiveResultSet> {
        let gp = GraphPattern { triples, inline_filters: where_, values, ..Default::default() };
        let variables = gp.variables();
        let leaf = executor::compile_pattern(self, &gp)?;
        let queue = std::rc::Rc::new(std::cell::RefCell::new(std::collections::VecDeque::new()));
        let node = self.create_production(leaf, ProductionSink::LiveQuery(queue.clone()));
        Some(LiveResultSet::new(node, queue, variables))
    }

    /// `instances_of(Cat)` — every individual asserted `type Cat` (spec §6
    /// convenience templates). Cached under a stable key so repeated calls
    /// for the same concept reuse the compiled production.
    pub fn instances_of(&mut self, concept: &str) -> Result<ResultTable> {
        self.pattern(
            vec![Triple::new(Term::var("x"), "type".to_string(), Term::constant(concept))],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(vec!["x".to_string()]),
            true,
        )
    }

    /// `related(subject, knows)` — every object `subject` is related to via
    /// `property` (role or data, whichever `property` classifies as).
    pub fn related(&mut self, subject: &str, property: &str) -> Result<ResultTable> {
        self.pattern(
            vec![Triple::new(Term::constant(subject), property.to_string(), Term::var("o"))],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(vec!["o".to_string()]),
            true,
        )
    }

    /// `property_value(subject, property)` — single-value convenience over
    /// [`Network::related`] for data properties that are functional in
    /// practice (returns every matching value; callers that know the
    /// property is single-valued can take the first row).
    pub fn property_value(&mut self, subject: &str, property: &str) -> Result<ResultTable> {
        self.related(subject, property)
    }

    /// `all_property_assertions(property)` — every `(subject, object)` pair
    /// asserted under `property`, regardless of subject.
    pub fn all_property_assertions(&mut self, property: &str) -> Result<ResultTable> {
        self.pattern(
            vec![Triple::new(Term::var("s"), property.to_string(), Term::var("o"))],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Some(vec!["s".to_string(), "o".to_string()]),
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_triple_and_pattern_round_trip() {
        let mut net = Network::new();
        net.add_triple("Felix", "type", "Cat").unwrap();
        let table = net
            .pattern(
                vec![Triple::new(Term::constant("Felix"), "type".to_string(), Term::var("c"))],
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
                false,
            )
            .unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.row(0), vec![Some("Cat".to_string())]);
    }

    #[test]
    fn reql_select_matches_pattern_api() {
        let mut net = Network::new();
        net.add_triple("Felix", "type", "Cat").unwrap();
        let table = net.reql("SELECT ?c WHERE { Felix type ?c . }", 0).unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.row(0), vec![Some("Cat".to_string())]);
    }

    #[test]
    fn instances_of_convenience_template() {
        let mut net = Network::new();
        net.add_triple("Felix", "type", "Cat").unwrap();
        net.add_triple("Tom", "type", "Cat").unwrap();
        let table = net.instances_of("Cat").unwrap();
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn live_pattern_reports_subsequent_additions() {
        let mut net = Network::new();
        let live = net
            .live_pattern(
                vec![Triple::new(Term::var("x"), "type".to_string(), Term::constant("Cat"))],
                Vec::new(),
                Vec::new(),
            )
            .expect("non-empty pattern compiles");
        net.add_triple("Felix", "type", "Cat").unwrap();
        let changes = live.poll_changes(net.interner());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.get("x"), Some(&"Felix".to_string()));
        assert!(changes[0].1);
    }
}
