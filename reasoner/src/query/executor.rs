//! Query executor (C5, spec §4.5).
//!
//! Drives one or more compiled productions (main pattern, each `OPTIONAL`
//! branch, each `UNION` alternative) and applies the post-operators in the
//! fixed order spec §4.5 step 4 requires: OPTIONAL left-outer joins,
//! FILTER, GROUP BY + aggregation, HAVING, DISTINCT, ORDER BY, OFFSET,
//! LIMIT.
//!
//! **Aggregation over independent OPTIONALs** (scenario (c), invariant 8):
//! naively aggregating over the fully left-joined row set double-counts
//! whenever two OPTIONALs bind disjoint variables, because the join between
//! them is a cartesian product. Rather than flattening first and
//! aggregating second, an aggregate's source rows are drawn from whichever
//! branch (main pattern or a specific OPTIONAL) actually declares that
//! variable, filtered down to the current group by the variables that
//! branch shares with `GROUP BY` — never from the flattened table. The
//! flattened table is still built and used for plain (non-aggregate)
//! projections, DISTINCT, and ORDER BY, where the inflated cardinality is
//! the documented, correct behavior (invariant 8).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::intern::Interner;
use crate::network::node::NodeId;
use crate::network::production::ProductionSink;
use crate::network::Network;
use crate::query::ast::{AggFunc, GraphPattern, Projection, QueryForm, SelectQuery};
use crate::query::filter_expr::{compare_strs, eval_bool_expr};
use crate::query::planner;
use crate::query::table::{Cell, ResultTable, Row};

/// A deadline flag set by a timeout-watcher thread (spec §4.5/§5: "Query
/// execution may block on an internal timeout watcher ... a separate thread
/// whose only job is to set a deadline flag observed by the executor; when
/// the flag fires, the executor returns at its next polling boundary").
pub type Deadline = Arc<AtomicBool>;

fn deadline_hit(deadline: Option<&Deadline>) -> bool {
    deadline.map(|d| d.load(Ordering::Relaxed)).unwrap_or(false)
}

pub type Binding = HashMap<String, String>;

/// Resolves one token's bindings to a `var name (no "?") -> value` map.
fn token_to_row(interner: &Interner, token: &crate::network::token::Token) -> Binding {
    let mut row = HashMap::new();
    for (var, val) in &token.bindings {
        let name = interner.resolve(*var);
        let name = name.strip_prefix('?').unwrap_or(name);
        row.insert(name.to_string(), interner.resolve(*val).to_string());
    }
    row
}

fn production_rows(net: &Network, node: NodeId) -> Vec<Binding> {
    let Some(prod) = net.production_node(node) else {
        return Vec::new();
    };
    prod.live.values().map(|t| token_to_row(net.interner(), t)).collect()
}

/// Compiles one `GraphPattern`'s required part (triples + inline filters +
/// VALUES + NOT EXISTS/MINUS) into a single production and returns its node
/// id. Returns `None` for an empty pattern (e.g. an OPTIONAL with no
/// triples of its own).
pub(crate) fn compile_pattern(net: &mut Network, pattern: &GraphPattern) -> Option<NodeId> {
    let mut leaf = planner::compile_conjunction(net, &pattern.triples)?;

    for (var, allowed) in &pattern.values {
        let pred = planner::values_predicate(net, var, allowed);
        leaf = net.create_filter(leaf, vec![pred]);
    }
    if !pattern.inline_filters.is_empty() {
        let predicates: Vec<_> = pattern.inline_filters.iter().map(|a| planner::lower_atom(net, a)).collect();
        leaf = net.create_filter(leaf, predicates);
    }
    for sub in pattern.not_exists.iter().chain(pattern.minus.iter()) {
        let Some(sub_leaf) = compile_pattern(net, sub) else { continue };
        let shared = planner::shared_vars(&pattern.triples, &sub.triples);
        let join_vars = shared.iter().map(|v| planner::var_spur(net, v)).collect();
        leaf = net.create_negation(leaf, sub_leaf, join_vars);
    }
    Some(leaf)
}

fn cache_key_for(pattern: &GraphPattern) -> String {
    planner::cache_key(&pattern.triples, &pattern.inline_filters, &pattern.values, &pattern.not_exists.iter().map(|p| p.triples.clone()).collect::<Vec<_>>())
}

/// Compiles (or reuses a cached) production for one pattern branch and
/// returns its rows.
fn branch_rows(net: &mut Network, pattern: &GraphPattern, cache: bool) -> (Vec<String>, Vec<Binding>) {
    let key = cache_key_for(pattern);
    let node = if cache {
        net.cached_production(&key)
    } else {
        None
    };
    let node = match node {
        Some(n) => n,
        None => {
            let Some(leaf) = compile_pattern(net, pattern) else {
                return (pattern.variables(), Vec::new());
            };
            let node = net.create_production(leaf, ProductionSink::Query);
            if cache {
                net.cache_production(key, node);
            }
            node
        }
    };
    (pattern.variables(), production_rows(net, node))
}

fn dedupe_rows(rows: Vec<Binding>) -> Vec<Binding> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut pairs: Vec<(&String, &String)> = row.iter().collect();
        pairs.sort();
        let key = format!("{pairs:?}");
        if seen.insert(key) {
            out.push(row);
        }
    }
    out
}

fn left_outer_join(left: &[Binding], right: &[Binding], shared: &[String]) -> Vec<Binding> {
    let mut out = Vec::with_capacity(left.len());
    for l in left {
        let matches: Vec<&Binding> = right
            .iter()
            .filter(|r| shared.iter().all(|v| match (l.get(v), r.get(v)) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }))
            .collect();
        if matches.is_empty() {
            out.push(l.clone());
        } else {
            for r in matches {
                let mut merged = l.clone();
                for (k, v) in r {
                    merged.entry(k.clone()).or_insert_with(|| v.clone());
                }
                out.push(merged);
            }
        }
    }
    out
}

struct Branch {
    vars: Vec<String>,
    rows: Vec<Binding>,
}

fn group_key(row: &Binding, group_vars: &[String]) -> Vec<Option<String>> {
    group_vars.iter().map(|v| row.get(v).cloned()).collect()
}

fn aggregate_branch(branch: &Branch, group_vars: &[String], key: &[Option<String>], var: Option<&str>, func: AggFunc) -> String {
    let relevant: Vec<&Binding> = branch
        .rows
        .iter()
        .filter(|r| {
            group_vars
                .iter()
                .zip(key)
                .all(|(v, k)| match (r.get(v), k) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => true,
                    _ => !branch.vars.contains(v),
                })
        })
        .collect();

    match func {
        AggFunc::Count if var.is_none() => relevant.len().to_string(),
        AggFunc::Count => relevant.iter().filter(|r| var.map(|v| r.contains_key(v)).unwrap_or(false)).count().to_string(),
        AggFunc::CountDistinct => {
            let Some(var) = var else { return "0".to_string() };
            let set: std::collections::HashSet<&String> = relevant.iter().filter_map(|r| r.get(var)).collect();
            set.len().to_string()
        }
        AggFunc::Sum | AggFunc::Avg | AggFunc::Min | AggFunc::Max => {
            let Some(var) = var else { return "0".to_string() };
            let values: Vec<f64> = relevant.iter().filter_map(|r| r.get(var)).filter_map(|s| s.parse::<f64>().ok()).collect();
            if values.is_empty() {
                return match func {
                    AggFunc::Sum => "0".to_string(),
                    _ => String::new(),
                };
            }
            match func {
                AggFunc::Sum => values.iter().sum::<f64>().to_string(),
                AggFunc::Avg => (values.iter().sum::<f64>() / values.len() as f64).to_string(),
                AggFunc::Min => values.iter().cloned().fold(f64::INFINITY, f64::min).to_string(),
                AggFunc::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max).to_string(),
                _ => unreachable!(),
            }
        }
    }
}

/// Executes a compiled [`SelectQuery`] with no timeout (spec §4.5). `cache`
/// controls whether the main pattern's production is looked up/stored in
/// the network's query cache (spec §4.3 "Production caching"); `ASK`/
/// `DESCRIBE` forms and adhoc `pattern()` calls typically pass `false`.
pub fn execute(net: &mut Network, query: &SelectQuery, cache: bool) -> Result<ResultTable> {
    execute_with_deadline(net, query, cache, 0, None)
}

/// Executes `query`, aborting with [`EngineError::QueryTimeout`] the next
/// time `deadline` is observed set. `timeout_ms` is only used to populate
/// the error; the actual deadline is owned by the caller's watcher thread.
pub fn execute_with_deadline(
    net: &mut Network,
    query: &SelectQuery,
    cache: bool,
    timeout_ms: u64,
    deadline: Option<&Deadline>,
) -> Result<ResultTable> {
    let timed_out = || EngineError::QueryTimeout { timeout_ms };

    let (main_vars, main_rows) = branch_rows(net, &query.pattern, cache);
    let mut all_variants: Vec<(Vec<String>, Vec<Binding>)> = vec![(main_vars.clone(), main_rows)];
    for alt in &query.pattern.union_with {
        if deadline_hit(deadline) {
            return Err(timed_out());
        }
        all_variants.push(branch_rows(net, alt, false));
    }
    let mut flattened: Vec<Binding> = all_variants.iter().flat_map(|(_, rows)| rows.iter().cloned()).collect();
    flattened = dedupe_rows(flattened);

    let mut branches: Vec<Branch> = vec![Branch { vars: main_vars, rows: flattened.clone() }];

    for opt in &query.pattern.optional {
        if deadline_hit(deadline) {
            return Err(timed_out());
        }
        let (opt_vars, opt_rows) = branch_rows(net, opt, false);
        let shared = planner::shared_vars(&query.pattern.triples, &opt.triples);
        flattened = left_outer_join(&flattened, &opt_rows, &shared);
        branches.push(Branch { vars: opt_vars, rows: opt_rows });
    }

    if deadline_hit(deadline) {
        return Err(timed_out());
    }

    if query.form == QueryForm::Ask {
        let mut table = ResultTable::new(&["ask".to_string()]);
        table.push_row(vec![Some((!flattened.is_empty()).to_string())]);
        return Ok(table);
    }

    // top-level FILTER (executor-level, spec §4.5 step 4)
    if !query.filters.is_empty() {
        flattened.retain(|row| query.filters.iter().all(|f| eval_bool_expr(f, row)));
    }

    if deadline_hit(deadline) {
        return Err(timed_out());
    }

    let has_aggregates = query.projection.iter().any(|p| matches!(p, Projection::Aggregate { .. }));

    let column_names: Vec<String> = if query.form == QueryForm::Describe {
        query.pattern.variables()
    } else {
        query.projection.iter().map(|p| p.output_name().to_string()).collect()
    };

    let mut rows: Vec<Row> = Vec::new();

    if has_aggregates || !query.group_by.is_empty() {
        let mut seen_keys: Vec<Vec<Option<String>>> = Vec::new();
        for row in &flattened {
            let key = group_key(row, &query.group_by);
            if !seen_keys.contains(&key) {
                seen_keys.push(key);
            }
        }
        for key in &seen_keys {
            let mut out_row: Row = Vec::new();
            let mut having_row: Binding = HashMap::new();
            for (var, val) in query.group_by.iter().zip(key) {
                having_row.insert(var.clone(), val.clone().unwrap_or_default());
            }
            for proj in &query.projection {
                match proj {
                    Projection::Var(v) => {
                        let val = query.group_by.iter().position(|g| g == v).and_then(|i| key[i].clone());
                        out_row.push(val.map(Cell::Owned).unwrap_or(Cell::Null));
                    }
                    Projection::Aggregate { func, var, alias } => {
                        let branch = var
                            .as_deref()
                            .and_then(|v| branches.iter().find(|b| b.vars.iter().any(|bv| bv.as_str() == v)))
                            .unwrap_or(&branches[0]);
                        let value = aggregate_branch(branch, &query.group_by, key, var.as_deref(), *func);
                        having_row.insert(alias.clone(), value.clone());
                        out_row.push(Cell::Owned(value));
                    }
                }
            }
            if query.having.iter().all(|h| eval_bool_expr(h, &having_row)) {
                rows.push(out_row);
            }
        }
    } else {
        for row in &flattened {
            let out_row: Row = query
                .projection
                .iter()
                .map(|p| match p {
                    Projection::Var(v) => row.get(v).cloned().map(Cell::Owned).unwrap_or(Cell::Null),
                    Projection::Aggregate { .. } => Cell::Null,
                })
                .collect();
            rows.push(out_row);
        }
        if query.form == QueryForm::Describe {
            rows = flattened
                .iter()
                .map(|row| column_names.iter().map(|c| row.get(c).cloned().map(Cell::Owned).unwrap_or(Cell::Null)).collect())
                .collect();
        }
    }

    if query.distinct {
        let mut seen = std::collections::HashSet::new();
        rows.retain(|row| {
            let key = format!("{row:?}");
            seen.insert(key)
        });
    }

    if deadline_hit(deadline) {
        return Err(timed_out());
    }

    if !query.order_by.is_empty() {
        rows.sort_by(|a, b| {
            for (var, desc) in &query.order_by {
                let Some(idx) = column_names.iter().position(|c| c == var) else { continue };
                let (av, bv) = (a.get(idx), b.get(idx));
                let ord = match (av, bv) {
                    (Some(Cell::Owned(x)), Some(Cell::Owned(y))) => compare_strs(x, y),
                    (Some(Cell::Null), Some(Cell::Null)) => std::cmp::Ordering::Equal,
                    (Some(Cell::Null), _) => std::cmp::Ordering::Greater,
                    (_, Some(Cell::Null)) => std::cmp::Ordering::Less,
                    _ => std::cmp::Ordering::Equal,
                };
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    let offset = query.offset.unwrap_or(0);
    if offset > 0 {
        rows = rows.into_iter().skip(offset).collect();
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    let mut table = ResultTable::new(&column_names);
    for row in rows {
        let resolved: Vec<Option<String>> = row
            .into_iter()
            .map(|c| match c {
                Cell::Null => None,
                Cell::Owned(s) => Some(s),
                Cell::Interned(v) => Some(net.interner().resolve(v).to_string()),
            })
            .collect();
        table.push_row(resolved);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{GraphPattern, Projection, SelectQuery};
    use crate::query::term::{Term, Triple};

    #[test]
    fn simple_select_returns_bound_rows() {
        let mut net = Network::new();
        let type_attr = net.interner_mut().intern("type");
        let instance_of = net.interner_mut().intern("instance_of");
        let individual_attr = net.interner_mut().intern("individual");
        let concept_attr = net.interner_mut().intern("concept");
        let felix = net.interner_mut().intern("Felix");
        let cat = net.interner_mut().intern("Cat");
        net.add_fact(vec![(type_attr, instance_of), (individual_attr, felix), (concept_attr, cat)])
            .unwrap();

        let mut pattern = GraphPattern::default();
        pattern.triples.push(Triple::new(Term::constant("Felix"), "type".to_string(), Term::var("c")));
        let query = SelectQuery {
            projection: vec![Projection::Var("c".to_string())],
            pattern,
            ..Default::default()
        };
        let table = execute(&mut net, &query, false).unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.row(0), vec![Some("Cat".to_string())]);
    }

    #[test]
    fn pre_tripped_deadline_aborts_with_timeout() {
        let mut net = Network::new();
        let query = SelectQuery { projection: vec![Projection::Var("x".to_string())], ..Default::default() };
        let deadline: Deadline = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let err = execute_with_deadline(&mut net, &query, false, 5, Some(&deadline)).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::QueryTimeout { timeout_ms: 5 }));
    }
}
