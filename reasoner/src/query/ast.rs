//! Graph-pattern and `SELECT` query IR (spec §4.4 "Input is either (a) a
//! list of triple patterns ... or (b) a REQL query string"). Both input
//! forms — the `pattern()` API and the REQL parser — build this same IR;
//! the planner (`super::planner`) and executor (`super::executor`) never
//! see REQL text directly.

use crate::query::filter_expr::{Atom, BoolExpr};
use crate::query::term::Triple;

/// One `{ ... }` block: a conjunction of triples plus the clauses that
/// apply to it. `optional`/`unions`/`not_exists`/`minus` hold nested
/// sub-patterns rather than flags, mirroring how REQL nests `{ }` groups.
#[derive(Clone, Debug, Default)]
pub struct GraphPattern {
    pub triples: Vec<Triple>,
    /// Inline `FILTER` atoms conjoined with the triples (pushed into a
    /// network filter node at compile time, spec §4.3 "Filter node").
    pub inline_filters: Vec<Atom>,
    pub optional: Vec<GraphPattern>,
    /// Alternative branches of a top-level `UNION` (spec §4.4 "UNION lowers
    /// to multiple sibling productions"); empty unless this pattern is the
    /// first branch of a union chain.
    pub union_with: Vec<GraphPattern>,
    /// `FILTER NOT EXISTS { ... }` sub-patterns (spec §4.3 "Negation node").
    pub not_exists: Vec<GraphPattern>,
    /// `MINUS { ... }` sub-patterns — semantically NOT EXISTS restricted to
    /// shared variables (spec §4.4).
    pub minus: Vec<GraphPattern>,
    /// `VALUES ?var { a b c }` clauses.
    pub values: Vec<(String, Vec<String>)>,
    /// `FILTER` clauses written inside this pattern's braces that don't
    /// reduce to a flat conjunction of atoms (i.e. use `OR`/`!`). The
    /// network's filter node only expresses AND, so the REQL parser bubbles
    /// these up to the enclosing query's top-level `filters` instead of
    /// `inline_filters`.
    pub extra_filters: Vec<BoolExpr>,
}

impl GraphPattern {
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for t in &self.triples {
            for term in [&t.subject, &t.object] {
                if let Some(v) = term.as_var() {
                    if seen.insert(v.to_string()) {
                        out.push(v.to_string());
                    }
                }
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Clone, Debug)]
pub enum Projection {
    Var(String),
    /// `var: None` represents `COUNT(*)`.
    Aggregate { func: AggFunc, var: Option<String>, alias: String },
}

impl Projection {
    pub fn output_name(&self) -> &str {
        match self {
            Projection::Var(v) => v,
            Projection::Aggregate { alias, .. } => alias,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryForm {
    Select,
    Ask,
    Describe,
}

#[derive(Clone, Debug)]
pub struct SelectQuery {
    pub form: QueryForm,
    pub distinct: bool,
    pub projection: Vec<Projection>,
    pub pattern: GraphPattern,
    /// Top-level `FILTER` clauses applying to the whole pattern (spec §4.5
    /// step 4, the executor-level FILTER post-operator, as distinct from
    /// `inline_filters` pushed into the network).
    pub filters: Vec<BoolExpr>,
    pub group_by: Vec<String>,
    pub having: Vec<BoolExpr>,
    /// `(variable, descending?)`.
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Default for SelectQuery {
    fn default() -> Self {
        Self {
            form: QueryForm::Select,
            distinct: false,
            projection: Vec::new(),
            pattern: GraphPattern::default(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}
