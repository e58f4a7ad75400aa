//! Built-in predicate vocabulary (spec §4.5 "Built-in predicates").
//!
//! [`Atom`] is the flat, conjunction-only shape a triple pattern's inline
//! `where` clause uses — these are pushed down into a network
//! [`crate::network::filter::FilterNode`] and evaluated per-token as facts
//! flow through the discrimination network. [`BoolExpr`] adds `AND`/`OR`/
//! `NOT` composition and is used only by the executor's top-level `FILTER`
//! / `HAVING` post-operators (spec §4.5 step 4), which run once per
//! materialized row rather than per network propagation — there's no need
//! to push a disjunction into the network itself.

use super::term::Term;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug)]
pub enum Atom {
    Compare(CompareOp, Term, Term),
    Contains(Term, Term),
    StrStarts(Term, Term),
    StrEnds(Term, Term),
    Regex(Term, String),
    Bound(String),
}

#[derive(Clone, Debug)]
pub enum BoolExpr {
    Atom(Atom),
    Not(Box<BoolExpr>),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
}

impl From<Atom> for BoolExpr {
    fn from(a: Atom) -> Self {
        BoolExpr::Atom(a)
    }
}

/// Numeric coercion identical to `network::filter::compare` (spec §4.5): a
/// string is numeric iff it parses as an IEEE-754 double; mixed kinds fall
/// back to lexicographic order.
pub fn compare_strs(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

/// Evaluates a [`BoolExpr`] against one materialized row of string
/// bindings. A `Term::Var` that is unbound in `row` makes any atom
/// referencing it evaluate to `false` (spec §7 `QueryTypeMismatch`:
/// "filter evaluates false for that row").
pub fn eval_bool_expr(expr: &BoolExpr, row: &std::collections::HashMap<String, String>) -> bool {
    match expr {
        BoolExpr::Atom(atom) => eval_atom(atom, row),
        BoolExpr::Not(inner) => !eval_bool_expr(inner, row),
        BoolExpr::And(parts) => parts.iter().all(|p| eval_bool_expr(p, row)),
        BoolExpr::Or(parts) => parts.iter().any(|p| eval_bool_expr(p, row)),
    }
}

fn eval_atom(atom: &Atom, row: &std::collections::HashMap<String, String>) -> bool {
    match atom {
        Atom::Compare(op, a, b) => {
            let (Some(x), Some(y)) = (resolve_term(a, row), resolve_term(b, row)) else {
                return false;
            };
            let ord = compare_strs(&x, &y);
            match op {
                CompareOp::Eq => x == y,
                CompareOp::Neq => x != y,
                CompareOp::Lt => ord.is_lt(),
                CompareOp::Le => ord.is_le(),
                CompareOp::Gt => ord.is_gt(),
                CompareOp::Ge => ord.is_ge(),
            }
        }
        Atom::Contains(a, b) => match (resolve_term(a, row), resolve_term(b, row)) {
            (Some(x), Some(y)) => x.contains(y.as_str()),
            _ => false,
        },
        Atom::StrStarts(a, b) => match (resolve_term(a, row), resolve_term(b, row)) {
            (Some(x), Some(y)) => x.starts_with(y.as_str()),
            _ => false,
        },
        Atom::StrEnds(a, b) => match (resolve_term(a, row), resolve_term(b, row)) {
            (Some(x), Some(y)) => x.ends_with(y.as_str()),
            _ => false,
        },
        Atom::Regex(a, pattern) => match resolve_term(a, row) {
            Some(x) => regex::Regex::new(pattern).map(|re| re.is_match(&x)).unwrap_or(false),
            None => false,
        },
        Atom::Bound(var) => row.contains_key(var),
    }
}

/// Flattens a pure `AND`-of-atoms expression into a `Vec<Atom>` suitable for
/// pushing into a network filter node. Returns `None` if `expr` contains any
/// `OR`/`NOT`, since those have no equivalent there (see module docs).
pub fn try_flatten_and(expr: &BoolExpr) -> Option<Vec<Atom>> {
    match expr {
        BoolExpr::Atom(a) => Some(vec![a.clone()]),
        BoolExpr::And(parts) => {
            let mut out = Vec::new();
            for p in parts {
                out.extend(try_flatten_and(p)?);
            }
            Some(out)
        }
        BoolExpr::Not(_) | BoolExpr::Or(_) => None,
    }
}

fn resolve_term(term: &Term, row: &std::collections::HashMap<String, String>) -> Option<String> {
    match term {
        Term::Const(c) => Some(c.clone()),
        Term::Var(v) => row.get(v).cloned(),
    }
}
