//! Filter nodes (spec §4.3, §4.5 "Built-in predicates").
//!
//! A filter node is a pure function of a token's bindings: comparisons,
//! arithmetic, string predicates, `BOUND`, and `VALUES` membership. Because
//! the result depends only on the token being propagated (not on any
//! accumulated state), the node carries no memory — it re-evaluates on
//! every message, ADD or REMOVE alike.

use regex::Regex;

use crate::intern::{Interner, ValueId};
use crate::network::token::Token;

#[derive(Clone, Debug)]
pub enum Operand {
    Var(ValueId),
    Const(ValueId),
}

#[derive(Clone, Debug)]
pub enum Predicate {
    Eq(Operand, Operand),
    Neq(Operand, Operand),
    Lt(Operand, Operand),
    Le(Operand, Operand),
    Gt(Operand, Operand),
    Ge(Operand, Operand),
    Contains(Operand, Operand),
    StrStarts(Operand, Operand),
    StrEnds(Operand, Operand),
    Regex(Operand, String),
    Bound(ValueId),
    /// `VALUES ?var { a b c }` — the variable's bound value must be one of
    /// the given constants.
    Values(ValueId, Vec<ValueId>),
}

pub struct FilterNode {
    pub predicates: Vec<Predicate>,
}

impl FilterNode {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    pub fn passes(&self, token: &Token, interner: &Interner) -> bool {
        self.predicates.iter().all(|p| eval(p, token, interner))
    }
}

fn resolve<'a>(op: &Operand, token: &Token, interner: &'a Interner) -> Option<&'a str> {
    match op {
        Operand::Const(v) => Some(interner.resolve(*v)),
        Operand::Var(v) => token.bindings.get(v).map(|bound| interner.resolve(*bound)),
    }
}

/// Numeric coercion: a string is numeric iff it parses as an IEEE-754
/// double (spec §4.5). Comparisons on mixed kinds fall back to
/// lexicographic ordering.
fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn eval(pred: &Predicate, token: &Token, interner: &Interner) -> bool {
    match pred {
        Predicate::Eq(a, b) => match (resolve(a, token, interner), resolve(b, token, interner)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        Predicate::Neq(a, b) => match (resolve(a, token, interner), resolve(b, token, interner)) {
            (Some(x), Some(y)) => x != y,
            _ => false,
        },
        Predicate::Lt(a, b) => binary_cmp(a, b, token, interner, std::cmp::Ordering::is_lt),
        Predicate::Le(a, b) => binary_cmp(a, b, token, interner, std::cmp::Ordering::is_le),
        Predicate::Gt(a, b) => binary_cmp(a, b, token, interner, std::cmp::Ordering::is_gt),
        Predicate::Ge(a, b) => binary_cmp(a, b, token, interner, std::cmp::Ordering::is_ge),
        Predicate::Contains(a, b) => match (resolve(a, token, interner), resolve(b, token, interner)) {
            (Some(x), Some(y)) => x.contains(y),
            _ => false,
        },
        Predicate::StrStarts(a, b) => match (resolve(a, token, interner), resolve(b, token, interner)) {
            (Some(x), Some(y)) => x.starts_with(y),
            _ => false,
        },
        Predicate::StrEnds(a, b) => match (resolve(a, token, interner), resolve(b, token, interner)) {
            (Some(x), Some(y)) => x.ends_with(y),
            _ => false,
        },
        Predicate::Regex(a, pattern) => match resolve(a, token, interner) {
            Some(x) => Regex::new(pattern).map(|re| re.is_match(x)).unwrap_or(false),
            None => false,
        },
        Predicate::Bound(var) => token.bindings.contains_key(var),
        Predicate::Values(var, allowed) => match token.bindings.get(var) {
            Some(v) => allowed.contains(v),
            None => false,
        },
    }
}

fn binary_cmp(
    a: &Operand,
    b: &Operand,
    token: &Token,
    interner: &Interner,
    test: fn(std::cmp::Ordering) -> bool,
) -> bool {
    match (resolve(a, token, interner), resolve(b, token, interner)) {
        (Some(x), Some(y)) => test(compare(x, y)),
        _ => false,
    }
}
