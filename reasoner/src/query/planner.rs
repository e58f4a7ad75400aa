//! Query planner / compiler (C4, spec §4.4).
//!
//! Turns a conjunction of [`Triple`]s (plus inline filters/VALUES/NOT
//! EXISTS/MINUS) into a discrimination-network fragment rooted at one
//! production node, reusing the network's existing alpha/beta fingerprint
//! cache for "existing sub-fragments matching a structural fingerprint are
//! reused" (spec §4.4 step 4) and its own cache-key → production map for
//! "re-submitting an equivalent query returns the existing production"
//! (spec §4.3 "Production caching").

use crate::intern::{AttrId, ValueId};
use crate::network::filter::{Operand, Predicate};
use crate::network::node::NodeId;
use crate::network::Network;
use crate::query::filter_expr::{Atom, CompareOp};
use crate::query::term::{Term, Triple};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Role,
    Data,
    SameAs,
}

/// spec §4.4 step 1: "Unknown predicates default to role when O looks like
/// an identifier, data when O looks like a literal."
pub fn looks_like_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
        && s.parse::<f64>().is_err()
}

/// Property-type detection (spec §4.4 step 1). Cached plans are **not**
/// re-classified when fact shapes change later (`SPEC_FULL.md` §E4, §9
/// Open Question 2) — a predicate's kind is fixed the first time a pattern
/// referencing it is compiled, for the life of that production.
pub fn classify_predicate(net: &Network, predicate: &str, object_hint: &Term) -> PropertyKind {
    if predicate == "same_as" {
        return PropertyKind::SameAs;
    }
    if let Some(pred_val) = net.interner().get(predicate) {
        if let Some(role_attr) = net.interner().get("role") {
            if !net.facts().index_by_attribute(role_attr, pred_val).is_empty() {
                return PropertyKind::Role;
            }
        }
        if let Some(prop_attr) = net.interner().get("property") {
            if !net.facts().index_by_attribute(prop_attr, pred_val).is_empty() {
                return PropertyKind::Data;
            }
        }
    }
    match object_hint {
        Term::Const(c) if looks_like_identifier(c) => PropertyKind::Role,
        Term::Const(_) => PropertyKind::Data,
        Term::Var(_) => PropertyKind::Role,
    }
}

fn bind_or_test(
    net: &mut Network,
    term: &Term,
    attr: AttrId,
    tests: &mut Vec<(AttrId, ValueId)>,
    bind: &mut Vec<(ValueId, AttrId)>,
) {
    match term {
        Term::Const(c) => {
            let v = net.interner_mut().intern(c);
            tests.push((attr, v));
        }
        Term::Var(name) => {
            // "?"-prefixed so a variable named e.g. "Felix" can never collide
            // with an interned constant value of the same spelling.
            let v = net.interner_mut().intern(&format!("?{name}"));
            bind.push((v, attr));
        }
    }
}

/// Expands one triple into an α test/bind pair (spec §4.4 step 2, "Pattern
/// expansion"), e.g. `(?x, type, C) -> type=instance_of ∧ concept=C ∧
/// individual=?x`.
fn expand_triple(net: &mut Network, triple: &Triple) -> (Vec<(AttrId, ValueId)>, Vec<(ValueId, AttrId)>) {
    let type_attr = net.interner_mut().intern("type");

    if triple.predicate == "type" {
        let instance_of = net.interner_mut().intern("instance_of");
        let individual_attr = net.interner_mut().intern("individual");
        let concept_attr = net.interner_mut().intern("concept");
        let mut tests = vec![(type_attr, instance_of)];
        let mut bind = Vec::new();
        bind_or_test(net, &triple.subject, individual_attr, &mut tests, &mut bind);
        bind_or_test(net, &triple.object, concept_attr, &mut tests, &mut bind);
        return (tests, bind);
    }

    match classify_predicate(net, &triple.predicate, &triple.object) {
        PropertyKind::Role => {
            let role_assertion = net.interner_mut().intern("role_assertion");
            let subject_attr = net.interner_mut().intern("subject");
            let role_attr = net.interner_mut().intern("role");
            let object_attr = net.interner_mut().intern("object");
            let predicate_val = net.interner_mut().intern(&triple.predicate);
            let mut tests = vec![(type_attr, role_assertion), (role_attr, predicate_val)];
            let mut bind = Vec::new();
            bind_or_test(net, &triple.subject, subject_attr, &mut tests, &mut bind);
            bind_or_test(net, &triple.object, object_attr, &mut tests, &mut bind);
            (tests, bind)
        }
        PropertyKind::Data => {
            let data_assertion = net.interner_mut().intern("data_assertion");
            let subject_attr = net.interner_mut().intern("subject");
            let property_attr = net.interner_mut().intern("property");
            let value_attr = net.interner_mut().intern("value");
            let predicate_val = net.interner_mut().intern(&triple.predicate);
            let mut tests = vec![(type_attr, data_assertion), (property_attr, predicate_val)];
            let mut bind = Vec::new();
            bind_or_test(net, &triple.subject, subject_attr, &mut tests, &mut bind);
            bind_or_test(net, &triple.object, value_attr, &mut tests, &mut bind);
            (tests, bind)
        }
        PropertyKind::SameAs => {
            let same_as = net.interner_mut().intern("same_as");
            let ind1_attr = net.interner_mut().intern("ind1");
            let ind2_attr = net.interner_mut().intern("ind2");
            let mut tests = vec![(type_attr, same_as)];
            let mut bind = Vec::new();
            bind_or_test(net, &triple.subject, ind1_attr, &mut tests, &mut bind);
            bind_or_test(net, &triple.object, ind2_attr, &mut tests, &mut bind);
            (tests, bind)
        }
    }
}

/// Builds the attribute map for a ground `(subject, predicate, object)`
/// triple (spec §6 "Fact-ingress interface", `add_triple`) using the same
/// predicate classification `expand_triple` uses for pattern compilation,
/// so a fact inserted via `add_triple` and one inserted as raw attrs always
/// land under the same canonical shape.
pub fn ground_triple_attrs(net: &mut Network, subject: &str, predicate: &str, object: &str) -> Vec<(AttrId, ValueId)> {
    let triple = Triple::new(Term::constant(subject), predicate.to_string(), Term::constant(object));
    let (tests, _bind) = expand_triple(net, &triple);
    tests
}

/// Variables a triple pattern binds (used by the greedy join-ordering
/// heuristic, spec §4.4 step 3).
fn triple_vars(triple: &Triple) -> Vec<&str> {
    let mut out = Vec::new();
    if let Term::Var(v) = &triple.subject {
        out.push(v.as_str());
    }
    if let Term::Var(v) = &triple.object {
        out.push(v.as_str());
    }
    out
}

/// Greedily orders triples by estimated selectivity: fully-bound patterns
/// (no variables) first, then patterns sharing a variable with an
/// already-ordered pattern, then the rest in original order (spec §4.4 step
/// 3, "a heuristic, not a cost-model").
fn order_triples(triples: &[Triple]) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..triples.len()).collect();
    let mut ordered = Vec::with_capacity(triples.len());
    let mut bound_vars: std::collections::HashSet<&str> = std::collections::HashSet::new();

    remaining.sort_by_key(|&i| {
        let unbound = triples[i]
            .subject
            .as_var()
            .is_some() as usize
            + triples[i].object.as_var().is_some() as usize;
        unbound
    });

    while !remaining.is_empty() {
        let pick_pos = remaining
            .iter()
            .position(|&i| triple_vars(&triples[i]).iter().any(|v| bound_vars.contains(v)))
            .unwrap_or(0);
        let idx = remaining.remove(pick_pos);
        for v in triple_vars(&triples[idx]) {
            bound_vars.insert(v);
        }
        ordered.push(idx);
    }
    ordered
}

/// Builds the α chain + β joins for a conjunction of triples, returning the
/// leaf node id to attach filters/negations/a production to.
pub fn compile_conjunction(net: &mut Network, triples: &[Triple]) -> Option<NodeId> {
    if triples.is_empty() {
        return None;
    }
    let order = order_triples(triples);
    let mut leaf: Option<NodeId> = None;
    for idx in order {
        let (tests, bind) = expand_triple(net, &triples[idx]);
        let alpha = net.get_or_create_alpha(tests, bind);
        leaf = Some(match leaf {
            None => alpha,
            Some(prev) => net.create_beta(prev, alpha),
        });
    }
    leaf
}

/// Lowers one [`Atom`] into a network-level [`Predicate`] (spec §4.5
/// "Built-in predicates").
pub fn lower_atom(net: &mut Network, atom: &Atom) -> Predicate {
    let op = |net: &mut Network, t: &Term| -> Operand {
        match t {
            Term::Var(name) => Operand::Var(net.interner_mut().intern(&format!("?{name}"))),
            Term::Const(c) => Operand::Const(net.interner_mut().intern(c)),
        }
    };
    match atom {
        Atom::Compare(CompareOp::Eq, a, b) => Predicate::Eq(op(net, a), op(net, b)),
        Atom::Compare(CompareOp::Neq, a, b) => Predicate::Neq(op(net, a), op(net, b)),
        Atom::Compare(CompareOp::Lt, a, b) => Predicate::Lt(op(net, a), op(net, b)),
        Atom::Compare(CompareOp::Le, a, b) => Predicate::Le(op(net, a), op(net, b)),
        Atom::Compare(CompareOp::Gt, a, b) => Predicate::Gt(op(net, a), op(net, b)),
        Atom::Compare(CompareOp::Ge, a, b) => Predicate::Ge(op(net, a), op(net, b)),
        Atom::Contains(a, b) => Predicate::Contains(op(net, a), op(net, b)),
        Atom::StrStarts(a, b) => Predicate::StrStarts(op(net, a), op(net, b)),
        Atom::StrEnds(a, b) => Predicate::StrEnds(op(net, a), op(net, b)),
        Atom::Regex(a, pattern) => Predicate::Regex(op(net, a), pattern.clone()),
        Atom::Bound(name) => Predicate::Bound(net.interner_mut().intern(&format!("?{name}"))),
    }
}

/// Shared variables between a left and right conjunction (used to build
/// negation/left-outer-join equality and `VALUES` membership tests).
pub fn shared_vars(a: &[Triple], b: &[Triple]) -> Vec<String> {
    let a_vars: std::collections::HashSet<&str> = a.iter().flat_map(triple_vars).collect();
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for t in b {
        for v in triple_vars(t) {
            if a_vars.contains(v) && seen.insert(v) {
                out.push(v.to_string());
            }
        }
    }
    out
}

/// Builds a `VALUES ?var { a b c }` filter (spec §4.3 "Filter node ...
/// VALUES list").
pub fn values_predicate(net: &mut Network, var: &str, allowed: &[String]) -> Predicate {
    let var_id = net.interner_mut().intern(&format!("?{var}"));
    let allowed_ids = allowed.iter().map(|v| net.interner_mut().intern(v)).collect();
    Predicate::Values(var_id, allowed_ids)
}

/// Interns `var`'s network-level spur (the "?"-prefixed form used as a
/// token binding key), for callers building negation join-var lists.
pub fn var_spur(net: &mut Network, var: &str) -> ValueId {
    net.interner_mut().intern(&format!("?{var}"))
}

/// Canonicalizes a cache key: a sequence of triples (as `subject predicate
/// object` with variables renamed by first-occurrence order to `$0`, `$1`,
/// …) plus the filter/values/not_exists clauses in their original order
/// (`SPEC_FULL.md` §E4 / §9 Open Question 1 — literal order is preserved,
/// not sorted, since reordering could change join semantics when a
/// variable appears in different slots across patterns).
pub fn cache_key(triples: &[Triple], where_: &[Atom], values: &[(String, Vec<String>)], not_exists: &[Vec<Triple>]) -> String {
    let mut next = 0usize;
    let canon_term = |t: &Term, rename: &mut std::collections::HashMap<String, String>, next: &mut usize| -> String {
        match t {
            Term::Const(c) => format!("={c}"),
            Term::Var(v) => {
                let entry = rename.entry(v.clone()).or_insert_with(|| {
                    let name = format!("${next}");
                    *next += 1;
                    name
                });
                entry.clone()
            }
        }
    };
    let mut owned_rename: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut buf = String::new();
    for t in triples {
        buf.push_str(&canon_term(&t.subject, &mut owned_rename, &mut next));
        buf.push(' ');
        buf.push_str(&t.predicate);
        buf.push(' ');
        buf.push_str(&canon_term(&t.object, &mut owned_rename, &mut next));
        buf.push('.');
    }
    for ne in not_exists {
        buf.push_str("NE[");
        for t in ne {
            buf.push_str(&canon_term(&t.subject, &mut owned_rename, &mut next));
            buf.push(' ');
            buf.push_str(&t.predicate);
            buf.push(' ');
            buf.push_str(&canon_term(&t.object, &mut owned_rename, &mut next));
            buf.push('.');
        }
        buf.push(']');
    }
    for (var, allowed) in values {
        let canon = owned_rename.get(var).cloned().unwrap_or_else(|| var.clone());
        buf.push_str(&format!("VALUES[{canon}={}]", allowed.join(",")));
    }
    for atom in where_ {
        buf.push_str(&format!("{atom:?}"));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ignores_variable_spelling() {
        let a = vec![Triple::new(Term::var("x"), "type".to_string(), Term::constant("Foo"))];
        let b = vec![Triple::new(Term::var("y"), "type".to_string(), Term::constant("Foo"))];
        assert_eq!(cache_key(&a, &[], &[], &[]), cache_key(&b, &[], &[], &[]));
    }

    #[test]
    fn looks_like_identifier_rejects_numbers() {
        assert!(looks_like_identifier("Cat"));
        assert!(!looks_like_identifier("42"));
        assert!(!looks_like_identifier("3.14"));
    }
}
