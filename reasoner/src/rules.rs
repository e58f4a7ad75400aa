//! Production templates & rule engine (C6, spec §4.6).
//!
//! Static rules are compiled once, at network construction, directly out of
//! the same α/β/production primitives a hand-written query compiles to —
//! there is no separate "rule" node kind (spec §9 "Polymorphic nodes").
//! Each rule below is a tiny fixed query whose production asserts an
//! inferred fact instead of delivering to a result sink.
//!
//! `same_as` is handled the same way: rather than rewriting every live
//! α-node index on a class merge (which the core's RETE-style memories do
//! not support without per-node special casing), symmetry and substitution
//! into `instance_of`/`role_assertion`/`data_assertion` are ordinary
//! productions here. [`crate::network::Network::maybe_union_same_as`] keeps
//! the union-find (`class_members`, representative lookups) in step as a
//! side observation, independent of this query-visible closure.
//!
//! `property_chain` is the one genuine *template* (a production factory):
//! see `Network::instantiate_property_chain`, triggered by the
//! [`crate::network::production::ProductionSink::PropertyChainTemplate`]
//! watcher installed below.

use crate::fact::FactStore;
use crate::intern::{AttrId, ValueId};
use crate::network::filter::{Operand, Predicate};
use crate::network::production::{ProductionSink, RuleAction};
use crate::network::Network;
use crate::shapes::PROPERTY_PATH_MAX_DEPTH;

fn shape(net: &mut Network, name: &str) -> ValueId {
    net.interner_mut().intern(name)
}

fn attr(net: &mut Network, name: &str) -> AttrId {
    net.interner_mut().intern(name)
}

fn var(net: &mut Network, name: &str) -> ValueId {
    net.interner_mut().intern(name)
}

/// Installs every static rule (spec §4.6 "Static rules") plus the
/// property-chain template watcher. Called once from `Network::new()`.
pub fn install_static_rules(net: &mut Network) {
    install_subsumption_transitivity(net);
    install_type_inheritance(net);
    install_sub_property_propagation(net);
    install_same_as_symmetry(net);
    install_same_as_substitution(net);
    install_property_chain_watcher(net);
}

/// `sub(a,b) ∧ sub(b,c) ⟹ sub(a,c)`, guarded `a ≠ c` to avoid trivial
/// self-subsumption loops.
fn install_subsumption_transitivity(net: &mut Network) {
    let type_attr = attr(net, "type");
    let subsumption = shape(net, "subsumption");
    let sub_attr = attr(net, "sub");
    let sup_attr = attr(net, "sup");
    let a = var(net, "?rule_sub_a");
    let b = var(net, "?rule_sub_b");
    let c = var(net, "?rule_sub_c");

    let left = net.get_or_create_alpha(
        vec![(type_attr, subsumption)],
        vec![(a, sub_attr), (b, sup_attr)],
    );
    let right = net.get_or_create_alpha(
        vec![(type_attr, subsumption)],
        vec![(b, sub_attr), (c, sup_attr)],
    );
    let joined = net.create_beta(left, right);
    let filtered = net.create_filter(joined, vec![Predicate::Neq(Operand::Var(a), Operand::Var(c))]);

    let action = RuleAction {
        name: "subsumption_transitivity".to_string(),
        build: Box::new(move |tok, facts| {
            let (Some(&va), Some(&vc)) = (tok.bindings.get(&a), tok.bindings.get(&c)) else {
                return Ok(None);
            };
            if chain_depth(tok, facts) > PROPERTY_PATH_MAX_DEPTH as u32 {
                return Ok(None);
            }
            Ok(Some((vec![(type_attr, subsumption), (sub_attr, va), (sup_attr, vc)], vec![])))
        }),
    };
    net.create_production(filtered, ProductionSink::Rule(action));
}

/// One past the deepest support chain feeding `tok`'s own constituent facts
/// (spec §9 Open Question 3, `SPEC_FULL.md` §E4 "hard-capped at depth 10"):
/// the depth the fact *being derived* would have if asserted.
fn chain_depth(tok: &crate::network::token::Token, facts: &FactStore) -> u32 {
    1 + tok.facts.iter().map(|&f| facts.depth(f)).max().unwrap_or(0)
}

/// `instance_of(x,c) ∧ sub(c,d) ⟹ instance_of(x,d)` (scenario (a)).
fn install_type_inheritance(net: &mut Network) {
    let type_attr = attr(net, "type");
    let instance_of = shape(net, "instance_of");
    let subsumption = shape(net, "subsumption");
    let individual_attr = attr(net, "individual");
    let concept_attr = attr(net, "concept");
    let sub_attr = attr(net, "sub");
    let sup_attr = attr(net, "sup");
    let x = var(net, "?rule_ti_x");
    let c = var(net, "?rule_ti_c");
    let d = var(net, "?rule_ti_d");

    let left = net.get_or_create_alpha(
        vec![(type_attr, instance_of)],
        vec![(x, individual_attr), (c, concept_attr)],
    );
    let right = net.get_or_create_alpha(vec![(type_attr, subsumption)], vec![(c, sub_attr), (d, sup_attr)]);
    let joined = net.create_beta(left, right);

    let action = RuleAction {
        name: "type_inheritance".to_string(),
        build: Box::new(move |tok, _facts| {
            let (Some(&vx), Some(&vd)) = (tok.bindings.get(&x), tok.bindings.get(&d)) else {
                return Ok(None);
            };
            Ok(Some((
                vec![(type_attr, instance_of), (individual_attr, vx), (concept_attr, vd)],
                vec![],
            )))
        }),
    };
    net.create_production(joined, ProductionSink::Rule(action));
}

/// `role_assertion(s,p,o) ∧ sub_property(sub=p,sup=q) ⟹ role_assertion(s,q,o)`.
fn install_sub_property_propagation(net: &mut Network) {
    let type_attr = attr(net, "type");
    let role_assertion = shape(net, "role_assertion");
    let sub_property = shape(net, "sub_property");
    let subject_attr = attr(net, "subject");
    let role_attr = attr(net, "role");
    let object_attr = attr(net, "object");
    let sub_attr = attr(net, "sub");
    let sup_attr = attr(net, "sup");
    let s = var(net, "?rule_sp_s");
    let p = var(net, "?rule_sp_p");
    let o = var(net, "?rule_sp_o");
    let q = var(net, "?rule_sp_q");

    let left = net.get_or_create_alpha(
        vec![(type_attr, role_assertion)],
        vec![(s, subject_attr), (p, role_attr), (o, object_attr)],
    );
    let right = net.get_or_create_alpha(vec![(type_attr, sub_property)], vec![(p, sub_attr), (q, sup_attr)]);
    let joined = net.create_beta(left, right);

    let action = RuleAction {
        name: "sub_property_propagation".to_string(),
        build: Box::new(move |tok, facts| {
            let (Some(&vs), Some(&vq), Some(&vo)) = (tok.bindings.get(&s), tok.bindings.get(&q), tok.bindings.get(&o))
            else {
                return Ok(None);
            };
            if chain_depth(tok, facts) > PROPERTY_PATH_MAX_DEPTH as u32 {
                return Ok(None);
            }
            Ok(Some((
                vec![
                    (type_attr, role_assertion),
                    (subject_attr, vs),
                    (role_attr, vq),
                    (object_attr, vo),
                ],
                vec![],
            )))
        }),
    };
    net.create_production(joined, ProductionSink::Rule(action));
}

/// `same_as(a,b) ⟹ same_as(b,a)`, guarded `a ≠ b`. Combined with the
/// substitution rules below this is enough for transitive closure: every
/// derived `same_as`/`instance_of`/… fact re-enters the network and can
/// itself trigger further substitutions.
fn install_same_as_symmetry(net: &mut Network) {
    let type_attr = attr(net, "type");
    let same_as = shape(net, "same_as");
    let ind1_attr = attr(net, "ind1");
    let ind2_attr = attr(net, "ind2");
    let a = var(net, "?rule_sym_a");
    let b = var(net, "?rule_sym_b");

    let alpha = net.get_or_create_alpha(vec![(type_attr, same_as)], vec![(a, ind1_attr), (b, ind2_attr)]);
    let filtered = net.create_filter(alpha, vec![Predicate::Neq(Operand::Var(a), Operand::Var(b))]);

    let action = RuleAction {
        name: "same_as_symmetry".to_string(),
        build: Box::new(move |tok, _facts| {
            let (Some(&va), Some(&vb)) = (tok.bindings.get(&a), tok.bindings.get(&b)) else {
                return Ok(None);
            };
            Ok(Some((vec![(type_attr, same_as), (ind1_attr, vb), (ind2_attr, va)], vec![])))
        }),
    };
    net.create_production(filtered, ProductionSink::Rule(action));
}

/// Four substitution rules, one per identity slot in the three assertion
/// shapes that name individuals (spec §9 "Equality (`same_as`)": "index
/// rewrites ... are the only place the α-network requires special care" —
/// here realized as ordinary derived facts instead of index surgery).
fn install_same_as_substitution(net: &mut Network) {
    let type_attr = attr(net, "type");
    let same_as = shape(net, "same_as");
    let ind1_attr = attr(net, "ind1");
    let ind2_attr = attr(net, "ind2");
    let x = var(net, "?rule_sa_x");
    let y = var(net, "?rule_sa_y");
    let same_as_alpha = net.get_or_create_alpha(vec![(type_attr, same_as)], vec![(x, ind1_attr), (y, ind2_attr)]);

    // instance_of(individual=x, concept=c) -> instance_of(individual=y, concept=c)
    {
        let instance_of = shape(net, "instance_of");
        let individual_attr = attr(net, "individual");
        let concept_attr = attr(net, "concept");
        let c = var(net, "?rule_sa_c");
        let left = net.get_or_create_alpha(vec![(type_attr, instance_of)], vec![(x, individual_attr), (c, concept_attr)]);
        let joined = net.create_beta(left, same_as_alpha);
        let action = RuleAction {
            name: "same_as_substitution:instance_of".to_string(),
            build: Box::new(move |tok, _facts| {
                let (Some(&vy), Some(&vc)) = (tok.bindings.get(&y), tok.bindings.get(&c)) else {
                    return Ok(None);
                };
                Ok(Some((vec![(type_attr, instance_of), (individual_attr, vy), (concept_attr, vc)], vec![])))
            }),
        };
        net.create_production(joined, ProductionSink::Rule(action));
    }

    // role_assertion(subject=x, role=p, object=o) -> role_assertion(subject=y, role=p, object=o)
    {
        let role_assertion = shape(net, "role_assertion");
        let subject_attr = attr(net, "subject");
        let role_attr = attr(net, "role");
        let object_attr = attr(net, "object");
        let p = var(net, "?rule_sa_p1");
        let o = var(net, "?rule_sa_o1");
        let left = net.get_or_create_alpha(
            vec![(type_attr, role_assertion)],
            vec![(x, subject_attr), (p, role_attr), (o, object_attr)],
        );
        let joined = net.create_beta(left, same_as_alpha);
        let action = RuleAction {
            name: "same_as_substitution:role_subject".to_string(),
            build: Box::new(move |tok, _facts| {
                let (Some(&vy), Some(&vp), Some(&vo)) =
                    (tok.bindings.get(&y), tok.bindings.get(&p), tok.bindings.get(&o))
                else {
                    return Ok(None);
                };
                Ok(Some((
                    vec![(type_attr, role_assertion), (subject_attr, vy), (role_attr, vp), (object_attr, vo)],
                    vec![],
                )))
            }),
        };
        net.create_production(joined, ProductionSink::Rule(action));
    }

    // role_assertion(subject=s, role=p, object=x) -> role_assertion(subject=s, role=p, object=y)
    {
        let role_assertion = shape(net, "role_assertion");
        let subject_attr = attr(net, "subject");
        let role_attr = attr(net, "role");
        let object_attr = attr(net, "object");
        let s = var(net, "?rule_sa_s2");
        let p = var(net, "?rule_sa_p2");
        let left = net.get_or_create_alpha(
            vec![(type_attr, role_assertion)],
            vec![(s, subject_attr), (p, role_attr), (x, object_attr)],
        );
        let joined = net.create_beta(left, same_as_alpha);
        let action = RuleAction {
            name: "same_as_substitution:role_object".to_string(),
            build: Box::new(move |tok, _facts| {
                let (Some(&vs), Some(&vp), Some(&vy)) =
                    (tok.bindings.get(&s), tok.bindings.get(&p), tok.bindings.get(&y))
                else {
                    return Ok(None);
                };
                Ok(Some((
                    vec![(type_attr, role_assertion), (subject_attr, vs), (role_attr, vp), (object_attr, vy)],
                    vec![],
                )))
            }),
        };
        net.create_production(joined, ProductionSink::Rule(action));
    }

    // data_assertion(subject=x, property=p, value=v) -> data_assertion(subject=y, property=p, value=v)
    {
        let data_assertion = shape(net, "data_assertion");
        let subject_attr = attr(net, "subject");
        let property_attr = attr(net, "property");
        let value_attr = attr(net, "value");
        let p = var(net, "?rule_sa_p3");
        let v = var(net, "?rule_sa_v3");
        let left = net.get_or_create_alpha(
            vec![(type_attr, data_assertion)],
            vec![(x, subject_attr), (p, property_attr), (v, value_attr)],
        );
        let joined = net.create_beta(left, same_as_alpha);
        let action = RuleAction {
            name: "same_as_substitution:data".to_string(),
            build: Box::new(move |tok, _facts| {
                let (Some(&vy), Some(&vp), Some(&vv)) =
                    (tok.bindings.get(&y), tok.bindings.get(&p), tok.bindings.get(&v))
                else {
                    return Ok(None);
                };
                Ok(Some((
                    vec![(type_attr, data_assertion), (subject_attr, vy), (property_attr, vp), (value_attr, vv)],
                    vec![],
                )))
            }),
        };
        net.create_production(joined, ProductionSink::Rule(action));
    }
}

/// Watches for `property_chain` facts and hands each one to
/// `Network::instantiate_property_chain` (spec §4.6 "Templates", scenario
/// (b)). `chain` is encoded as a comma-joined ordered list of property
/// names (spec §3 leaves the string encoding of "ordered list" to the
/// implementer; see `SPEC_FULL.md` §E4).
fn install_property_chain_watcher(net: &mut Network) {
    let type_attr = attr(net, "type");
    let property_chain = shape(net, "property_chain");
    let super_attr = attr(net, "super_property");
    let chain_attr = attr(net, "chain");
    let super_var = var(net, "?chain_super");
    let chain_var = var(net, "?chain_props");

    let alpha = net.get_or_create_alpha(
        vec![(type_attr, property_chain)],
        vec![(super_var, super_attr), (chain_var, chain_attr)],
    );
    net.create_production(alpha, ProductionSink::PropertyChainTemplate);
}
