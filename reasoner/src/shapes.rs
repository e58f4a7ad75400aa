//! Canonical fact shapes (spec §3 "Canonical fact shapes the core must
//! recognize"). Used by [`crate::network::Network::validate_shape`] to
//! decide whether a freshly-added fact is malformed, and by the query
//! planner (C4) to recognize `type`-only triples as the `instance_of`
//! shape rather than a role/data predicate.

pub struct ShapeDef {
    pub name: &'static str,
    pub required: &'static [&'static str],
}

pub const SHAPES: &[ShapeDef] = &[
    ShapeDef { name: "instance_of", required: &["individual", "concept"] },
    ShapeDef { name: "role_assertion", required: &["subject", "role", "object"] },
    ShapeDef { name: "data_assertion", required: &["subject", "property", "value"] },
    ShapeDef { name: "subsumption", required: &["sub", "sup"] },
    ShapeDef { name: "same_as", required: &["ind1", "ind2"] },
    ShapeDef { name: "property_chain", required: &["super_property", "chain"] },
    ShapeDef { name: "sub_property", required: &["sub", "sup"] },
    ShapeDef { name: "some_values_from", required: &["property", "filler"] },
    ShapeDef { name: "all_values_from", required: &["property", "filler"] },
    ShapeDef { name: "min_cardinality", required: &["property", "cardinality"] },
    ShapeDef { name: "max_cardinality", required: &["property", "cardinality"] },
    ShapeDef { name: "exact_cardinality", required: &["property", "cardinality"] },
];

pub fn requirements_for(shape: &str) -> Option<&'static [&'static str]> {
    SHAPES.iter().find(|s| s.name == shape).map(|s| s.required)
}

/// Hard cap on `property_path` / `sub_property` transitive-closure depth
/// (spec §9 Open Question, resolved in `SPEC_FULL.md` §E4: silently
/// truncated, not an error).
pub const PROPERTY_PATH_MAX_DEPTH: usize = 10;
