//! Production nodes (spec §4.3, GLOSSARY).
//!
//! Terminal nodes. Maintain the live token set that is the answer to a
//! compiled query, and on change either deliver to a result sink (plain or
//! live query) or invoke a rule action that asserts an inferred fact.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::fact::{FactId, FactStore};
use crate::intern::{AttrId, ValueId};
use crate::network::token::Token;

/// One incremental change delivered to a live query subscriber (spec §6
/// "the notification carries `(binding_map, is_addition)`").
pub struct LiveChange {
    pub bindings: crate::network::token::Bindings,
    pub is_addition: bool,
}

pub type LiveQueue = Rc<RefCell<VecDeque<LiveChange>>>;

/// Result of a rule action: the attribute map of the fact to assert plus any
/// extra support-fact ids beyond the triggering token's own facts (a
/// template-instantiated production, e.g. property-chain composition, wants
/// the defining fact included in the derived fact's support set so deleting
/// the definition retracts every fact it derived). `None` skips this token;
/// `Err` means the action itself failed (divide-by-zero, bad regex, …) and
/// the triggering assertion is rolled back (spec §4.3 "Failure semantics",
/// §7).
pub type ActionResult = Result<Option<(Vec<(AttrId, ValueId)>, Vec<FactId>)>, String>;

/// A rule action: given the triggering token and read-only access to the
/// fact store (for depth lookups, spec §9 Open Question 3), produce the
/// attribute map of the fact to assert, plus the rule's name for provenance
/// (spec §4.6, §4.7 "template registry").
pub struct RuleAction {
    pub name: String,
    pub build: Box<dyn Fn(&Token, &FactStore) -> ActionResult>,
}

pub enum ProductionSink {
    Query,
    LiveQuery(LiveQueue),
    Rule(RuleAction),
    /// Watches for triggering facts of a template (spec §4.6, GLOSSARY
    /// "Template"); each addition asks the network to instantiate a fresh
    /// concrete join chain. Currently the only template the core ships is
    /// property-chain composition (spec §4.6, scenario (b)).
    PropertyChainTemplate,
}

pub struct ProductionNode {
    pub live: IndexMap<Vec<FactId>, Token>,
    pub sink: ProductionSink,
}

impl ProductionNode {
    pub fn new(sink: ProductionSink) -> Self {
        Self {
            live: IndexMap::new(),
            sink,
        }
    }

    pub fn is_live_query(&self) -> bool {
        matches!(self.sink, ProductionSink::LiveQuery(_))
    }
}
