//! Live (subscribed) query handles (spec §6 "the notification carries
//! `(binding_map, is_addition)`").

use std::collections::HashMap;

use crate::intern::Interner;
use crate::network::node::NodeId;
use crate::network::production::LiveQueue;

/// A standing subscription to a compiled pattern. Each call to
/// [`LiveResultSet::poll_changes`] drains whatever `(binding, is_addition)`
/// pairs have accumulated since the last poll — additions and removals as
/// facts flow through `add_fact`/`remove_by_id` (spec §4.3 "Propagation
/// protocol").
pub struct LiveResultSet {
    node: NodeId,
    queue: LiveQueue,
    variables: Vec<String>,
}

impl LiveResultSet {
    pub(crate) fn new(node: NodeId, queue: LiveQueue, variables: Vec<String>) -> Self {
        Self { node, queue, variables }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Drains every change queued since the last poll, resolving interned
    /// values back to strings.
    pub fn poll_changes(&self, interner: &Interner) -> Vec<(HashMap<String, String>, bool)> {
        let mut out = Vec::new();
        let mut q = self.queue.borrow_mut();
        while let Some(change) = q.pop_front() {
            let mut row = HashMap::new();
            for (var, val) in &change.bindings {
                let name = interner.resolve(*var);
                let name = name.strip_prefix('?').unwrap_or(name);
                row.insert(name.to_string(), interner.resolve(*val).to_string());
            }
            out.push((row, change.is_addition));
        }
        out
    }

    /// Stops delivering further changes to this handle. The compiled
    /// fragment itself stays in the network — node removal isn't part of
    /// this core's surface (the discrimination network is append-only, like
    /// the fact store's inferred-fact support graph) — so other live or
    /// cached queries sharing the same sub-fragment are unaffected. Dropping
    /// the handle has the same effect; this exists for callers that want to
    /// signal intent without waiting on drop order.
    pub fn unsubscribe(self) {
        self.queue.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn poll_changes_drains_queue_and_strips_var_prefix() {
        let mut interner = Interner::new();
        let x = interner.intern("?x");
        let felix = interner.intern("Felix");
        let queue: LiveQueue = Rc::new(RefCell::new(std::collections::VecDeque::new()));
        queue.borrow_mut().push_back(crate::network::production::LiveChange {
            bindings: {
                let mut b = crate::network::token::Bindings::new();
                b.insert(x, felix);
                b
            },
            is_addition: true,
        });
        let live = LiveResultSet::new(0, queue, vec!["x".to_string()]);
        let changes = live.poll_changes(&interner);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.get("x"), Some(&"Felix".to_string()));
        assert!(changes[0].1);
        assert!(live.poll_changes(&interner).is_empty());
    }
}
