//! Rule-action agenda (spec §9 "Rule actions and re-entrancy").
//!
//! A rule action firing during propagation must not immediately re-enter
//! the network — it is queued here and drained only after the current
//! top-level operation reaches quiescence. This bounds recursion depth and
//! keeps intermediate states well-defined for snapshots.

use std::collections::VecDeque;

use crate::fact::{FactId, SourceId};
use crate::intern::{AttrId, ValueId};

pub enum AgendaItem {
    AssertFact {
        attrs: Vec<(AttrId, ValueId)>,
        source: Option<SourceId>,
        inferred_by: String,
        support: Vec<FactId>,
    },
}

#[derive(Default)]
pub struct Agenda {
    queue: VecDeque<AgendaItem>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: AgendaItem) {
        self.queue.push_back(item);
    }

    pub fn pop(&mut self) -> Option<AgendaItem> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
