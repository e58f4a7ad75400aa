//! String interning shared by every part of the engine.
//!
//! Facts have open, dynamic attribute schemas (spec §9 "Dynamic attribute
//! maps"). Rather than hashing and comparing raw strings on every fact
//! insertion, join, and index lookup, every attribute name *and* every
//! attribute value is interned once into a `lasso::Spur` (a `u32`). A fact
//! then becomes a sorted array of `(Spur, Spur)` pairs: content hashing and
//! equality become cheap integer-array operations, exactly as spec §9
//! recommends.
//!
//! The network runs single-threaded and cooperatively (spec §5): a single
//! `lasso::Rodeo` (not the thread-safe `ThreadedRodeo`) is owned by the
//! `Network` and threaded through by reference.

use lasso::{Rodeo, Spur};

/// An interned attribute name (e.g. `type`, `subject`, `concept`).
pub type AttrId = Spur;

/// An interned attribute value, source id, or variable name.
pub type ValueId = Spur;

pub struct Interner {
    rodeo: Rodeo,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            rodeo: Rodeo::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Spur {
        self.rodeo.get_or_intern(s)
    }

    pub fn resolve(&self, id: Spur) -> &str {
        self.rodeo.resolve(&id)
    }

    pub fn get(&self, s: &str) -> Option<Spur> {
        self.rodeo.get(s)
    }

    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_deduplicates() {
        let mut i = Interner::new();
        let a = i.intern("concept");
        let b = i.intern("concept");
        let c = i.intern("individual");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(i.resolve(a), "concept");
    }
}
