//! Persistence (spec §4.7, §6, §8 scenarios (b)/(e)/(f)): a versioned base
//! snapshot, an append-only CRC32-protected delta journal, eager or lazy
//! (memory-mapped) loading, and the [`hybrid::Hybrid`] handle that ties a
//! base and its journal together for everyday use.

pub(crate) mod delta;
pub(crate) mod format;
pub mod hybrid;
pub mod lazy;
pub(crate) mod snapshot;

pub use hybrid::Hybrid;
pub use lazy::LazySnapshot;

use std::path::Path;

use crate::error::{EngineError, Result};
use crate::network::Network;

impl Network {
    /// Writes every asserted fact to `path` as a base snapshot (spec §4.7
    /// "Save"). Atomic: writes `path.tmp`, fsyncs, then renames over
    /// `path` (or a versioned sibling if the rename isn't permitted).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        snapshot::save(self, path.as_ref())
    }

    /// Loads a base snapshot eagerly: every row is decoded up front and
    /// replayed through the ordinary fact-ingress path into a fresh
    /// network, re-deriving every inference (spec §4.7 "Load" — *Eager*).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        snapshot::load_eager(path.as_ref())
    }

    /// Opens a base snapshot lazily: only the header and row-lengths table
    /// are read up front (via `mmap`), and the returned network answers
    /// queries straight out of the mapped file until the first mutation
    /// promotes it to eager (spec §4.7 "Load" — *Lazy*).
    pub fn load_lazy(path: impl AsRef<Path>) -> Result<Self> {
        let lazy = snapshot::open_lazy(path.as_ref())?;
        let mut net = Self::new();
        net.lazy = Some(lazy);
        Ok(net)
    }

    /// How many facts a lazily-opened network's mapped snapshot holds,
    /// without materializing. Returns `0` for an eager network (its count
    /// is [`Network::facts`]`.len()` instead).
    pub fn lazy_fact_count(&self) -> u64 {
        self.lazy.as_ref().map(|s| s.fact_count()).unwrap_or(0)
    }

    /// Looks up one fact's attributes directly in the mapped snapshot
    /// without materializing the network. Returns `None` if the network
    /// isn't lazy or the id isn't present in the base.
    pub fn lazy_get(&self, id: crate::fact::FactId) -> Option<Vec<(String, String)>> {
        self.lazy.as_ref()?.get(id)
    }

    /// Every `(fact_id, attrs)` pair in the mapped snapshot, decoded on
    /// demand, without materializing the network.
    pub fn lazy_iterate(&self) -> Vec<(crate::fact::FactId, Vec<(String, String)>)> {
        self.lazy.as_ref().map(|s| s.iterate()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trips_inferred_facts() {
        let mut net = Network::new();
        net.add_triple("Cat", "subconcept_of", "Mammal").unwrap();
        net.add_triple("Mammal", "subconcept_of", "Animal").unwrap();
        net.add_triple("Felix", "type", "Cat").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        net.save(&path).unwrap();

        let mut loaded = Network::load(&path).unwrap();
        let table = loaded
            .pattern(
                vec![crate::query::Triple::new(
                    crate::query::Term::constant("Felix"),
                    "type".to_string(),
                    crate::query::Term::constant("Animal"),
                )],
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
                false,
            )
            .unwrap();
        assert_eq!(table.num_rows(), 1);
    }

    #[test]
    fn lazy_load_materializes_on_first_mutation() {
        let mut net = Network::new();
        net.add_triple("Felix", "type", "Cat").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        net.save(&path).unwrap();

        let mut lazy_net = Network::load_lazy(&path).unwrap();
        assert!(lazy_net.is_lazy());
        assert_eq!(lazy_net.lazy_fact_count(), 1);

        lazy_net.add_triple("Tom", "type", "Cat").unwrap();
        assert!(!lazy_net.is_lazy());
        assert_eq!(lazy_net.facts().len(), 2);
    }

    #[test]
    fn mismatched_delta_base_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("graph.bin");
        {
            let mut h = Hybrid::open(&base).unwrap();
            h.add_fact(vec![("individual".to_string(), "Felix".to_string())]).unwrap();
            h.save().unwrap();
        }
        // Overwrite the base with different content so its fingerprint no
        // longer matches the existing delta's recorded base_fingerprint.
        let mut net = Network::new();
        net.add_triple("Tom", "type", "Cat").unwrap();
        net.save(&base).unwrap();

        match Hybrid::open(&base) {
            Err(EngineError::IncompatibleBase) => {}
            Ok(_) => panic!("expected IncompatibleBase, got Ok"),
            Err(e) => panic!("expected IncompatibleBase, got {e:?}"),
        }
    }
}
