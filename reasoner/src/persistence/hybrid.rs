//! The `Hybrid` handle (spec §4.7 "Hybrid handle", §6): a base snapshot
//! plus a live `Network` plus the delta journal that captures every
//! mutation made since the base was written or last compacted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::EngineError;
use crate::fact::FactId;
use crate::network::Network;
use crate::persistence::delta::DeltaJournal;
use crate::persistence::format::{self, DeltaOp};
use crate::persistence::snapshot;

fn delta_path_for(base_path: &Path) -> PathBuf {
    let mut s = base_path.as_os_str().to_os_string();
    s.push(".delta");
    PathBuf::from(s)
}

fn apply_op(net: &mut Network, op: &DeltaOp, added: &mut usize, removed: &mut usize) -> Result<(), EngineError> {
    match op {
        DeltaOp::AddFact(p) => {
            let attrs = p.attrs.iter().map(|(a, v)| (net.interner_mut().intern(a), net.interner_mut().intern(v))).collect();
            let (id, was_added) = net.add_fact(attrs)?;
            if was_added {
                *added += 1;
            }
            if id != crate::network::PENDING_FACT_ID {
                if let Some(src) = &p.source {
                    let src_id = net.interner_mut().intern(src);
                    net.facts.attach_source(id, src_id);
                }
            }
        }
        DeltaOp::AddSourceBatch(p) => {
            let src_id = net.interner_mut().intern(&p.source);
            for fact_attrs in &p.facts {
                let attrs =
                    fact_attrs.iter().map(|(a, v)| (net.interner_mut().intern(a), net.interner_mut().intern(v))).collect();
                let (_id, was_added) = net.add_fact_with_source(attrs, src_id)?;
                if was_added {
                    *added += 1;
                }
            }
        }
        DeltaOp::RemoveSource(p) => {
            if let Some(src_id) = net.interner().get(&p.source) {
                let count = net.remove_source(src_id)?;
                *removed += count;
            }
        }
        DeltaOp::RemoveFact(p) => {
            if net.remove_by_id(p.id)? {
                *removed += 1;
            }
        }
    }
    Ok(())
}

/// A running snapshot compaction: the worker thread operates only on a
/// plain `Vec<FactRow>` copied out before spawning, never on `Network`
/// itself, so it needs no `Send` bound on the reasoner's `Rc`-based live
/// query queues.
type CompactionHandle = JoinHandle<Result<PathBuf, EngineError>>;

/// Base snapshot + live network + delta journal, combined into the one
/// handle spec §6 describes as the normal way to open a persisted
/// reasoner: reads go through the in-memory `Network`, writes go to both
/// the network and the journal, and `compact`/`compact_async` fold the
/// journal back into a fresh base.
pub struct Hybrid {
    base_path: PathBuf,
    delta_path: PathBuf,
    net: Network,
    journal: DeltaJournal,
    base_fact_count: usize,
    delta_fact_count: usize,
    deleted_fact_count: usize,
    compacting: Arc<AtomicBool>,
    pending: Option<(CompactionHandle, u64, u64)>,
}

impl Hybrid {
    /// Opens `base_path` (replaying its base snapshot, if one exists, then
    /// its delta journal) or starts a fresh empty network bound to that
    /// path if neither file exists yet.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let base_path = base_path.as_ref().to_path_buf();

        let (mut net, base_fingerprint, base_fact_count) = if snapshot::resolve_current(&base_path).is_some() {
            let net = snapshot::load_eager(&base_path)?;
            let fingerprint = snapshot::fingerprint_of_base(&base_path)?;
            let count = net.facts().len();
            (net, fingerprint, count)
        } else {
            (Network::new(), format::fingerprint_of(&[]), 0)
        };

        let delta_path = delta_path_for(&base_path);
        let (journal, ops) = if delta_path.exists() {
            DeltaJournal::open_existing(&delta_path, base_fingerprint)?
        } else {
            (DeltaJournal::create(&delta_path, base_fingerprint)?, Vec::new())
        };

        let mut delta_fact_count = 0usize;
        let mut deleted_fact_count = 0usize;
        for op in &ops {
            apply_op(&mut net, op, &mut delta_fact_count, &mut deleted_fact_count)?;
        }

        Ok(Self {
            base_path,
            delta_path,
            net,
            journal,
            base_fact_count,
            delta_fact_count,
            deleted_fact_count,
            compacting: Arc::new(AtomicBool::new(false)),
            pending: None,
        })
    }

    /// Fsyncs the journal and drops the handle.
    pub fn close(self) -> Result<(), EngineError> {
        self.journal.sync()
    }

    /// Read access to the live network underlying this handle — queries
    /// run against it directly, unaffected by the journal's on-disk form.
    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.net
    }

    fn add_fact_with_source_opt(&mut self, attrs: Vec<(String, String)>, source: Option<String>) -> Result<(FactId, bool), EngineError> {
        let interned: Vec<_> =
            attrs.iter().map(|(a, v)| (self.net.interner_mut().intern(a), self.net.interner_mut().intern(v))).collect();
        let (id, added) = match &source {
            Some(s) => {
                let src_id = self.net.interner_mut().intern(s);
                self.net.add_fact_with_source(interned, src_id)?
            }
            None => self.net.add_fact(interned)?,
        };
        if added {
            self.delta_fact_count += 1;
        }
        self.journal.append(&DeltaOp::AddFact(format::AddFactPayload { attrs, source }))?;
        Ok((id, added))
    }

    /// Asserts one fact, appending it to the delta journal.
    pub fn add_fact(&mut self, attrs: Vec<(String, String)>) -> Result<(FactId, bool), EngineError> {
        self.add_fact_with_source_opt(attrs, None)
    }

    /// Asserts one fact tagged with `source`, appending it to the delta
    /// journal.
    pub fn add_fact_with_source(&mut self, attrs: Vec<(String, String)>, source: &str) -> Result<(FactId, bool), EngineError> {
        self.add_fact_with_source_opt(attrs, Some(source.to_string()))
    }

    /// Asserts one ground `(subject, predicate, object)` triple, classifying
    /// `predicate` the same way [`Network::add_triple`] does, and journals
    /// the resulting attribute shape.
    pub fn add_triple(&mut self, subject: &str, predicate: &str, object: &str) -> Result<(FactId, bool), EngineError> {
        let interned = crate::query::planner::ground_triple_attrs(&mut self.net, subject, predicate, object);
        let attrs: Vec<(String, String)> =
            interned.iter().map(|&(a, v)| (self.net.interner().resolve(a).to_string(), self.net.interner().resolve(v).to_string())).collect();
        self.add_fact(attrs)
    }

    /// Asserts a batch of facts under one source id in a single journal
    /// entry (spec §4.7 delta op `AddSourceBatch`).
    pub fn add_source(&mut self, source: &str, facts: Vec<Vec<(String, String)>>) -> Result<Vec<FactId>, EngineError> {
        let src_id = self.net.interner_mut().intern(source);
        let mut ids = Vec::with_capacity(facts.len());
        for fact_attrs in &facts {
            let interned =
                fact_attrs.iter().map(|(a, v)| (self.net.interner_mut().intern(a), self.net.interner_mut().intern(v))).collect();
            let (id, added) = self.net.add_fact_with_source(interned, src_id)?;
            if added {
                self.delta_fact_count += 1;
            }
            ids.push(id);
        }
        self.journal.append(&DeltaOp::AddSourceBatch(format::AddSourceBatchPayload { source: source.to_string(), facts }))?;
        Ok(ids)
    }

    /// Retracts every fact attached to `source`, recording the retraction
    /// in the journal so it replays on the next open.
    pub fn remove_source(&mut self, source: &str) -> Result<usize, EngineError> {
        let count = match self.net.interner().get(source) {
            Some(src_id) => self.net.remove_source(src_id)?,
            None => 0,
        };
        self.deleted_fact_count += count;
        self.journal.append(&DeltaOp::RemoveSource(format::RemoveSourcePayload { source: source.to_string() }))?;
        Ok(count)
    }

    /// Retracts a single fact by id, recording it in the journal.
    pub fn remove_fact(&mut self, id: FactId) -> Result<bool, EngineError> {
        let removed = self.net.remove_by_id(id)?;
        if removed {
            self.deleted_fact_count += 1;
        }
        self.journal.append(&DeltaOp::RemoveFact(format::RemoveFactPayload { id }))?;
        Ok(removed)
    }

    /// Fsyncs the journal (spec §4.7 "Fsync discipline").
    pub fn save(&self) -> Result<(), EngineError> {
        self.journal.sync()
    }

    fn finalize_compaction(&mut self, new_path: PathBuf, row_count: u64, offset_at_start: u64) -> Result<(), EngineError> {
        let new_fingerprint = snapshot::fingerprint_of_base(&new_path)?;
        let tail = self.journal.tail_bytes_since(offset_at_start)?;
        let new_journal = DeltaJournal::relink(&self.delta_path, new_fingerprint, &tail)?;
        snapshot::reap_old_versions(&self.base_path, &new_path);
        self.journal = new_journal;
        self.base_fact_count = row_count as usize;
        self.delta_fact_count = 0;
        self.deleted_fact_count = 0;
        Ok(())
    }

    /// Folds the journal into a fresh base snapshot synchronously, then
    /// truncates the journal to whatever was appended since the snapshot
    /// was taken (spec §4.7 "Compaction").
    pub fn compact(&mut self) -> Result<(), EngineError> {
        if self.compacting.swap(true, Ordering::SeqCst) {
            return Err(EngineError::ConcurrentCompaction);
        }
        let result = (|| {
            let offset = self.journal.file_size()?;
            let rows = snapshot::asserted_rows(&self.net);
            let row_count = rows.len() as u64;
            let bytes = format::encode_snapshot(&rows)?;
            let target = snapshot::next_version_path(&self.base_path);
            let written_path = snapshot::write_atomic(&target, &bytes)?;
            self.finalize_compaction(written_path, row_count, offset)
        })();
        self.compacting.store(false, Ordering::SeqCst);
        result
    }

    /// Starts compaction on a background thread and returns immediately.
    /// New facts may keep being asserted through this handle while it
    /// runs; they land in the journal tail and are carried forward into
    /// the new base's delta once [`Hybrid::wait_for_compaction`] re-links
    /// it (spec §4.7 "the new base is only swapped in once the concurrent
    /// delta is re-linked against it").
    pub fn compact_async(&mut self) -> Result<(), EngineError> {
        if self.compacting.swap(true, Ordering::SeqCst) {
            return Err(EngineError::ConcurrentCompaction);
        }
        let offset = self.journal.file_size().map_err(|e| {
            self.compacting.store(false, Ordering::SeqCst);
            e
        })?;
        let rows = snapshot::asserted_rows(&self.net);
        let row_count = rows.len() as u64;
        let target = snapshot::next_version_path(&self.base_path);
        let compacting = Arc::clone(&self.compacting);
        let handle = thread::spawn(move || {
            let result = (|| {
                let bytes = format::encode_snapshot(&rows)?;
                snapshot::write_atomic(&target, &bytes)
            })();
            compacting.store(false, Ordering::SeqCst);
            result
        });
        self.pending = Some((handle, row_count, offset));
        Ok(())
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::SeqCst)
    }

    /// Blocks until a `compact_async` in flight finishes and re-links the
    /// journal against the new base. A no-op if no compaction is pending.
    pub fn wait_for_compaction(&mut self) -> Result<(), EngineError> {
        if let Some((handle, row_count, offset)) = self.pending.take() {
            let written_path = handle.join().map_err(|_| EngineError::RuleAction("compaction worker thread panicked".to_string()))??;
            self.finalize_compaction(written_path, row_count, offset)?;
        }
        Ok(())
    }

    pub fn base_fact_count(&self) -> usize {
        self.base_fact_count
    }

    pub fn delta_fact_count(&self) -> usize {
        self.delta_fact_count
    }

    pub fn deleted_fact_count(&self) -> usize {
        self.deleted_fact_count
    }

    pub fn fact_count(&self) -> usize {
        self.net.facts().len()
    }

    pub fn delta_path(&self) -> &Path {
        &self.delta_path
    }

    pub fn delta_file_size(&self) -> Result<u64, EngineError> {
        self.journal.file_size()
    }

    /// Replays every asserted fact currently visible through this handle
    /// into `target`, re-deriving its inferences from scratch.
    pub fn materialize_into(&self, target: &mut Network) -> Result<(), EngineError> {
        let rows = snapshot::asserted_rows(&self.net);
        snapshot::replay_into(target, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_add_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("graph.bin");

        {
            let mut h = Hybrid::open(&base).unwrap();
            h.add_fact(vec![("individual".to_string(), "Felix".to_string()), ("type".to_string(), "Cat".to_string())]).unwrap();
            h.save().unwrap();
        }

        let h2 = Hybrid::open(&base).unwrap();
        assert_eq!(h2.fact_count(), 1);
        assert_eq!(h2.base_fact_count(), 0);
        assert_eq!(h2.delta_fact_count(), 1);
    }

    #[test]
    fn compact_folds_delta_into_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("graph.bin");

        let mut h = Hybrid::open(&base).unwrap();
        h.add_fact(vec![("individual".to_string(), "Felix".to_string())]).unwrap();
        h.compact().unwrap();
        assert_eq!(h.base_fact_count(), 1);
        assert_eq!(h.delta_fact_count(), 0);

        h.add_fact(vec![("individual".to_string(), "Tom".to_string())]).unwrap();
        assert_eq!(h.fact_count(), 2);
        assert_eq!(h.delta_fact_count(), 1);
    }

    #[test]
    fn remove_source_is_recorded_and_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("graph.bin");

        {
            let mut h = Hybrid::open(&base).unwrap();
            h.add_source("feed-1", vec![vec![("individual".to_string(), "Felix".to_string())]]).unwrap();
            h.remove_source("feed-1").unwrap();
            h.save().unwrap();
        }

        let h2 = Hybrid::open(&base).unwrap();
        assert_eq!(h2.fact_count(), 0);
    }
}
