//! Append-only delta journal (spec §4.7 "Delta journal", §6 "File formats").
//!
//! A `DeltaJournal` owns the open file handle a [`super::hybrid::Hybrid`]
//! appends entries to between saves. The whole body is read into memory on
//! open — spec §4.7 says lazy mode "keeps the delta in-memory" anyway, and
//! a delta is expected to stay small relative to the base between
//! compactions.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::persistence::format::{self, DeltaOp};

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io { path: path.to_path_buf(), source }
}

pub(crate) struct DeltaJournal {
    path: PathBuf,
    file: File,
    base_fingerprint: u128,
}

impl DeltaJournal {
    /// Creates a brand-new journal (no prior delta file) bound to
    /// `base_fingerprint`.
    pub(crate) fn create(path: &Path, base_fingerprint: u128) -> Result<Self, EngineError> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).read(true).open(path).map_err(|e| io_err(path, e))?;
        file.write_all(&format::delta_header(base_fingerprint)).map_err(|e| io_err(path, e))?;
        file.sync_all().map_err(|e| io_err(path, e))?;
        Ok(Self { path: path.to_path_buf(), file, base_fingerprint })
    }

    /// Opens an existing journal, returning it along with every entry that
    /// replayed cleanly (spec §7 `CorruptDeltaEntry`/`IncompatibleBase`
    /// handling happens inside [`format::decode_entries`] and here).
    pub(crate) fn open_existing(path: &Path, expected_base_fingerprint: u128) -> Result<(Self, Vec<DeltaOp>), EngineError> {
        let mut file = OpenOptions::new().read(true).append(true).open(path).map_err(|e| io_err(path, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| io_err(path, e))?;
        if buf.len() < format::DELTA_HEADER_LEN {
            return Err(EngineError::BadHeader);
        }
        let base_fingerprint = format::read_delta_header(&buf)?;
        if base_fingerprint != expected_base_fingerprint {
            return Err(EngineError::IncompatibleBase);
        }
        let ops = format::decode_entries(&buf[format::DELTA_HEADER_LEN..]);
        Ok((Self { path: path.to_path_buf(), file, base_fingerprint }, ops))
    }

    pub(crate) fn append(&mut self, op: &DeltaOp) -> Result<(), EngineError> {
        let bytes = format::encode_entry(op)?;
        self.file.write_all(&bytes).map_err(|e| io_err(&self.path, e))
    }

    /// Fsyncs the journal (spec §4.7 "Fsync discipline": "on `save()` and
    /// on `close()`").
    pub(crate) fn sync(&self) -> Result<(), EngineError> {
        self.file.sync_all().map_err(|e| io_err(&self.path, e))
    }

    pub(crate) fn file_size(&self) -> Result<u64, EngineError> {
        Ok(self.file.metadata().map_err(|e| io_err(&self.path, e))?.len())
    }

    pub(crate) fn base_fingerprint(&self) -> u128 {
        self.base_fingerprint
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes appended after `offset` — used by compaction to carry
    /// forward entries written while a background snapshot was in flight
    /// (spec §4.7 "the new base is only swapped in once the concurrent
    /// delta is re-linked against it").
    pub(crate) fn tail_bytes_since(&mut self, offset: u64) -> Result<Vec<u8>, EngineError> {
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| io_err(&self.path, e))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf).map_err(|e| io_err(&self.path, e))?;
        self.file.seek(SeekFrom::End(0)).map_err(|e| io_err(&self.path, e))?;
        Ok(buf)
    }

    /// Rewrites the journal file with a fresh header bound to
    /// `new_fingerprint` followed verbatim by `tail` (already-encoded
    /// entries carried forward from the old journal), then reopens it for
    /// further appends.
    pub(crate) fn relink(path: &Path, new_fingerprint: u128, tail: &[u8]) -> Result<Self, EngineError> {
        let mut bytes = format::delta_header(new_fingerprint);
        bytes.extend_from_slice(tail);
        write_delta_atomic(path, &bytes)?;
        let file = OpenOptions::new().read(true).append(true).open(path).map_err(|e| io_err(path, e))?;
        Ok(Self { path: path.to_path_buf(), file, base_fingerprint: new_fingerprint })
    }
}

fn write_delta_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
    {
        let mut f = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        f.write_all(bytes).map_err(|e| io_err(&tmp_path, e))?;
        f.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))
}
