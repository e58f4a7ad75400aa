//! Base snapshot write/read (spec §4.7 "Base snapshot") and the atomic
//! write-temp-then-rename primitive (with a versioned fallback) shared by
//! plain `Network::save` and `Hybrid` compaction.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::EngineError;
use crate::fact::Fact;
use crate::network::Network;
use crate::persistence::format::{self, FactRow};
use crate::persistence::lazy::LazySnapshot;

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io { path: path.to_path_buf(), source }
}

fn fact_to_row(net: &Network, fact: &Fact) -> FactRow {
    FactRow {
        id: fact.id,
        seq: fact.seq,
        sources: fact.sources.iter().map(|&s| net.interner().resolve(s).to_string()).collect(),
        attrs: fact
            .attrs
            .iter()
            .map(|&(a, v)| (net.interner().resolve(a).to_string(), net.interner().resolve(v).to_string()))
            .collect(),
    }
}

/// Collects every asserted (non-inferred) fact as a row, ordered by
/// insertion sequence — the order the eager loader replays in.
pub(crate) fn asserted_rows(net: &Network) -> Vec<FactRow> {
    let mut rows: Vec<FactRow> = net.facts().iterate().filter(|f| !f.inferred).map(|f| fact_to_row(net, f)).collect();
    rows.sort_by_key(|r| r.seq);
    rows
}

/// Writes `bytes` to `path` atomically: write to `path.tmp`, fsync, then
/// rename over `path`. On filesystems that refuse to rename over an
/// existing/open file, falls back to the versioned scheme (`path.v1`,
/// `path.v2`, …) described in spec §4.7.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<PathBuf, EngineError> {
    let tmp_path = sibling_path(path, |name| format!("{name}.tmp"));
    {
        let mut f = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        f.write_all(bytes).map_err(|e| io_err(&tmp_path, e))?;
        f.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(_) => {
            let versioned = next_version_path(path);
            fs::rename(&tmp_path, &versioned).map_err(|e| io_err(&versioned, e))?;
            info!(path = %versioned.display(), "rename-over-existing not permitted, fell back to versioned snapshot file");
            Ok(versioned)
        }
    }
}

fn sibling_path(path: &Path, f: impl FnOnce(&str) -> String) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot");
    path.with_file_name(f(file_name))
}

/// Highest-numbered `path.v{N}` sibling, if any exist.
pub(crate) fn highest_version(path: &Path) -> Option<(PathBuf, u32)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = format!("{}.v", path.file_name()?.to_str()?);
    let mut best: Option<(PathBuf, u32)> = None;
    for entry in fs::read_dir(dir).ok()?.flatten() {
        let name = entry.file_name();
        let name = name.to_str()?;
        if let Some(suffix) = name.strip_prefix(&prefix) {
            if let Ok(n) = suffix.parse::<u32>() {
                if best.as_ref().map(|(_, b)| n > *b).unwrap_or(true) {
                    best = Some((entry.path(), n));
                }
            }
        }
    }
    best
}

pub(crate) fn next_version_path(path: &Path) -> PathBuf {
    let next = highest_version(path).map(|(_, n)| n + 1).unwrap_or(1);
    sibling_path(path, |name| format!("{name}.v{next}"))
}

/// The file a reader should open for `path`: `path` itself if present,
/// otherwise the highest-numbered versioned sibling.
pub(crate) fn resolve_current(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        highest_version(path).map(|(p, _)| p)
    }
}

/// Deletes every versioned sibling of `path` except `keep` (spec §4.7
/// "orphaned older versions are reaped"). Best-effort: a failed removal is
/// logged, not propagated — a stray file does not invalidate the base.
pub(crate) fn reap_old_versions(path: &Path, keep: &Path) {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { return };
    let prefix = format!("{file_name}.v");
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let p = entry.path();
        if p == keep {
            continue;
        }
        let is_versioned = entry.file_name().to_str().map(|n| n.starts_with(&prefix)).unwrap_or(false);
        let is_base = p == path;
        if (is_versioned || is_base) && p != keep {
            if let Err(e) = fs::remove_file(&p) {
                tracing::warn!(path = %p.display(), error = %e, "failed to reap orphaned snapshot version");
            }
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, EngineError> {
    let mut f = File::open(path).map_err(|e| io_err(path, e))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).map_err(|e| io_err(path, e))?;
    Ok(buf)
}

pub(crate) fn save(net: &Network, path: &Path) -> Result<(), EngineError> {
    let rows = asserted_rows(net);
    let bytes = format::encode_snapshot(&rows)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Replays `rows` (in the order given, which must already be sequence
/// order) into a fresh [`Network`] via the ordinary fact-ingress path, so
/// static rules and templates re-derive every inference exactly as they
/// did the first time.
pub(crate) fn replay_into(net: &mut Network, rows: &[FactRow]) -> Result<(), EngineError> {
    for row in rows {
        let attrs = row.attrs.iter().map(|(a, v)| (net.interner_mut().intern(a), net.interner_mut().intern(v))).collect();
        let (id, _added) = net.add_fact(attrs)?;
        if id == crate::network::PENDING_FACT_ID {
            continue;
        }
        for src in &row.sources {
            let src_id = net.interner_mut().intern(src);
            net.facts.attach_source(id, src_id);
        }
    }
    Ok(())
}

pub(crate) fn load_eager(path: &Path) -> Result<Network, EngineError> {
    let real_path = resolve_current(path).ok_or_else(|| io_err(path, std::io::Error::new(std::io::ErrorKind::NotFound, "snapshot not found")))?;
    let bytes = read_file(&real_path)?;
    let header = format::decode_snapshot_header(&bytes)?;
    let mut rows = Vec::with_capacity(header.row_lengths.len());
    let mut cursor = header.rows_start;
    for &len in &header.row_lengths {
        rows.push(format::decode_row(&bytes[cursor..cursor + len as usize])?);
        cursor += len as usize;
    }
    rows.sort_by_key(|r| r.seq);

    let mut net = Network::new();
    replay_into(&mut net, &rows)?;
    Ok(net)
}

pub(crate) fn fingerprint_of_base(path: &Path) -> Result<u128, EngineError> {
    let real_path =
        resolve_current(path).ok_or_else(|| io_err(path, std::io::Error::new(std::io::ErrorKind::NotFound, "snapshot not found")))?;
    let bytes = read_file(&real_path)?;
    Ok(format::decode_snapshot_header(&bytes)?.fingerprint)
}

pub(crate) fn open_lazy(path: &Path) -> Result<LazySnapshot, EngineError> {
    let real_path = resolve_current(path).ok_or_else(|| io_err(path, std::io::Error::new(std::io::ErrorKind::NotFound, "snapshot not found")))?;
    LazySnapshot::open(&real_path)
}
