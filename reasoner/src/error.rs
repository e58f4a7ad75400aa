//! Error kinds exposed by the engine (spec §7).
//!
//! `DuplicateFact` is not represented here: a duplicate `add` is a silent
//! no-op that returns `added = false`, never an `Err`. `MalformedFact` and
//! `CorruptDeltaEntry` are likewise not hard failures — they are logged via
//! `tracing::warn!` at the point they're detected and do not abort the
//! caller's operation. The remaining five kinds from spec §7 are real
//! error paths and are represented below.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("REQL parse error at {line}:{column}: {message}")]
    QueryParse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("query exceeded timeout of {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("delta fingerprint does not match base snapshot fingerprint")]
    IncompatibleBase,

    #[error("a compaction is already in flight")]
    ConcurrentCompaction,

    #[error("rule action failed, assertion rolled back: {0}")]
    RuleAction(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot codec error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),

    #[error("snapshot has unrecognized magic or version header")]
    BadHeader,
}

pub type Result<T> = std::result::Result<T, EngineError>;
