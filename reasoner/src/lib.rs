//! In-memory description-logic reasoning and query engine.
//!
//! See `SPEC_FULL.md` at the workspace root for the full component map.
//! The short version: facts flow into a [`Network`] (directly or through
//! the optional [`entity`] accumulator), propagate through a discrimination
//! network of alpha/beta/negation/filter/production nodes
//! ([`network`] and [`rules`]), and are queried either as graph patterns or
//! as REQL text ([`query`]). [`persistence`] provides a versioned snapshot
//! plus an append-only, CRC-protected delta journal.
//!
//! The network is single-threaded and cooperative (no internal locking):
//! callers serialize access to one `Network`. See `SPEC_FULL.md` §5.

pub mod entity;
pub mod error;
pub mod fact;
pub mod intern;
pub mod network;
pub mod persistence;
pub mod query;
pub mod rules;
pub mod shapes;

pub use error::{EngineError, Result};
pub use network::Network;
pub use persistence::{Hybrid, LazySnapshot};
