//! Typed fatal errors for the engine (spec §7).
//!
//! These are the conditions that must abort a run. They are surfaced through
//! `anyhow` at the command boundary, where callers can still `downcast_ref`
//! to distinguish them from recoverable collaborator failures.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{FillSide, PositionSide};

/// Fatal engine errors: the conditions of spec §7 that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An interval specification string that does not name a known interval.
    #[error("bad interval: {0}")]
    BadInterval(String),

    /// A series whose timestamps are not strictly increasing (covers duplicate
    /// timestamps in an input series).
    #[error("non-chronological series for {symbol}: timestamp {timestamp} is not strictly increasing")]
    NonChronological {
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    /// A CLOSE whose exit side does not pair with the open position's side.
    #[error("side pairing mismatch for {symbol}: entry {entry_side:?} cannot be closed by {exit_side:?}")]
    SidePairing {
        symbol: String,
        entry_side: PositionSide,
        exit_side: FillSide,
    },

    /// A strategy id that does not map to any known strategy.
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}
