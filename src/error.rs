//! Top-level error type.
//!
//! Subsystems carry their own `thiserror` enums ([`DecodeError`],
//! [`OutputError`], [`PcmError`](crate::pcm::PcmError)); this aggregates
//! them for callers that cross subsystem boundaries, such as `main`.
//! Playback failures observed at runtime are not `Result`s at all - the
//! player records them in its control block and stops.

use crate::decoder::DecodeError;
use crate::output::OutputError;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregated daemon error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Decoder-side error
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Output-side error
    #[error("audio output error: {0}")]
    Output(#[from] OutputError),
}
