//! The decoder side of the player: the control block the player commands,
//! the thread harness that produces chunks, and the stream abstraction the
//! harness decodes from.
//!
//! The player core never decodes anything itself. It talks to the decoder
//! thread through [`control::DecoderControl`] and consumes whatever chunks
//! arrive in the shared pipe. Everything format-specific hides behind
//! [`SongStream`], so tests drive the whole player with scripted streams.

pub mod control;
pub mod symphonia;
pub mod task;

pub use control::{DecoderCommand, DecoderControl, DecoderState};
pub use self::symphonia::SymphoniaOpener;

use crate::audio::format::AudioFormat;
use crate::song::{Song, Tag};

/// Decoder-side failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot open {url}: {message}")]
    Open { url: String, message: String },

    #[error("unsupported stream: {0}")]
    Unsupported(String),

    #[error("decode failed: {0}")]
    Stream(String),

    #[error("seek failed: {0}")]
    Seek(String),
}

/// Result of one [`SongStream::read`] call.
#[derive(Debug, Clone, Copy)]
pub struct ReadInfo {
    /// Bytes written into the chunk payload; 0 for a tag-only read
    pub bytes: usize,
    /// Playback timestamp of the first written byte, in seconds
    pub time: f64,
    /// Instantaneous stream bit rate in kbps
    pub bit_rate: u32,
}

/// One opened song, ready to produce PCM.
pub trait SongStream: Send {
    /// Format of the bytes `read` produces. Fixed for the stream lifetime.
    fn format(&self) -> AudioFormat;

    /// Total play time in seconds, or 0.0 when unknown.
    fn total_time(&self) -> f64;

    /// A tag update to attach to the next produced chunk, if any.
    fn take_pending_tag(&mut self) -> Option<Tag>;

    /// Reposition to `seconds` from the start.
    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError>;

    /// Produce the next stretch of PCM into `buf`.
    ///
    /// `Ok(None)` means end of stream. `Ok(Some(info))` with zero bytes is
    /// allowed when only a tag is pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<ReadInfo>, DecodeError>;
}

/// Opens [`SongStream`]s for songs. The daemon uses the symphonia opener;
/// tests substitute scripted ones.
pub trait StreamOpener: Send {
    fn open(&mut self, song: &Song) -> Result<Box<dyn SongStream>, DecodeError>;
}
