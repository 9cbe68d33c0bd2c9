//! The audio output bank the player core drives.
//!
//! The core is the sole submitter: it opens the bank for a format, feeds
//! it whole frames, and pauses/cancels around commands. Everything device-
//! specific lives behind [`OutputBank`]; the daemon uses the cpal-backed
//! [`device::DeviceOutput`], tests use a collecting fake.

pub mod device;

pub use device::DeviceOutput;

use crate::audio::format::AudioFormat;
use crate::song::Tag;

/// Output-side failures. The player core maps any of these to its AUDIO
/// error kind and stops.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutputError {
    #[error("audio device initialization failed: {0}")]
    DeviceInit(String),

    #[error("audio format not playable by the device: {0}")]
    UnsupportedFormat(String),

    #[error("output is not open")]
    NotOpen,

    #[error("audio stream failed: {0}")]
    Stream(String),
}

/// A bank of audio outputs, driven from the player thread only.
pub trait OutputBank: Send {
    /// Open (or reopen) the outputs.
    ///
    /// `Some(format)` opens for a new stream format; `None` reopens with
    /// the previous one, which is how playback resumes after a pause
    /// closed the device.
    fn open(&mut self, format: Option<&AudioFormat>) -> Result<(), OutputError>;

    /// Close the outputs. Safe to call when already closed.
    fn close(&mut self);

    /// Submit PCM. `data` is a whole number of frames in the opened
    /// format. May block until the device has room; blocking is bounded
    /// by the device buffer, not by wall-clock timers.
    fn play(&mut self, data: &[u8]) -> Result<(), OutputError>;

    /// Stop producing sound but keep pending samples for resume.
    fn pause(&mut self);

    /// Drop any samples that have not reached the device yet.
    fn cancel(&mut self);

    /// Forward a tag to displays/streaming outputs.
    fn send_tag(&mut self, tag: &Tag);
}
