//! Tonearm - a headless music playback daemon.
//!
//! The crate is built around a realtime player core: a decoder thread fills a
//! bounded pool of PCM chunks, the player thread drains them into a bank of
//! audio outputs, and two condition-variable-protected control blocks carry
//! commands and status between the foreground, the player, and the decoder.
//!
//! ```text
//! ┌────────────┐  commands/ack   ┌──────────────┐  chunks   ┌─────────────┐
//! │ foreground │ ──────────────▶ │ player task  │ ◀──────── │ decoder task│
//! │  (clients) │   PlayerControl │  (do_play)   │ MusicPipe │ (SongStream)│
//! └────────────┘                 └──────┬───────┘           └─────────────┘
//!                                       │ PCM
//!                                       ▼
//!                                ┌──────────────┐
//!                                │ OutputBank   │
//!                                └──────────────┘
//! ```
//!
//! [`player::PlayerHandle`] wires the pieces together; everything else is a
//! building block that tests can instantiate in isolation.

pub mod audio;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod notify;
pub mod output;
pub mod pcm;
pub mod player;
pub mod song;
#[cfg(test)]
pub mod test_utils;

pub use config::{Config, PlayerConfig};
pub use error::{Error, Result};
pub use player::PlayerHandle;
pub use song::{Song, Tag};
