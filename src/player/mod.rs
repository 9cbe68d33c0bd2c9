//! The player core: control block, playback state machine, and the handle
//! that wires the threads together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Foreground (clients)                     │
//! │    play / queue / pause / seek / stop / cancel / exit        │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ PlayerControl (command + ack)
//!                             ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Player thread                         │
//! │   do_play: buffering → startup → steady state → crossfade    │
//! └──────────┬──────────────────────────────────┬────────────────┘
//!            │ DecoderControl                   │ PCM chunks
//!            ▼                                  ▼
//! ┌─────────────────────────┐      ┌──────────────────────────┐
//! │      Decoder thread     │      │       OutputBank         │
//! │  SongStream → MusicPipe │      │  (cpal device, or fake)  │
//! └─────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! Every command is acknowledged only after its effects are visible, so a
//! returned call means the player really did it (or recorded why not).

pub mod control;
mod play;
mod task;

pub use control::{Command, FailureKind, PlayerControl, PlayerFailure, PlayerState, PlayerStatus};

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::config::PlayerConfig;
use crate::decoder::{DecoderControl, StreamOpener};
use crate::events::{EventPipe, IdleFlags, PipeEvent};
use crate::output::OutputBank;
use crate::song::Song;

/// Owns the player and decoder threads and exposes the client API.
///
/// Dropping the handle shuts both threads down; [`exit`](Self::exit) does
/// the same explicitly.
pub struct PlayerHandle {
    pc: Arc<PlayerControl>,
    events: Arc<EventPipe>,
    player: Option<JoinHandle<()>>,
    decoder: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Construct the control blocks and spawn both threads.
    ///
    /// Returns the handle plus the receiver for [`PipeEvent`]s the
    /// surrounding daemon reacts to.
    pub fn spawn(
        config: &PlayerConfig,
        opener: Box<dyn StreamOpener>,
        outputs: Box<dyn OutputBank>,
    ) -> std::io::Result<(Self, Receiver<PipeEvent>)> {
        let pc = PlayerControl::new(config);
        let dc = DecoderControl::new(Arc::clone(&pc.notify));
        let (events, events_rx) = EventPipe::new();
        let events = Arc::new(events);

        let decoder = crate::decoder::task::spawn(Arc::clone(&dc), opener)?;
        let player = match task::spawn(
            Arc::clone(&pc),
            Arc::clone(&dc),
            outputs,
            Arc::clone(&events),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                dc.quit();
                let _ = decoder.join();
                return Err(e);
            }
        };

        Ok((
            Self {
                pc,
                events,
                player: Some(player),
                decoder: Some(decoder),
            },
            events_rx,
        ))
    }

    /// Play `song`, replacing the current song if one is playing.
    pub fn play(&self, song: Song) {
        if self.pc.state() != PlayerState::Stop {
            self.pc.stop();
        }
        self.pc.play(song);
    }

    /// Queue `song` to follow the current one.
    pub fn queue(&self, song: Song) {
        self.pc.queue(song);
    }

    /// Toggle pause.
    pub fn pause(&self) {
        self.pc.pause();
    }

    /// Stop playback.
    pub fn stop(&self) {
        self.pc.stop();
    }

    /// Seek within `song` to `seconds` (clamped to the song).
    pub fn seek(&self, song: Song, seconds: f64) {
        self.pc.seek(song, seconds);
    }

    /// Withdraw a queued song that has not become current yet.
    pub fn cancel(&self) {
        self.pc.cancel();
    }

    /// Release the audio device without stopping the daemon.
    pub fn close_audio(&self) {
        self.pc.close_audio();
    }

    pub fn status(&self) -> PlayerStatus {
        self.pc.status()
    }

    pub fn state(&self) -> PlayerState {
        self.pc.state()
    }

    pub fn error(&self) -> Option<PlayerFailure> {
        self.pc.error()
    }

    pub fn clear_error(&self) {
        self.pc.clear_error()
    }

    /// Software volume, 0..=1000.
    pub fn volume(&self) -> u16 {
        self.pc.software_volume()
    }

    pub fn set_volume(&self, volume: u16) {
        self.pc.set_software_volume(volume);
        self.events.idle_add(IdleFlags::MIXER);
    }

    pub fn set_cross_fade_seconds(&self, seconds: f64) {
        self.pc.set_cross_fade_seconds(seconds);
    }

    /// Take and clear the latched idle flags.
    pub fn idle_take(&self) -> IdleFlags {
        self.events.idle_take()
    }

    /// Shut down both threads and wait for them.
    pub fn exit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.player.is_some() {
            self.pc.exit();
        }
        if let Some(player) = self.player.take() {
            let _ = player.join();
        }
        if let Some(decoder) = self.decoder.take() {
            let _ = decoder.join();
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
