//! Cross-thread notifications from the player core to the rest of the
//! daemon.
//!
//! The playback threads never touch playlist or client state directly.
//! They emit [`PipeEvent`]s over a channel (the surrounding event loop
//! applies them) and raise [`IdleFlags`] that waiting clients poll.

use bitflags::bitflags;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::song::Tag;

bitflags! {
    /// Client-visible "something changed" categories.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IdleFlags: u32 {
        /// The current song's playback state or metadata changed
        const PLAYER = 1 << 0;
        /// The software volume changed
        const MIXER = 1 << 1;
    }
}

/// Events the player core emits towards the daemon's main loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeEvent {
    /// A song started, ended, or the player stopped; the playlist owner
    /// should resynchronise with the queue.
    Playlist,
    /// A streaming song announced new metadata. The playlist owner applies
    /// the tag; the player only keeps a private copy.
    Tag { url: String, tag: Tag },
}

/// Sender half used by the playback threads, plus the idle-flag latch.
pub struct EventPipe {
    tx: Sender<PipeEvent>,
    idle: Mutex<IdleFlags>,
}

impl EventPipe {
    /// Create a pipe and the receiver the main loop drains.
    pub fn new() -> (Self, Receiver<PipeEvent>) {
        let (tx, rx) = unbounded();
        (
            Self {
                tx,
                idle: Mutex::new(IdleFlags::empty()),
            },
            rx,
        )
    }

    /// Emit an event. A disconnected receiver (shutdown) is ignored.
    pub fn emit(&self, event: PipeEvent) {
        let _ = self.tx.send(event);
    }

    /// Latch idle flags for the next client poll.
    pub fn idle_add(&self, flags: IdleFlags) {
        *self.idle.lock() |= flags;
    }

    /// Take and clear the latched flags.
    pub fn idle_take(&self) -> IdleFlags {
        std::mem::take(&mut *self.idle.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_receive() {
        let (pipe, rx) = EventPipe::new();
        pipe.emit(PipeEvent::Playlist);
        assert_eq!(rx.try_recv().unwrap(), PipeEvent::Playlist);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (pipe, rx) = EventPipe::new();
        drop(rx);
        // Must not panic; the daemon may already be shutting down.
        pipe.emit(PipeEvent::Playlist);
    }

    #[test]
    fn test_idle_flags_accumulate_and_clear() {
        let (pipe, _rx) = EventPipe::new();
        pipe.idle_add(IdleFlags::PLAYER);
        pipe.idle_add(IdleFlags::MIXER);
        assert_eq!(pipe.idle_take(), IdleFlags::PLAYER | IdleFlags::MIXER);
        assert_eq!(pipe.idle_take(), IdleFlags::empty());
    }
}
