//! The decoder control block: shared state between the player task (which
//! commands) and the decoder task (which produces).
//!
//! Commands follow a request/ack discipline: the player writes the command
//! slot and signals the decoder's notify; the decoder performs the command,
//! clears the slot, and signals the player's notify back. The same player
//! notify carries "a chunk was pushed" and "my state changed" wakeups, so
//! every player-side wait loop just rechecks its predicate.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::chunk::ChunkBuffer;
use crate::audio::format::AudioFormat;
use crate::audio::pipe::MusicPipe;
use crate::notify::Notify;
use crate::song::Song;

/// Command slot values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderCommand {
    #[default]
    None,
    Start,
    Stop,
    Seek,
    Quit,
}

/// What the decoder task is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// Nothing to do; the last song (if any) was fully produced
    #[default]
    Idle,
    /// A start was accepted but the stream is not open yet
    Starting,
    /// Chunks are being produced
    Decoding,
    /// The stream could not be opened or died mid-song
    Error,
}

#[derive(Default)]
struct DcInner {
    command: DecoderCommand,
    state: DecoderState,
    /// Song a pending Start refers to
    song: Option<Song>,
    /// Song the decoder is (or was last) producing
    current_song: Option<Song>,
    seek_where: f64,
    seek_error: bool,
    pipe: Option<Arc<MusicPipe>>,
    buffer: Option<Arc<Mutex<ChunkBuffer>>>,
    in_audio_format: Option<AudioFormat>,
    out_audio_format: Option<AudioFormat>,
    total_time: f64,
}

/// Everything the decoder task needs to produce one song, captured when a
/// Start command is accepted.
pub(crate) struct StartContext {
    pub song: Song,
    pub pipe: Arc<MusicPipe>,
    pub buffer: Arc<Mutex<ChunkBuffer>>,
}

/// The decoder control block.
pub struct DecoderControl {
    inner: Mutex<DcInner>,
    /// The decoder task waits here for commands and for buffer space
    pub notify: Notify,
    /// The player task's notify, signalled on every decoder-side transition
    client: Arc<Notify>,
}

impl DecoderControl {
    pub fn new(client: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DcInner::default()),
            notify: Notify::new(),
            client,
        })
    }

    // --- player side: wiring -------------------------------------------

    /// Point the decoder at the pipe it should fill.
    pub fn set_pipe(&self, pipe: Option<Arc<MusicPipe>>) {
        self.inner.lock().pipe = pipe;
    }

    pub fn pipe(&self) -> Option<Arc<MusicPipe>> {
        self.inner.lock().pipe.clone()
    }

    /// Is the decoder's pipe the given one? False when it has none.
    pub fn pipe_is(&self, pipe: &Arc<MusicPipe>) -> bool {
        match &self.inner.lock().pipe {
            Some(p) => Arc::ptr_eq(p, pipe),
            None => false,
        }
    }

    /// Does the decoder hold a pipe distinct from the given one?
    pub fn has_other_pipe(&self, pipe: &Arc<MusicPipe>) -> bool {
        match &self.inner.lock().pipe {
            Some(p) => !Arc::ptr_eq(p, pipe),
            None => false,
        }
    }

    /// Attach the chunk pool new chunks are allocated from.
    pub fn set_buffer(&self, buffer: Option<Arc<Mutex<ChunkBuffer>>>) {
        self.inner.lock().buffer = buffer;
    }

    // --- player side: commands -----------------------------------------

    /// Start decoding `song` and wait until the decoder has accepted.
    pub fn start(&self, song: Song) {
        self.start_async(song);
        self.command_wait();
    }

    /// Start decoding `song` without waiting for the ack.
    pub fn start_async(&self, song: Song) {
        {
            let mut inner = self.inner.lock();
            inner.song = Some(song);
            inner.command = DecoderCommand::Start;
        }
        self.notify.signal();
    }

    /// Stop the decoder and wait until it is idle.
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.command == DecoderCommand::None
                && matches!(inner.state, DecoderState::Idle | DecoderState::Error)
            {
                // Nothing running; an Error state is cleared by the stop.
                inner.state = DecoderState::Idle;
                return;
            }
            inner.command = DecoderCommand::Stop;
        }
        self.notify.signal();
        loop {
            {
                let inner = self.inner.lock();
                if inner.command == DecoderCommand::None && inner.state == DecoderState::Idle {
                    break;
                }
            }
            self.client.wait();
        }
    }

    /// Ask for a reposition to `seconds`; true when the decoder managed it.
    pub fn seek(&self, seconds: f64) -> bool {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, DecoderState::Idle | DecoderState::Error)
                && inner.command == DecoderCommand::None
            {
                return false;
            }
            inner.seek_where = seconds;
            inner.seek_error = false;
            inner.command = DecoderCommand::Seek;
        }
        self.notify.signal();
        self.command_wait();
        !self.inner.lock().seek_error
    }

    /// Tell the decoder task to exit. The caller joins the thread.
    pub fn quit(&self) {
        self.inner.lock().command = DecoderCommand::Quit;
        self.notify.signal();
    }

    /// Block until the pending command (if any) has been acknowledged.
    pub fn command_wait(&self) {
        loop {
            if self.inner.lock().command == DecoderCommand::None {
                return;
            }
            self.client.wait();
        }
    }

    // --- player side: status -------------------------------------------

    pub fn has_failed(&self) -> bool {
        self.inner.lock().state == DecoderState::Error
    }

    /// Idle means "producing nothing": never started, finished, or dead.
    pub fn is_idle(&self) -> bool {
        matches!(
            self.inner.lock().state,
            DecoderState::Idle | DecoderState::Error
        )
    }

    /// Starting covers both an accepted-but-unopened stream and a Start
    /// command that is still in the slot.
    pub fn is_starting(&self) -> bool {
        let inner = self.inner.lock();
        inner.command == DecoderCommand::Start || inner.state == DecoderState::Starting
    }

    pub fn current_song(&self) -> Option<Song> {
        self.inner.lock().current_song.clone()
    }

    pub fn in_audio_format(&self) -> Option<AudioFormat> {
        self.inner.lock().in_audio_format
    }

    pub fn out_audio_format(&self) -> Option<AudioFormat> {
        self.inner.lock().out_audio_format
    }

    /// Total time of the song being decoded, in seconds (0.0 = unknown).
    pub fn total_time(&self) -> f64 {
        self.inner.lock().total_time
    }

    // --- decoder side ---------------------------------------------------

    /// Peek the command slot.
    pub(crate) fn pending_command(&self) -> DecoderCommand {
        self.inner.lock().command
    }

    /// Accept a pending Start: become Starting and hand back the
    /// song/pipe/buffer the run uses. The Start command stays in the slot
    /// until the stream is open (or has failed), so a synchronous start
    /// does not return before the outcome is known. A Stop that overwrote
    /// the slot in the meantime is discovered by the decode loop.
    pub(crate) fn begin_start(&self) -> Option<StartContext> {
        let ctx = {
            let mut inner = self.inner.lock();
            let song = inner.song.take();
            match (song, inner.pipe.clone(), inner.buffer.clone()) {
                (Some(song), Some(pipe), Some(buffer)) => {
                    inner.current_song = Some(song.clone());
                    inner.state = DecoderState::Starting;
                    Some(StartContext { song, pipe, buffer })
                }
                _ => {
                    inner.state = DecoderState::Error;
                    ack_start_locked(&mut inner);
                    None
                }
            }
        };
        if ctx.is_none() {
            self.client.signal();
        }
        ctx
    }

    /// The stream is open; publish its parameters, become Decoding, and
    /// acknowledge the start.
    pub(crate) fn publish_stream(&self, format: AudioFormat, total_time: f64) {
        {
            let mut inner = self.inner.lock();
            inner.in_audio_format = Some(format);
            inner.out_audio_format = Some(format);
            inner.total_time = total_time;
            inner.state = DecoderState::Decoding;
            ack_start_locked(&mut inner);
        }
        self.client.signal();
    }

    /// The stream could not be opened or died; become Error. A pending
    /// start is acknowledged with this outcome.
    pub(crate) fn set_error(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DecoderState::Error;
            ack_start_locked(&mut inner);
        }
        self.client.signal();
    }

    /// The song was fully produced; become Idle.
    pub(crate) fn finish(&self) {
        self.inner.lock().state = DecoderState::Idle;
        self.client.signal();
    }

    /// Acknowledge a Stop: clear everything pending and become Idle.
    pub(crate) fn ack_stop(&self) {
        {
            let mut inner = self.inner.lock();
            inner.command = DecoderCommand::None;
            inner.state = DecoderState::Idle;
            inner.song = None;
        }
        self.client.signal();
    }

    pub(crate) fn seek_where(&self) -> f64 {
        self.inner.lock().seek_where
    }

    /// Acknowledge a Seek with its outcome.
    pub(crate) fn ack_seek(&self, failed: bool) {
        {
            let mut inner = self.inner.lock();
            inner.seek_error = failed;
            inner.command = DecoderCommand::None;
        }
        self.client.signal();
    }

    /// A chunk landed in the pipe; wake the player.
    pub(crate) fn chunk_pushed(&self) {
        self.client.signal();
    }
}

/// Clear a pending Start. A Stop/Seek/Quit that overwrote the slot while
/// the stream was opening must stay pending for the decode loop.
fn ack_start_locked(inner: &mut DcInner) {
    if inner.command == DecoderCommand::Start {
        inner.command = DecoderCommand::None;
    }
}
