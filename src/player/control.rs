//! The player control block: the command mailbox and status fields shared
//! between foreground threads and the player task.
//!
//! Commands are a one-deep mailbox with a completion signal. An issuer
//! takes the slot, writes the command plus its parameters, wakes the
//! player, and sleeps until the player writes `Command::None` back. The
//! player only ever acknowledges after the command's effects are visible,
//! so a returned `pause()` really means the outputs were paused.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::audio::format::AudioFormat;
use crate::config::PlayerConfig;
use crate::notify::Notify;
use crate::pcm::VOLUME_MAX;
use crate::song::Song;

/// Commands a foreground thread can put in the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    None,
    Play,
    Stop,
    Pause,
    Seek,
    CloseAudio,
    Queue,
    Cancel,
    Exit,
}

/// What the player is doing, as clients see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stop,
    Play,
    Pause,
}

/// The two ways playback can die.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The decoder could not produce a stream for the song
    File,
    /// The output device or the volume DSP rejected the stream
    Audio,
}

/// A recorded playback failure. Carrying the song makes "an error always
/// names its song" structural.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerFailure {
    pub kind: FailureKind,
    pub song: Song,
}

/// Client-visible snapshot of the player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub elapsed_time: f64,
    pub total_time: f64,
    pub bit_rate: u32,
    pub audio_format: Option<AudioFormat>,
    pub total_play_time: f64,
    /// The accepted-but-not-yet-current successor song, if any
    pub next_song: Option<Song>,
    pub error: Option<PlayerFailure>,
}

#[derive(Default)]
struct PcInner {
    command: Command,
    state: PlayerState,
    next_song: Option<Song>,
    seek_where: f64,
    error: Option<PlayerFailure>,
    elapsed_time: f64,
    total_time: f64,
    total_play_time: f64,
    bit_rate: u32,
    audio_format: Option<AudioFormat>,
}

/// The player control block.
pub struct PlayerControl {
    inner: Mutex<PcInner>,
    /// The player task waits here; issuers and the decoder signal it
    pub notify: Arc<Notify>,
    /// Issuers wait here for their ack
    client_notify: Notify,
    /// Serializes issuers so one command is in flight at a time
    issue_lock: Mutex<()>,
    software_volume: AtomicU16,
    cross_fade_bits: AtomicU64,
    /// Bytes the pipe must hold before playback starts
    pub buffered_before_play: usize,
    /// Capacity of the chunk pool, in chunks
    pub buffer_chunks: usize,
}

impl PlayerControl {
    pub fn new(config: &PlayerConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PcInner::default()),
            notify: Arc::new(Notify::new()),
            client_notify: Notify::new(),
            issue_lock: Mutex::new(()),
            software_volume: AtomicU16::new(config.software_volume.min(VOLUME_MAX)),
            cross_fade_bits: AtomicU64::new(config.cross_fade_seconds.max(0.0).to_bits()),
            buffered_before_play: config.buffered_before_play,
            buffer_chunks: config.buffer_chunks,
        })
    }

    // --- foreground: commands ------------------------------------------

    /// Start playing `song`, replacing whatever plays now. Returns once
    /// playback has been initiated (or has failed).
    pub fn play(&self, song: Song) {
        self.issue_with(Command::Play, |inner| inner.next_song = Some(song));
    }

    /// Hand the player the song to play after the current one.
    pub fn queue(&self, song: Song) {
        self.issue_with(Command::Queue, |inner| inner.next_song = Some(song));
    }

    /// Toggle pause.
    pub fn pause(&self) {
        self.issue_with(Command::Pause, |_| {});
    }

    /// Stop playback.
    pub fn stop(&self) {
        self.issue_with(Command::Stop, |_| {});
    }

    /// Seek within `song` to `seconds`.
    pub fn seek(&self, song: Song, seconds: f64) {
        self.issue_with(Command::Seek, |inner| {
            inner.next_song = Some(song);
            inner.seek_where = seconds;
        });
    }

    /// Withdraw a queued song.
    pub fn cancel(&self) {
        self.issue_with(Command::Cancel, |_| {});
    }

    /// Close the audio device without stopping the daemon.
    pub fn close_audio(&self) {
        self.issue_with(Command::CloseAudio, |_| {});
    }

    /// Shut the player task down. The handle joins the thread afterwards.
    pub fn exit(&self) {
        self.issue_with(Command::Exit, |_| {});
    }

    fn issue_with(&self, command: Command, prepare: impl FnOnce(&mut PcInner)) {
        debug_assert_ne!(command, Command::None);
        let _issuer = self.issue_lock.lock();

        // Take the mailbox slot.
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.command == Command::None {
                    prepare(&mut inner);
                    inner.command = command;
                    break;
                }
            }
            self.client_notify.wait();
        }
        self.notify.signal();

        // Wait for the ack.
        loop {
            if self.inner.lock().command == Command::None {
                return;
            }
            self.client_notify.wait();
        }
    }

    // --- foreground: queries -------------------------------------------

    pub fn status(&self) -> PlayerStatus {
        let inner = self.inner.lock();
        PlayerStatus {
            state: inner.state,
            elapsed_time: inner.elapsed_time,
            total_time: inner.total_time,
            bit_rate: inner.bit_rate,
            audio_format: inner.audio_format,
            total_play_time: inner.total_play_time,
            next_song: inner.next_song.clone(),
            error: inner.error.clone(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().state
    }

    pub fn error(&self) -> Option<PlayerFailure> {
        self.inner.lock().error.clone()
    }

    /// Forget a recorded failure (after a client has surfaced it).
    pub fn clear_error(&self) {
        self.inner.lock().error = None;
    }

    pub fn has_next_song(&self) -> bool {
        self.inner.lock().next_song.is_some()
    }

    /// Software volume, 0..=1000.
    pub fn software_volume(&self) -> u16 {
        self.software_volume.load(Ordering::Relaxed)
    }

    pub fn set_software_volume(&self, volume: u16) {
        self.software_volume
            .store(volume.min(VOLUME_MAX), Ordering::Relaxed);
    }

    pub fn cross_fade_seconds(&self) -> f64 {
        f64::from_bits(self.cross_fade_bits.load(Ordering::Relaxed))
    }

    pub fn set_cross_fade_seconds(&self, seconds: f64) {
        self.cross_fade_bits
            .store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }

    // --- player task side ----------------------------------------------

    pub(crate) fn command(&self) -> Command {
        self.inner.lock().command
    }

    /// Acknowledge the pending command; its effects must already be
    /// visible.
    pub(crate) fn command_finished(&self) {
        {
            let mut inner = self.inner.lock();
            debug_assert_ne!(inner.command, Command::None);
            inner.command = Command::None;
        }
        self.client_notify.signal();
    }

    /// Replace a pending Cancel that lost its race with a Stop.
    pub(crate) fn upgrade_cancel_to_stop(&self) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.command, Command::Cancel);
        inner.command = Command::Stop;
    }

    pub(crate) fn next_song(&self) -> Option<Song> {
        self.inner.lock().next_song.clone()
    }

    pub(crate) fn take_next_song(&self) -> Option<Song> {
        self.inner.lock().next_song.take()
    }

    pub(crate) fn clear_next_song(&self) {
        self.inner.lock().next_song = None;
    }

    pub(crate) fn seek_where(&self) -> f64 {
        self.inner.lock().seek_where
    }

    pub(crate) fn set_state(&self, state: PlayerState) {
        self.inner.lock().state = state;
    }

    pub(crate) fn set_error(&self, kind: FailureKind, song: Song) {
        self.inner.lock().error = Some(PlayerFailure { kind, song });
    }

    /// Reset the per-song fields when a new song takes over.
    pub(crate) fn begin_song(&self, total_time: f64) {
        let mut inner = self.inner.lock();
        inner.total_time = total_time;
        inner.bit_rate = 0;
        inner.audio_format = None;
        inner.elapsed_time = 0.0;
    }

    pub(crate) fn set_stream_info(&self, total_time: f64, format: AudioFormat) {
        let mut inner = self.inner.lock();
        inner.total_time = total_time;
        inner.audio_format = Some(format);
    }

    pub(crate) fn total_time(&self) -> f64 {
        self.inner.lock().total_time
    }

    pub(crate) fn set_elapsed(&self, seconds: f64) {
        self.inner.lock().elapsed_time = seconds;
    }

    pub(crate) fn update_chunk_progress(&self, elapsed: f64, bit_rate: u32) {
        let mut inner = self.inner.lock();
        inner.elapsed_time = elapsed;
        inner.bit_rate = bit_rate;
    }

    pub(crate) fn add_play_time(&self, seconds: f64) {
        self.inner.lock().total_play_time += seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn control() -> Arc<PlayerControl> {
        PlayerControl::new(&PlayerConfig::default())
    }

    /// A stand-in player task that acks `count` commands.
    fn acking_player(pc: Arc<PlayerControl>, count: usize) -> thread::JoinHandle<Vec<Command>> {
        thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < count {
                match pc.command() {
                    Command::None => pc.notify.wait(),
                    cmd => {
                        seen.push(cmd);
                        pc.command_finished();
                    }
                }
            }
            seen
        })
    }

    #[test]
    fn test_issue_blocks_until_ack() {
        let pc = control();
        let player = acking_player(Arc::clone(&pc), 1);
        pc.pause();
        // pause() returned, so the command slot must be free again.
        assert_eq!(pc.command(), Command::None);
        assert_eq!(player.join().unwrap(), vec![Command::Pause]);
    }

    #[test]
    fn test_commands_are_serialized() {
        let pc = control();
        let player = acking_player(Arc::clone(&pc), 4);
        let issuers: Vec<_> = (0..4)
            .map(|_| {
                let pc = Arc::clone(&pc);
                thread::spawn(move || pc.stop())
            })
            .collect();
        for issuer in issuers {
            issuer.join().unwrap();
        }
        assert_eq!(player.join().unwrap(), vec![Command::Stop; 4]);
    }

    #[test]
    fn test_play_carries_song() {
        let pc = control();
        let pc2 = Arc::clone(&pc);
        let player = thread::spawn(move || {
            loop {
                match pc2.command() {
                    Command::None => pc2.notify.wait(),
                    Command::Play => {
                        let song = pc2.take_next_song();
                        pc2.command_finished();
                        return song;
                    }
                    _ => unreachable!(),
                }
            }
        });
        pc.play(Song::new("/x.flac"));
        assert_eq!(player.join().unwrap(), Some(Song::new("/x.flac")));
    }

    #[test]
    fn test_volume_clamped() {
        let pc = control();
        pc.set_software_volume(5000);
        assert_eq!(pc.software_volume(), VOLUME_MAX);
    }

    #[test]
    fn test_cross_fade_negative_clamped() {
        let pc = control();
        pc.set_cross_fade_seconds(-3.0);
        assert_eq!(pc.cross_fade_seconds(), 0.0);
    }

    #[test]
    fn test_error_names_song() {
        let pc = control();
        pc.set_error(FailureKind::File, Song::new("/broken.ogg"));
        let failure = pc.error().unwrap();
        assert_eq!(failure.kind, FailureKind::File);
        assert_eq!(failure.song.url, "/broken.ogg");
        pc.clear_error();
        assert!(pc.error().is_none());
    }
}
