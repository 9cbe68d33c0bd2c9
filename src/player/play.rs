//! The playback state machine.
//!
//! One call to [`do_play`] covers the life of one playback run: from the
//! command that started a song, across any number of queued successors and
//! crossfades, to the stop/exit/error that ends it. The player thread owns
//! the chunk pool and the pipe; the decoder thread fills whichever pipe the
//! decoder control block points at.
//!
//! The loop only ever blocks on the player notify, and every producer of
//! relevant facts (command issuers, the decoder) signals it, so each
//! iteration re-derives what to do from shared state instead of trusting a
//! wakeup reason.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::chunk::{CHUNK_SIZE, ChunkBuffer, MusicChunk};
use crate::audio::format::AudioFormat;
use crate::audio::pipe::MusicPipe;
use crate::decoder::DecoderControl;
use crate::events::{EventPipe, IdleFlags, PipeEvent};
use crate::output::OutputBank;
use crate::pcm::{cross_fade_apply, cross_fade_calc, pcm_volume};
use crate::player::control::{Command, FailureKind, PlayerControl, PlayerState};
use crate::song::Song;

/// How many consecutive empty shifts from the next song's pipe a fade
/// survives before it is abandoned. Guards against a live but starved
/// decoder pinning the loop in the fade window.
const XFADE_EMPTY_SHIFT_LIMIT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Xfade {
    /// Not yet decided for the upcoming song boundary
    Unknown,
    Disabled,
    Enabled,
}

struct Playback<'a> {
    pc: &'a PlayerControl,
    dc: &'a DecoderControl,
    outputs: &'a mut dyn OutputBank,
    events: &'a EventPipe,
    buffer: Arc<Mutex<ChunkBuffer>>,
    pipe: Arc<MusicPipe>,
    /// Waiting for the initial fill before audio starts
    buffering: bool,
    /// The decoder accepted a start but has not published a stream yet
    decoder_starting: bool,
    paused: bool,
    /// A successor song sits in pc.next_song
    queued: bool,
    /// The song currently being played
    song: Option<Song>,
    xfade: Xfade,
    cross_fade_chunks: usize,
    /// Has the fade actually begun mixing?
    cross_fading: bool,
    empty_shifts: u32,
    /// Format the outputs were opened with
    play_audio_format: Option<AudioFormat>,
    /// Seconds of playback per submitted byte
    size_to_time: f64,
}

/// Run one playback session. The pending Play/Queue command is
/// acknowledged once playback is initiated (or has failed); any command
/// that terminated the loop is left in the mailbox for the outer task.
pub(crate) fn do_play(
    pc: &PlayerControl,
    dc: &DecoderControl,
    outputs: &mut dyn OutputBank,
    events: &EventPipe,
) {
    let Some(song) = pc.next_song() else {
        debug_assert!(false, "playback started without a song");
        pc.command_finished();
        return;
    };

    let buffer = Arc::new(Mutex::new(ChunkBuffer::new(pc.buffer_chunks)));
    let mut playback = Playback {
        pc,
        dc,
        outputs,
        events,
        buffer: Arc::clone(&buffer),
        pipe: Arc::new(MusicPipe::new()),
        buffering: true,
        decoder_starting: false,
        paused: false,
        queued: false,
        song: None,
        xfade: Xfade::Unknown,
        cross_fade_chunks: 0,
        cross_fading: false,
        empty_shifts: 0,
        play_audio_format: None,
        size_to_time: 0.0,
    };

    dc.set_buffer(Some(Arc::clone(&buffer)));
    dc.set_pipe(Some(Arc::clone(&playback.pipe)));
    dc.start(song);

    if playback.wait_for_decoder() {
        pc.set_state(PlayerState::Play);
        pc.command_finished();
        playback.run();
        playback.teardown(false);
    } else {
        // The song never started; the originating command is still ours
        // to acknowledge.
        playback.teardown(true);
    }
}

impl Playback<'_> {
    /// Wait for the decoder to accept the pending start, then take over
    /// the new song. False when the decoder failed instead.
    fn wait_for_decoder(&mut self) -> bool {
        self.dc.command_wait();

        if self.dc.has_failed() {
            let errored = self.dc.current_song().or_else(|| self.pc.next_song());
            if let Some(song) = errored {
                self.pc.set_error(FailureKind::File, song);
            }
            self.pc.clear_next_song();
            return false;
        }

        let Some(next) = self.pc.take_next_song() else {
            debug_assert!(false, "decoder started without a next song");
            return false;
        };
        let total_time = next
            .tag
            .as_ref()
            .map(|tag| tag.duration_or_zero())
            .unwrap_or(0.0);
        self.pc.begin_song(total_time);
        tracing::debug!(target: "player", url = %next.url, "song taken over");
        self.song = Some(next);
        self.queued = false;
        self.decoder_starting = true;
        self.buffering = true;

        // The playlist owner resynchronises with the queue on this.
        self.events.emit(PipeEvent::Playlist);
        true
    }

    /// Advance the startup handshake: open the outputs once the decoder
    /// has published the stream. False breaks the playback loop.
    fn check_decoder_startup(&mut self) -> bool {
        debug_assert!(self.decoder_starting);

        if self.dc.has_failed() {
            if let Some(song) = self.dc.current_song() {
                self.pc.set_error(FailureKind::File, song);
            }
            return false;
        }

        if self.dc.is_starting() {
            // Not ready; the decoder signals on every transition.
            self.pc.notify.wait();
            return true;
        }

        self.decoder_starting = false;
        let Some(format) = self.dc.out_audio_format() else {
            debug_assert!(false, "decoder ready without a format");
            return false;
        };

        if let Err(e) = self.outputs.open(Some(&format)) {
            let song = self.dc.current_song().or_else(|| self.song.clone());
            if let Some(song) = song {
                tracing::warn!(
                    target: "player",
                    url = %song.url,
                    error = %e,
                    "problems opening audio device"
                );
                self.pc.set_error(FailureKind::Audio, song);
            }
            return false;
        }

        if self.paused {
            // Keep the device free while paused; unpausing reopens it.
            self.outputs.close();
        }

        self.pc
            .set_stream_info(self.dc.total_time(), self.dc.in_audio_format().unwrap_or(format));
        self.play_audio_format = Some(format);
        self.size_to_time = format.size_to_time();
        true
    }

    /// The seek protocol. Always acknowledges the command; true when the
    /// decoder repositioned successfully.
    fn seek_decoder(&mut self) -> bool {
        let target = self.pc.next_song();

        if self.dc.current_song() != target {
            // The decoder is on some other song (a queued successor, or
            // nothing): restart it on the seek target.
            self.dc_stop_and_clear();
            self.pipe.clear(&self.buffer);
            self.dc.set_pipe(Some(Arc::clone(&self.pipe)));
            if let Some(song) = target {
                self.dc.start_async(song);
            }
            if !self.wait_for_decoder() {
                self.pc.command_finished();
                return false;
            }
        } else {
            self.pc.clear_next_song();
            self.queued = false;
        }

        let total = self.pc.total_time();
        let mut seconds = self.pc.seek_where();
        if seconds > total {
            seconds = total - 0.1;
        }
        if seconds < 0.0 {
            seconds = 0.0;
        }

        let ok = self.dc.seek(seconds);
        if ok {
            self.pc.set_elapsed(seconds);
        }
        self.pc.command_finished();
        ok
    }

    /// Handle whatever sits in the command mailbox. Loop-terminating
    /// commands (Stop/Exit/CloseAudio) are left in place for the caller.
    fn process_command(&mut self) {
        match self.pc.command() {
            Command::None
            | Command::Play
            | Command::Stop
            | Command::Exit
            | Command::CloseAudio => {}

            Command::Queue => {
                debug_assert!(self.pc.has_next_song());
                debug_assert!(!self.queued);
                debug_assert!(self.dc.pipe().is_none() || self.dc.pipe_is(&self.pipe));
                self.queued = true;
                self.pc.command_finished();
            }

            Command::Pause => {
                self.paused = !self.paused;
                if self.paused {
                    self.outputs.pause();
                    self.pc.set_state(PlayerState::Pause);
                } else if self.outputs.open(None).is_ok() {
                    self.pc.set_state(PlayerState::Play);
                } else {
                    // Could not reopen the device: stay paused.
                    if let Some(song) = self.song.clone() {
                        self.pc.set_error(FailureKind::Audio, song);
                    }
                    self.paused = true;
                }
                self.pc.command_finished();
            }

            Command::Seek => {
                if self.seek_decoder() {
                    self.xfade = Xfade::Unknown;
                    // The user moved; the initial fill no longer applies.
                    self.buffering = false;
                    self.outputs.cancel();
                }
            }

            Command::Cancel => {
                if !self.pc.has_next_song() {
                    // Too late: the queued song is the current song now.
                    self.pc.upgrade_cancel_to_stop();
                    return;
                }
                if self.dc.has_other_pipe(&self.pipe) {
                    // The decoder already moved on to the queued song.
                    self.dc_stop_and_clear();
                }
                self.pc.clear_next_song();
                self.queued = false;
                self.pc.command_finished();
            }
        }
    }

    /// Stop the decoder and reclaim whatever pipe it was filling.
    fn dc_stop_and_clear(&mut self) {
        self.dc.stop();
        if let Some(dc_pipe) = self.dc.pipe() {
            dc_pipe.clear(&self.buffer);
            self.dc.set_pipe(None);
        }
    }

    fn stop_decoder(&mut self) {
        self.dc.stop();
        self.pc.set_state(PlayerState::Stop);
        self.events.emit(PipeEvent::Playlist);
    }

    /// Submit one chunk: timestamp/bit-rate bookkeeping, tag handling,
    /// software volume, output. The chunk returns to the pool either way.
    fn play_chunk(&mut self, mut chunk: Box<MusicChunk>) -> bool {
        let ok = self.play_chunk_inner(&mut chunk);
        self.buffer.lock().release(chunk);
        ok
    }

    fn play_chunk_inner(&mut self, chunk: &mut MusicChunk) -> bool {
        let Some(format) = self.play_audio_format else {
            debug_assert!(false, "chunk played before outputs opened");
            return false;
        };
        debug_assert!(chunk.length == 0 || chunk.matches_format(&format));

        self.pc.update_chunk_progress(chunk.times, chunk.bit_rate);

        if let Some(tag) = chunk.tag.take() {
            self.outputs.send_tag(&tag);
            if let Some(song) = &mut self.song {
                if !song.is_file() {
                    // Remote streams retag mid-play. Keep a private copy
                    // and let the playlist owner apply the real update.
                    song.tag = Some(tag.clone());
                    self.events.emit(PipeEvent::Tag {
                        url: song.url.clone(),
                        tag,
                    });
                    self.events.idle_add(IdleFlags::PLAYER);
                }
            }
        }

        if chunk.length == 0 {
            return true;
        }

        let length = chunk.length;
        let volume = self.pc.software_volume();
        if let Err(e) = pcm_volume(&mut chunk.data_mut()[..length], &format, volume) {
            tracing::warn!(target: "player", error = %e, %format, "software volume failed");
            self.record_audio_error();
            return false;
        }

        if let Err(e) = self.outputs.play(chunk.data()) {
            tracing::warn!(target: "player", error = %e, "output rejected chunk");
            self.record_audio_error();
            return false;
        }

        self.pc.add_play_time(self.size_to_time * length as f64);
        true
    }

    fn record_audio_error(&mut self) {
        let song = self.dc.current_song().or_else(|| self.song.clone());
        if let Some(song) = song {
            self.pc.set_error(FailureKind::Audio, song);
        }
    }

    /// The pipe-non-empty step: crossfade when the fade window is open,
    /// otherwise play the next chunk straight. False breaks the loop.
    fn play_next_chunk(&mut self) -> bool {
        let mut chunk: Option<Box<MusicChunk>> = None;

        if self.xfade == Xfade::Enabled && self.dc.has_other_pipe(&self.pipe) {
            let fade_position = self.pipe.len();
            if fade_position <= self.cross_fade_chunks {
                let other = self.dc.pipe().and_then(|pipe| pipe.shift());
                match other {
                    Some(other) => {
                        if !self.cross_fading {
                            // The old song may have fewer chunks left than
                            // planned; fade over what actually remains.
                            self.cross_fade_chunks = fade_position;
                            self.cross_fading = true;
                        }
                        self.empty_shifts = 0;

                        if let Some(mut own) = self.pipe.shift() {
                            let format = self
                                .dc
                                .out_audio_format()
                                .or(self.play_audio_format)
                                .unwrap_or(AudioFormat::new(44100, 16, 2));
                            cross_fade_apply(
                                &mut own,
                                &other,
                                &format,
                                fade_position,
                                self.cross_fade_chunks,
                            );
                            self.buffer.lock().release(other);
                            chunk = Some(own);
                        } else {
                            self.buffer.lock().release(other);
                        }
                    }
                    None if self.dc.is_idle() => {
                        // The next song ended up shorter than the fade.
                        self.xfade = Xfade::Disabled;
                    }
                    None => {
                        self.empty_shifts += 1;
                        if self.empty_shifts >= XFADE_EMPTY_SHIFT_LIMIT {
                            tracing::debug!(target: "player", "starved crossfade abandoned");
                            self.xfade = Xfade::Disabled;
                            self.empty_shifts = 0;
                        } else {
                            // Not enough of the next song decoded yet.
                            self.dc.notify.signal();
                            self.pc.notify.wait();
                            return true;
                        }
                    }
                }
            }
        }

        let chunk = match chunk.or_else(|| self.pipe.shift()) {
            Some(chunk) => chunk,
            None => return true,
        };

        if !self.play_chunk(chunk) {
            return false;
        }

        // Wake the decoder only once its pipe runs low; batching refills
        // costs a little latency but saves a wakeup per chunk.
        if !self.dc.is_idle() {
            if let Some(dc_pipe) = self.dc.pipe() {
                let capacity = self.pc.buffer_chunks * CHUNK_SIZE;
                if dc_pipe.bytes() <= (self.pc.buffered_before_play + capacity) * 3 / 4 {
                    self.dc.notify.signal();
                }
            }
        }
        true
    }

    /// Keep the device fed while the decoder catches up. Whole frames
    /// only.
    fn play_silence(&mut self) -> bool {
        static SILENCE: [u8; CHUNK_SIZE] = [0; CHUNK_SIZE];

        let Some(format) = self.play_audio_format else {
            return true;
        };
        let frame_size = format.frame_size();
        let num_frames = CHUNK_SIZE / frame_size;
        if let Err(e) = self.outputs.play(&SILENCE[..num_frames * frame_size]) {
            tracing::warn!(target: "player", error = %e, "output rejected silence");
            return false;
        }
        true
    }

    fn run(&mut self) {
        loop {
            self.process_command();
            match self.pc.command() {
                Command::Stop | Command::Exit | Command::CloseAudio => {
                    self.outputs.cancel();
                    break;
                }
                _ => {}
            }

            if self.buffering {
                if self.pipe.bytes() < self.pc.buffered_before_play && !self.dc.is_idle() {
                    // Not enough decoded yet.
                    self.pc.notify.wait();
                    continue;
                }
                self.buffering = false;
            }

            if self.decoder_starting {
                if !self.check_decoder_startup() {
                    break;
                }
                continue;
            }

            if self.dc.is_idle() && self.queued {
                // The decoder finished the current song; point it at the
                // queued one, in a pipe of its own.
                debug_assert!(self.pc.has_next_song());
                debug_assert!(self.dc.pipe().is_none() || self.dc.pipe_is(&self.pipe));
                self.queued = false;
                self.dc.set_pipe(Some(Arc::new(MusicPipe::new())));
                if let Some(song) = self.pc.next_song() {
                    self.dc.start_async(song);
                }
            }

            if self.dc.has_other_pipe(&self.pipe)
                && self.xfade == Xfade::Unknown
                && !self.dc.is_starting()
            {
                // Both songs are known now; decide the fade once.
                let before_chunks = self.pc.buffered_before_play / CHUNK_SIZE;
                let max_chunks = self.pc.buffer_chunks.saturating_sub(before_chunks);
                let chunks = match (self.dc.out_audio_format(), self.play_audio_format) {
                    (Some(next_format), Some(current_format)) => cross_fade_calc(
                        self.pc.cross_fade_seconds(),
                        self.dc.total_time(),
                        &next_format,
                        &current_format,
                        max_chunks,
                    ),
                    _ => 0,
                };
                if chunks > 0 {
                    self.xfade = Xfade::Enabled;
                    self.cross_fade_chunks = chunks;
                    self.cross_fading = false;
                    self.empty_shifts = 0;
                } else {
                    self.xfade = Xfade::Disabled;
                }
            }

            if self.paused {
                self.pc.notify.wait();
            } else if !self.pipe.is_empty() {
                if !self.play_next_chunk() {
                    break;
                }
            } else if self.dc.has_other_pipe(&self.pipe) {
                // The current song drained and the decoder is already on
                // the next one: song boundary.
                self.xfade = Xfade::Unknown;
                if let Some(next_pipe) = self.dc.pipe() {
                    self.pipe = next_pipe;
                }
                if !self.wait_for_decoder() {
                    break;
                }
            } else if self.dc.is_idle() {
                // Nothing left anywhere: end of the playback run.
                break;
            } else if !self.play_silence() {
                break;
            }
        }
    }

    /// Wind the session down: stop the decoder, reclaim every chunk, and
    /// detach from the control blocks.
    fn teardown(&mut self, ack_pending_command: bool) {
        if self.queued {
            debug_assert!(self.pc.has_next_song());
            self.pc.clear_next_song();
        }

        self.stop_decoder();
        if ack_pending_command {
            self.pc.command_finished();
        }

        if let Some(dc_pipe) = self.dc.pipe() {
            dc_pipe.clear(&self.buffer);
            self.dc.set_pipe(None);
        }
        self.pipe.clear(&self.buffer);
        self.dc.set_buffer(None);

        debug_assert_eq!(self.buffer.lock().outstanding(), 0, "chunk leak");
    }
}
