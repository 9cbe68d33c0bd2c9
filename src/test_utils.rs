//! Test fixtures: scripted decoder streams and a collecting output bank.
//!
//! The fakes speak the same traits the real symphonia/cpal collaborators
//! do, so the whole player stack runs in-process with no files and no
//! audio device. A [`FakeSong`] scripts what one "decoded" song looks
//! like; [`CollectingOutput`] records every call the player makes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::audio::format::AudioFormat;
use crate::decoder::{DecodeError, ReadInfo, SongStream, StreamOpener};
use crate::output::{OutputBank, OutputError};
use crate::song::{Song, Tag};

/// 44100 Hz, 16-bit, stereo.
pub fn cd_format() -> AudioFormat {
    AudioFormat::new(44100, 16, 2)
}

/// Script for one fake song.
#[derive(Debug, Clone)]
pub struct FakeSong {
    pub url: String,
    pub format: AudioFormat,
    pub total_bytes: usize,
    /// Largest number of bytes one read produces
    pub read_size: usize,
    /// Reported total time; derived from the byte count when None
    pub total_time: Option<f64>,
    pub fail_open: bool,
    pub fail_seek: bool,
    /// Payload byte, nonzero so real audio is distinguishable from silence
    pub fill: u8,
    /// Emit a tag-only read before the Nth data read
    pub tag_at: Option<(usize, Tag)>,
}

impl FakeSong {
    pub fn new(url: impl Into<String>, reads: usize, read_size: usize) -> Self {
        Self {
            url: url.into(),
            format: cd_format(),
            total_bytes: reads * read_size,
            read_size,
            total_time: None,
            fail_open: false,
            fail_seek: false,
            fill: 0x11,
            tag_at: None,
        }
    }

    /// A song of exactly `total_bytes`, produced in 4096-byte reads.
    pub fn bytes(url: impl Into<String>, total_bytes: usize) -> Self {
        Self {
            total_bytes,
            ..Self::new(url, 0, 4096)
        }
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    pub fn with_total_time(mut self, seconds: f64) -> Self {
        self.total_time = Some(seconds);
        self
    }

    pub fn with_tag_at(mut self, read: usize, tag: Tag) -> Self {
        self.tag_at = Some((read, tag));
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }
}

struct FakeStream {
    song: FakeSong,
    position: usize,
    reads: usize,
    pending_tag: Option<Tag>,
}

impl SongStream for FakeStream {
    fn format(&self) -> AudioFormat {
        self.song.format
    }

    fn total_time(&self) -> f64 {
        self.song
            .total_time
            .unwrap_or(self.song.total_bytes as f64 * self.song.format.size_to_time())
    }

    fn take_pending_tag(&mut self) -> Option<Tag> {
        self.pending_tag.take()
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        if self.song.fail_seek {
            return Err(DecodeError::Seek("scripted seek failure".to_string()));
        }
        self.position = self
            .song
            .format
            .time_to_size(seconds.max(0.0))
            .min(self.song.total_bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<ReadInfo>, DecodeError> {
        let time = self.position as f64 * self.song.format.size_to_time();

        if let Some((at, _)) = &self.song.tag_at {
            if self.reads == *at {
                let (_, tag) = self.song.tag_at.take().unwrap();
                self.pending_tag = Some(tag);
                self.reads += 1;
                return Ok(Some(ReadInfo {
                    bytes: 0,
                    time,
                    bit_rate: 0,
                }));
            }
        }

        let remaining = self.song.total_bytes - self.position;
        if remaining == 0 {
            return Ok(None);
        }
        let n = buf.len().min(self.song.read_size).min(remaining);
        buf[..n].fill(self.song.fill);
        self.position += n;
        self.reads += 1;
        Ok(Some(ReadInfo {
            bytes: n,
            time,
            bit_rate: 128,
        }))
    }
}

#[derive(Default)]
struct OpenerInner {
    songs: Mutex<HashMap<String, FakeSong>>,
    opened: Mutex<Vec<String>>,
}

/// A [`StreamOpener`] serving scripted songs by URL. Clones share state,
/// so tests keep one handle while the decoder owns another.
#[derive(Clone, Default)]
pub struct FakeOpener {
    inner: Arc<OpenerInner>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_song(&self, song: FakeSong) {
        self.inner.songs.lock().insert(song.url.clone(), song);
    }

    /// URLs opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.inner.opened.lock().clone()
    }
}

impl StreamOpener for FakeOpener {
    fn open(&mut self, song: &Song) -> Result<Box<dyn SongStream>, DecodeError> {
        let scripted = self
            .inner
            .songs
            .lock()
            .get(&song.url)
            .cloned()
            .ok_or_else(|| DecodeError::Open {
                url: song.url.clone(),
                message: "no such fixture".to_string(),
            })?;
        if scripted.fail_open {
            return Err(DecodeError::Open {
                url: song.url.clone(),
                message: "scripted open failure".to_string(),
            });
        }
        self.inner.opened.lock().push(song.url.clone());
        Ok(Box::new(FakeStream {
            song: scripted,
            position: 0,
            reads: 0,
            pending_tag: None,
        }))
    }
}

/// One call the player made on the output bank.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputOp {
    Open(Option<AudioFormat>),
    Close,
    Play { len: usize, silent: bool },
    Pause,
    Cancel,
    Tag(Tag),
}

#[derive(Default)]
struct CollectingInner {
    ops: Mutex<Vec<OutputOp>>,
    fail_open: AtomicBool,
    fail_play: AtomicBool,
}

/// An [`OutputBank`] that records what happened instead of making noise.
#[derive(Clone, Default)]
pub struct CollectingOutput {
    inner: Arc<CollectingInner>,
}

impl CollectingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<OutputOp> {
        self.inner.ops.lock().clone()
    }

    pub fn fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_play(&self, fail: bool) {
        self.inner.fail_play.store(fail, Ordering::SeqCst);
    }
}

impl OutputBank for CollectingOutput {
    fn open(&mut self, format: Option<&AudioFormat>) -> Result<(), OutputError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(OutputError::DeviceInit("scripted open failure".to_string()));
        }
        self.inner.ops.lock().push(OutputOp::Open(format.copied()));
        Ok(())
    }

    fn close(&mut self) {
        self.inner.ops.lock().push(OutputOp::Close);
    }

    fn play(&mut self, data: &[u8]) -> Result<(), OutputError> {
        if self.inner.fail_play.load(Ordering::SeqCst) {
            return Err(OutputError::Stream("scripted play failure".to_string()));
        }
        self.inner.ops.lock().push(OutputOp::Play {
            len: data.len(),
            silent: data.iter().all(|&b| b == 0),
        });
        Ok(())
    }

    fn pause(&mut self) {
        self.inner.ops.lock().push(OutputOp::Pause);
    }

    fn cancel(&mut self) {
        self.inner.ops.lock().push(OutputOp::Cancel);
    }

    fn send_tag(&mut self, tag: &Tag) {
        self.inner.ops.lock().push(OutputOp::Tag(tag.clone()));
    }
}
