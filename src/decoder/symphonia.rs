//! Symphonia-backed [`StreamOpener`] for local files.
//!
//! Decodes whatever symphonia probes (MP3, FLAC, OGG, WAV, AAC, PCM) down
//! to interleaved little-endian 16-bit PCM, the format the rest of the
//! daemon moves around. Sample-rate conversion is deliberately absent:
//! the stream's native rate is published and the output bank either
//! accepts it or fails to open.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::audio::format::AudioFormat;
use crate::decoder::{DecodeError, ReadInfo, SongStream, StreamOpener};
use crate::song::{Song, Tag};

/// Opens local files with symphonia's default probe.
#[derive(Debug, Default)]
pub struct SymphoniaOpener;

impl SymphoniaOpener {
    pub fn new() -> Self {
        Self
    }
}

impl StreamOpener for SymphoniaOpener {
    fn open(&mut self, song: &Song) -> Result<Box<dyn SongStream>, DecodeError> {
        if !song.is_file() {
            return Err(DecodeError::Unsupported(format!(
                "remote streams are not supported by this decoder: {}",
                song.url
            )));
        }
        Ok(Box::new(SymphoniaStream::open(Path::new(&song.url))?))
    }
}

struct SymphoniaStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    total_time: f64,
    time_base: Option<TimeBase>,
    pending_tag: Option<Tag>,
    /// Decoded-but-unread bytes left over from the last packet
    pending: Vec<u8>,
    pending_offset: usize,
    /// Timestamp of the next byte handed out, in seconds
    base_time: f64,
    position_bytes: u64,
    bit_rate: u32,
}

impl SymphoniaStream {
    fn open(path: &Path) -> Result<Self, DecodeError> {
        let open_err = |message: String| DecodeError::Open {
            url: path.display().to_string(),
            message,
        };

        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut reader = probed.format;
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no audio track".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Unsupported("unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count() as u8).unwrap_or(2);
        let format = AudioFormat::new(sample_rate, 16, channels);

        let time_base = codec_params.time_base;
        let total_time = match (codec_params.n_frames, time_base) {
            (Some(n_frames), Some(tb)) => {
                let time = tb.calc_time(n_frames);
                time.seconds as f64 + time.frac
            }
            (Some(n_frames), None) => n_frames as f64 / sample_rate as f64,
            _ => 0.0,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| open_err(e.to_string()))?;

        // Prefer container metadata, fall back to what the probe gathered.
        let mut pending_tag = reader
            .metadata()
            .current()
            .map(|rev| tag_from_revision(rev, total_time));
        if pending_tag.is_none() {
            pending_tag = probed
                .metadata
                .get()
                .as_ref()
                .and_then(|m| m.current())
                .map(|rev| tag_from_revision(rev, total_time));
        }

        Ok(Self {
            reader,
            decoder,
            track_id,
            format,
            total_time,
            time_base,
            pending_tag,
            pending: Vec::new(),
            pending_offset: 0,
            base_time: 0.0,
            position_bytes: 0,
            bit_rate: 0,
        })
    }

    /// Decode packets until some PCM is pending. False at end of stream.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::Stream(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            if let Some(tb) = self.time_base {
                let dur = tb.calc_time(packet.dur());
                let dur = dur.seconds as f64 + dur.frac;
                if dur > 0.0 {
                    self.bit_rate = (packet.data.len() as f64 * 8.0 / dur / 1000.0) as u32;
                }
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // A corrupt frame is skipped, not fatal.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DecodeError::Stream(e.to_string())),
            };

            self.pending.clear();
            self.pending_offset = 0;
            append_as_i16(&decoded, &mut self.pending);
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl SongStream for SymphoniaStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_time(&self) -> f64 {
        self.total_time
    }

    fn take_pending_tag(&mut self) -> Option<Tag> {
        self.pending_tag.take()
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::Seek(e.to_string()))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_offset = 0;
        self.position_bytes = 0;
        self.base_time = match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(seeked.actual_ts);
                time.seconds as f64 + time.frac
            }
            None => seconds,
        };
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<ReadInfo>, DecodeError> {
        let time = self.base_time + self.position_bytes as f64 * self.format.size_to_time();
        let mut written = 0;

        while written < buf.len() {
            if self.pending_offset >= self.pending.len() && !self.refill()? {
                break;
            }
            let available = &self.pending[self.pending_offset..];
            let n = available.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.pending_offset += n;
        }

        if written == 0 {
            return Ok(None);
        }
        self.position_bytes += written as u64;
        Ok(Some(ReadInfo {
            bytes: written,
            time,
            bit_rate: self.bit_rate,
        }))
    }
}

/// Interleave a decoded buffer into little-endian i16 bytes.
fn append_as_i16(buffer: &AudioBufferRef, out: &mut Vec<u8>) {
    fn interleave<S, F>(planes: &[&[S]], out: &mut Vec<u8>, convert: F)
    where
        S: Copy,
        F: Fn(S) -> i16,
    {
        if planes.is_empty() {
            return;
        }
        let frames = planes[0].len();
        out.reserve(frames * planes.len() * 2);
        for frame in 0..frames {
            for plane in planes {
                out.extend_from_slice(&convert(plane[frame]).to_le_bytes());
            }
        }
    }

    match buffer {
        AudioBufferRef::F32(buf) => {
            let planes = buf.planes();
            interleave(planes.planes(), out, |s: f32| {
                (s.clamp(-1.0, 1.0) * 32767.0) as i16
            });
        }
        AudioBufferRef::S16(buf) => {
            let planes = buf.planes();
            interleave(planes.planes(), out, |s: i16| s);
        }
        AudioBufferRef::S24(buf) => {
            let planes = buf.planes();
            interleave(planes.planes(), out, |s| (s.0 >> 8) as i16);
        }
        AudioBufferRef::S32(buf) => {
            let planes = buf.planes();
            interleave(planes.planes(), out, |s: i32| (s >> 16) as i16);
        }
        AudioBufferRef::U8(buf) => {
            let planes = buf.planes();
            interleave(planes.planes(), out, |s: u8| {
                ((s as i16 - 128) << 8) as i16
            });
        }
        _ => {}
    }
}

fn tag_from_revision(rev: &MetadataRevision, total_time: f64) -> Tag {
    let mut tag = Tag {
        duration: (total_time > 0.0).then_some(total_time),
        ..Tag::default()
    };
    for t in rev.tags() {
        match t.std_key {
            Some(StandardTagKey::TrackTitle) => tag.title = Some(t.value.to_string()),
            Some(StandardTagKey::Artist) => tag.artist = Some(t.value.to_string()),
            Some(StandardTagKey::Album) => tag.album = Some(t.value.to_string()),
            _ => {}
        }
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Minimal 16-bit PCM WAV writer for fixtures.
    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        let data_len = frames * channels as u32 * 2;
        let byte_rate = sample_rate * channels as u32 * 2;
        let block_align = channels * 2;

        let mut f = File::create(path).unwrap();
        f.write_all(b"RIFF").unwrap();
        f.write_all(&(36 + data_len).to_le_bytes()).unwrap();
        f.write_all(b"WAVE").unwrap();
        f.write_all(b"fmt ").unwrap();
        f.write_all(&16u32.to_le_bytes()).unwrap();
        f.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
        f.write_all(&channels.to_le_bytes()).unwrap();
        f.write_all(&sample_rate.to_le_bytes()).unwrap();
        f.write_all(&byte_rate.to_le_bytes()).unwrap();
        f.write_all(&block_align.to_le_bytes()).unwrap();
        f.write_all(&16u16.to_le_bytes()).unwrap();
        f.write_all(b"data").unwrap();
        f.write_all(&data_len.to_le_bytes()).unwrap();
        for i in 0..frames {
            let sample = ((i % 256) as i16 - 128) * 64;
            for _ in 0..channels {
                f.write_all(&sample.to_le_bytes()).unwrap();
            }
        }
    }

    #[test]
    fn test_open_missing_file() {
        let mut opener = SymphoniaOpener::new();
        assert!(opener.open(&Song::new("/nonexistent/file.flac")).is_err());
    }

    #[test]
    fn test_remote_url_rejected() {
        let mut opener = SymphoniaOpener::new();
        assert!(
            opener
                .open(&Song::new("http://radio.example/stream"))
                .is_err()
        );
    }

    #[test]
    fn test_decode_wav_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 2, 8000); // one second

        let mut opener = SymphoniaOpener::new();
        let mut stream = opener
            .open(&Song::new(path.display().to_string()))
            .unwrap();
        assert_eq!(stream.format(), AudioFormat::new(8000, 16, 2));
        assert!((stream.total_time() - 1.0).abs() < 0.01);

        let mut buf = [0u8; 4096];
        let mut total = 0usize;
        let mut last_time = -1.0;
        while let Some(info) = stream.read(&mut buf).unwrap() {
            assert!(info.time > last_time);
            last_time = info.time;
            total += info.bytes;
        }
        // 8000 frames * 4 bytes per frame.
        assert_eq!(total, 32_000);
    }

    #[test]
    fn test_seek_restarts_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 1, 16_000); // two seconds

        let mut opener = SymphoniaOpener::new();
        let mut stream = opener
            .open(&Song::new(path.display().to_string()))
            .unwrap();

        let mut buf = [0u8; 4096];
        stream.read(&mut buf).unwrap().unwrap();
        stream.seek(1.0).unwrap();
        let info = stream.read(&mut buf).unwrap().unwrap();
        assert!((info.time - 1.0).abs() < 0.1);
    }
}
