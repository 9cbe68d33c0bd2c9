//! Audio output through cpal.
//!
//! cpal streams are not `Send`, so the stream object lives on a dedicated
//! "audio-output" thread for as long as the bank is open. The player only
//! ever touches the lock-free ring-buffer producer and two atomic flags;
//! the cpal callback drains the ring on a high-priority system thread and
//! never locks or allocates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio::format::AudioFormat;
use crate::output::{OutputBank, OutputError};
use crate::song::Tag;

/// Flags shared with the realtime callback.
struct CallbackState {
    /// When false the callback emits silence and leaves the ring alone
    playing: AtomicBool,
    /// When true the callback drains the ring and emits silence
    flushing: AtomicBool,
}

struct OpenStream {
    producer: Producer<f32>,
    shared: Arc<CallbackState>,
    format: AudioFormat,
    /// Dropping this releases the stream-host thread
    close_tx: Sender<()>,
    host_thread: Option<JoinHandle<()>>,
}

/// [`OutputBank`] implementation for the default system audio device.
pub struct DeviceOutput {
    opened: Option<OpenStream>,
    last_format: Option<AudioFormat>,
}

impl DeviceOutput {
    pub fn new() -> Self {
        Self {
            opened: None,
            last_format: None,
        }
    }

    fn open_stream(&mut self, format: AudioFormat) -> Result<(), OutputError> {
        let shared = Arc::new(CallbackState {
            playing: AtomicBool::new(true),
            flushing: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = bounded(1);
        let (close_tx, close_rx) = bounded(1);
        let callback_shared = Arc::clone(&shared);
        let host_thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || stream_host(format, callback_shared, ready_tx, close_rx))
            .map_err(|e| OutputError::DeviceInit(e.to_string()))?;

        let producer = match ready_rx.recv() {
            Ok(Ok(producer)) => producer,
            Ok(Err(e)) => {
                let _ = host_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = host_thread.join();
                return Err(OutputError::DeviceInit(
                    "audio host thread died".to_string(),
                ));
            }
        };

        self.opened = Some(OpenStream {
            producer,
            shared,
            format,
            close_tx,
            host_thread: Some(host_thread),
        });
        self.last_format = Some(format);
        Ok(())
    }
}

impl Default for DeviceOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBank for DeviceOutput {
    fn open(&mut self, format: Option<&AudioFormat>) -> Result<(), OutputError> {
        if let Some(open) = &self.opened {
            // Reopening an already-open stream just resumes it, as long
            // as no new format is asked for.
            if format.is_none() || format == Some(&open.format) {
                open.shared.playing.store(true, Ordering::Release);
                return Ok(());
            }
        }
        let format = match format {
            Some(format) => *format,
            None => self.last_format.ok_or(OutputError::NotOpen)?,
        };
        self.close();
        self.open_stream(format)
    }

    fn close(&mut self) {
        if let Some(mut open) = self.opened.take() {
            let _ = open.close_tx.send(());
            if let Some(host) = open.host_thread.take() {
                let _ = host.join();
            }
            tracing::debug!(target: "output", "audio device closed");
        }
    }

    fn play(&mut self, data: &[u8]) -> Result<(), OutputError> {
        let open = self.opened.as_mut().ok_or(OutputError::NotOpen)?;
        let bits = open.format.bits;

        // A cancel may still be draining; from here on the ring carries
        // fresh audio again.
        open.shared.flushing.store(false, Ordering::Release);

        let producer = &mut open.producer;
        let mut push = |sample: f32| {
            let mut sample = sample;
            loop {
                match producer.push(sample) {
                    Ok(()) => return true,
                    Err(rtrb::PushError::Full(rejected)) => {
                        if producer.is_abandoned() {
                            return false;
                        }
                        sample = rejected;
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        };

        let ok = match bits {
            8 => data.iter().all(|&b| push((b as i8) as f32 / 128.0)),
            16 => data
                .chunks_exact(2)
                .all(|b| push(i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)),
            32 => data.chunks_exact(4).all(|b| {
                push(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2147483648.0)
            }),
            bits => {
                return Err(OutputError::UnsupportedFormat(format!("{bits}-bit samples")));
            }
        };

        if ok {
            Ok(())
        } else {
            Err(OutputError::Stream("audio stream went away".to_string()))
        }
    }

    fn pause(&mut self) {
        if let Some(open) = &self.opened {
            open.shared.playing.store(false, Ordering::Release);
        }
    }

    fn cancel(&mut self) {
        if let Some(open) = &self.opened {
            open.shared.flushing.store(true, Ordering::Release);
        }
    }

    fn send_tag(&mut self, tag: &Tag) {
        tracing::info!(
            target: "output",
            title = tag.title.as_deref().unwrap_or("?"),
            artist = tag.artist.as_deref().unwrap_or("?"),
            "now playing"
        );
    }
}

/// Names of the available output devices.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Body of the stream-host thread: builds the stream, hands the producer
/// back, then keeps the stream alive until the bank closes (or drops).
fn stream_host(
    format: AudioFormat,
    shared: Arc<CallbackState>,
    ready_tx: Sender<Result<Producer<f32>, OutputError>>,
    close_rx: Receiver<()>,
) {
    match build_device_stream(format, shared) {
        Ok((stream, producer)) => {
            if ready_tx.send(Ok(producer)).is_err() {
                return;
            }
            // Blocks until close() sends or the bank is dropped.
            let _ = close_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

fn build_device_stream(
    format: AudioFormat,
    shared: Arc<CallbackState>,
) -> Result<(Stream, Producer<f32>), OutputError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| OutputError::DeviceInit("no output device found".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    tracing::info!(target: "output", device = %device_name, %format, "opening audio device");

    let supported = device
        .default_output_config()
        .map_err(|e| OutputError::DeviceInit(e.to_string()))?;

    let config = StreamConfig {
        channels: format.channels as u16,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Half a second of headroom between the player and the callback.
    let ring_len = (format.sample_rate as usize * format.channels as usize) / 2;
    let (producer, consumer) = RingBuffer::<f32>::new(ring_len.max(1024));

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, shared),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, shared),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, shared),
        other => {
            return Err(OutputError::UnsupportedFormat(format!(
                "device sample format {other:?}"
            )));
        }
    }
    .map_err(|e| OutputError::UnsupportedFormat(e.to_string()))?;

    stream
        .play()
        .map_err(|e| OutputError::Stream(e.to_string()))?;

    Ok((stream, producer))
}

/// Build the device stream. The callback uses only atomics and the
/// lock-free ring - no locks, no allocations.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: Consumer<f32>,
    shared: Arc<CallbackState>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if shared.flushing.load(Ordering::Acquire) {
                while consumer.pop().is_ok() {}
                for sample in data.iter_mut() {
                    *sample = T::from_sample(0.0f32);
                }
                return;
            }

            if !shared.playing.load(Ordering::Acquire) {
                for sample in data.iter_mut() {
                    *sample = T::from_sample(0.0f32);
                }
                return;
            }

            for sample in data.iter_mut() {
                *sample = T::from_sample(consumer.pop().unwrap_or(0.0));
            }
        },
        |err| {
            tracing::error!(target: "output", error = %err, "audio stream error");
        },
        None,
    )
}

// ============================================================================
// Verify the cpal/rtrb API contracts this module relies on, without needing
// a real device to produce sound.
// ============================================================================

#[cfg(test)]
mod cpal_api_tests {
    use super::*;

    /// cpal::default_host() is the entry point; HostTrait gives us device
    /// enumeration.
    #[test]
    fn test_default_host_available() {
        let host = cpal::default_host();

        let _devices_result = host.output_devices();
        let _default_device = host.default_output_device();
    }

    /// DeviceTrait carries the methods open_stream calls.
    #[test]
    fn test_device_trait_methods() {
        let host = cpal::default_host();

        if let Some(device) = host.default_output_device() {
            let _name: Result<String, _> = device.name();
            let _config = device.default_output_config();
        }
    }

    /// The SampleFormat variants build_device_stream matches on.
    #[test]
    fn test_sample_format_variants() {
        let formats = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

        // Debug is used in the unsupported-format error message.
        for format in formats {
            let _ = format!("{format:?}");
        }
    }

    /// StreamConfig is built from our AudioFormat fields.
    #[test]
    fn test_stream_config_construction() {
        let format = AudioFormat::new(44100, 16, 2);
        let config = StreamConfig {
            channels: format.channels as u16,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_rate.0, 44100);
        assert!(matches!(config.buffer_size, cpal::BufferSize::Default));
    }

    /// StreamTrait::play() is how the stream is started after building.
    #[test]
    fn test_stream_trait_play_exists() {
        #[allow(dead_code)]
        fn requires_stream_trait<T: StreamTrait>(_s: &T) {}
    }

    /// The generic bounds build_stream instantiates for each device
    /// sample format.
    #[test]
    fn test_sample_traits_for_output_types() {
        fn requires_sample_traits<T: cpal::SizedSample + cpal::FromSample<f32>>() {}

        requires_sample_traits::<f32>();
        requires_sample_traits::<i16>();
        requires_sample_traits::<u16>();
    }

    /// SupportedStreamConfig exposes the sample format we dispatch on.
    #[test]
    fn test_supported_stream_config_methods() {
        let host = cpal::default_host();

        if let Some(device) = host.default_output_device()
            && let Ok(supported) = device.default_output_config()
        {
            let _rate = supported.sample_rate();
            let _channels = supported.channels();
            let _format = supported.sample_format();
        }
    }

    /// The callback signature build_stream hands to cpal.
    #[test]
    fn test_output_callback_info_exists() {
        #[allow(dead_code)]
        fn callback_signature(_data: &mut [f32], _info: &cpal::OutputCallbackInfo) {}
    }

    /// Device enumeration must not panic on machines with no audio at all.
    #[test]
    fn test_list_devices_never_panics() {
        let _ = list_devices();
    }

    /// play() leans on rtrb's contract: a full ring hands the sample back,
    /// and a dropped consumer is observable as abandonment.
    #[test]
    fn test_ring_buffer_contract() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(2);
        assert!(producer.push(0.1).is_ok());
        assert!(producer.push(0.2).is_ok());
        match producer.push(0.3) {
            Err(rtrb::PushError::Full(rejected)) => assert_eq!(rejected, 0.3),
            Ok(()) => panic!("ring accepted more than its capacity"),
        }

        assert_eq!(consumer.pop().unwrap(), 0.1);
        assert!(!producer.is_abandoned());
        drop(consumer);
        assert!(producer.is_abandoned());
    }

    /// The stream-host thread exits when the bank drops its close sender.
    #[test]
    fn test_close_channel_drop_releases_host() {
        let (close_tx, close_rx) = bounded::<()>(1);
        drop(close_tx);
        assert!(close_rx.recv().is_err());
    }
}
