//! The decoder thread: turns Start commands into streams of chunks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::decoder::control::{DecoderCommand, DecoderControl, StartContext};
use crate::decoder::{SongStream, StreamOpener};

/// Spawn the decoder thread.
pub fn spawn(
    dc: Arc<DecoderControl>,
    opener: Box<dyn StreamOpener>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("decoder".to_string())
        .spawn(move || decoder_task(dc, opener))
}

fn decoder_task(dc: Arc<DecoderControl>, mut opener: Box<dyn StreamOpener>) {
    loop {
        match dc.pending_command() {
            DecoderCommand::None => dc.notify.wait(),
            DecoderCommand::Start => decode_song(&dc, opener.as_mut()),
            DecoderCommand::Stop => dc.ack_stop(),
            // A seek with no song running cannot succeed.
            DecoderCommand::Seek => dc.ack_seek(true),
            DecoderCommand::Quit => {
                tracing::debug!(target: "decoder", "decoder task exiting");
                return;
            }
        }
    }
}

/// Produce one song into the pipe, honouring Stop/Seek/Quit between chunks
/// and blocking when the chunk pool runs dry.
fn decode_song(dc: &DecoderControl, opener: &mut dyn StreamOpener) {
    let Some(ctx) = dc.begin_start() else {
        tracing::warn!(target: "decoder", "start abandoned: no song, pipe or buffer attached");
        return;
    };
    let StartContext { song, pipe, buffer } = ctx;

    tracing::debug!(target: "decoder", url = %song.url, "opening stream");
    let mut stream = match opener.open(&song) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(target: "decoder", url = %song.url, error = %e, "open failed");
            dc.set_error();
            return;
        }
    };

    let format = stream.format();
    dc.publish_stream(format, stream.total_time());

    loop {
        match dc.pending_command() {
            DecoderCommand::None => {}
            DecoderCommand::Stop => {
                dc.ack_stop();
                return;
            }
            DecoderCommand::Seek => {
                let seconds = dc.seek_where();
                match stream.seek(seconds) {
                    Ok(()) => {
                        // Frames decoded before the seek are stale.
                        pipe.clear(&buffer);
                        dc.ack_seek(false);
                    }
                    Err(e) => {
                        tracing::warn!(target: "decoder", error = %e, "seek failed");
                        dc.ack_seek(true);
                    }
                }
                continue;
            }
            // The outer loop owns shutdown; leave the command in the slot.
            DecoderCommand::Quit => return,
            DecoderCommand::Start => {
                // The player never restarts a running decoder.
                debug_assert!(false, "start while decoding");
                return;
            }
        }

        let mut chunk = match buffer.lock().allocate() {
            Ok(chunk) => chunk,
            Err(_) => {
                // Pool exhausted; the player signals when it frees chunks.
                dc.notify.wait();
                continue;
            }
        };

        match stream.read(chunk.data_mut()) {
            Err(e) => {
                tracing::warn!(target: "decoder", url = %song.url, error = %e, "stream died");
                buffer.lock().release(chunk);
                dc.set_error();
                return;
            }
            Ok(None) => {
                buffer.lock().release(chunk);
                break;
            }
            Ok(Some(info)) => {
                chunk.length = info.bytes;
                chunk.times = info.time;
                chunk.bit_rate = info.bit_rate;
                chunk.format = Some(format);
                chunk.tag = stream.take_pending_tag();
                if chunk.length == 0 && chunk.tag.is_none() {
                    buffer.lock().release(chunk);
                    continue;
                }
                pipe.push(chunk);
                dc.chunk_pushed();
            }
        }
    }

    tracing::debug!(target: "decoder", url = %song.url, "decode finished");
    dc.finish();
}
