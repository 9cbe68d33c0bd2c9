//! Crossfade planning and chunk mixing.
//!
//! `cross_fade_calc` decides, once per song pair, how many tail chunks of
//! the finishing song get mixed with head chunks of the next one.
//! `cross_fade_apply` performs the per-chunk linear mix while the fade is
//! running.

use crate::audio::chunk::{CHUNK_SIZE, MusicChunk};
use crate::audio::format::AudioFormat;

/// Number of chunks to crossfade between the current song and the next.
///
/// Returns 0 (fade disabled) when fading is off, the formats differ, the
/// sample depth is not mixable, or the next song is shorter than the fade
/// itself. The result is capped at `max_chunks`, the part of the chunk
/// buffer not reserved for pre-play buffering.
pub fn cross_fade_calc(
    seconds: f64,
    next_total_time: f64,
    next_format: &AudioFormat,
    current_format: &AudioFormat,
    max_chunks: usize,
) -> usize {
    if seconds <= 0.0 || max_chunks == 0 {
        return 0;
    }
    if next_format != current_format || !matches!(next_format.bits, 8 | 16 | 32) {
        return 0;
    }
    if next_total_time <= 0.0 || seconds >= next_total_time {
        // Unknown or too-short next song: fading would eat the whole song.
        return 0;
    }

    let bytes = next_format.time_to_size(seconds);
    let chunks = bytes.div_ceil(CHUNK_SIZE);
    chunks.min(max_chunks)
}

/// Mix `other` (head of the next song) into `own` (tail of the current
/// song), in place.
///
/// `position` counts the chunks left of the current song including this
/// one, so the old song's share falls linearly from 1 towards 0 as the
/// fade proceeds. When the next song's chunk is longer than the current
/// one, the surplus is appended so no new-song audio is dropped.
pub fn cross_fade_apply(
    own: &mut MusicChunk,
    other: &MusicChunk,
    format: &AudioFormat,
    position: usize,
    num_chunks: usize,
) {
    debug_assert!(num_chunks > 0 && position <= num_chunks);
    let own_share = position as f64 / num_chunks as f64;

    let mixed = own.length.min(other.length);
    mix_pcm(
        &mut own.data_mut()[..mixed],
        &other.data()[..mixed],
        format,
        own_share,
    );

    if other.length > own.length {
        let tail_start = own.length;
        // Copy into a scratch slice first: `extend` borrows `own` mutably.
        let tail: Vec<u8> = other.data()[tail_start..].to_vec();
        own.extend(&tail);
    }
}

fn mix_pcm(own: &mut [u8], other: &[u8], format: &AudioFormat, own_share: f64) {
    match format.bits {
        8 => {
            for (a, b) in own.iter_mut().zip(other) {
                *a = mix_sample(*a as i8 as f64, *b as i8 as f64, own_share, i8::MIN as f64, i8::MAX as f64)
                    as i8 as u8;
            }
        }
        16 => {
            for (a, b) in own.chunks_exact_mut(2).zip(other.chunks_exact(2)) {
                let sa = i16::from_le_bytes([a[0], a[1]]) as f64;
                let sb = i16::from_le_bytes([b[0], b[1]]) as f64;
                let mixed = mix_sample(sa, sb, own_share, i16::MIN as f64, i16::MAX as f64) as i16;
                a.copy_from_slice(&mixed.to_le_bytes());
            }
        }
        32 => {
            for (a, b) in own.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
                let sa = i32::from_le_bytes([a[0], a[1], a[2], a[3]]) as f64;
                let sb = i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64;
                let mixed = mix_sample(sa, sb, own_share, i32::MIN as f64, i32::MAX as f64) as i32;
                a.copy_from_slice(&mixed.to_le_bytes());
            }
        }
        // cross_fade_calc refuses other depths, so the fade never runs.
        _ => debug_assert!(false, "unmixable sample depth {}", format.bits),
    }
}

fn mix_sample(own: f64, other: f64, own_share: f64, min: f64, max: f64) -> f64 {
    (own * own_share + other * (1.0 - own_share)).clamp(min, max)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::audio::chunk::ChunkBuffer;
    use proptest::prelude::*;

    proptest! {
        /// A mixed sample always lies between the two inputs.
        #[test]
        fn mix_stays_within_inputs(a in any::<i16>(), b in any::<i16>(),
                                   position in 1usize..=16, num in 16usize..=16) {
            let mut buffer = ChunkBuffer::new(2);
            let format = AudioFormat::new(44100, 16, 1);
            let mut own = buffer.allocate().unwrap();
            own.data_mut()[..2].copy_from_slice(&a.to_le_bytes());
            own.length = 2;
            let mut other = buffer.allocate().unwrap();
            other.data_mut()[..2].copy_from_slice(&b.to_le_bytes());
            other.length = 2;

            cross_fade_apply(&mut own, &other, &format, position, num);
            let mixed = i16::from_le_bytes([own.data()[0], own.data()[1]]) as i32;
            let (lo, hi) = ((a as i32).min(b as i32), (a as i32).max(b as i32));
            prop_assert!(mixed >= lo - 1 && mixed <= hi + 1);
        }
    }
}
