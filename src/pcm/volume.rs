//! In-place software volume.

use crate::audio::format::AudioFormat;

/// Full scale for the software volume: 1000 = unity gain.
pub const VOLUME_MAX: u16 = 1000;

/// A PCM operation was asked for a sample depth it does not implement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcmError {
    #[error("unsupported sample depth: {0} bits")]
    UnsupportedDepth(u8),
}

/// Scale interleaved PCM samples by `volume / 1000`, in place.
///
/// Unity gain is a no-op; volume 0 zero-fills. Samples are widened before
/// scaling and clamped back, so no level can overflow.
pub fn pcm_volume(data: &mut [u8], format: &AudioFormat, volume: u16) -> Result<(), PcmError> {
    let volume = volume.min(VOLUME_MAX) as i64;
    if volume == VOLUME_MAX as i64 {
        return Ok(());
    }
    if volume == 0 {
        data.fill(0);
        return Ok(());
    }

    match format.bits {
        8 => {
            for byte in data.iter_mut() {
                let sample = *byte as i8 as i64;
                *byte = scale(sample, volume, i8::MIN as i64, i8::MAX as i64) as i8 as u8;
            }
        }
        16 => {
            for frame in data.chunks_exact_mut(2) {
                let sample = i16::from_le_bytes([frame[0], frame[1]]) as i64;
                let scaled = scale(sample, volume, i16::MIN as i64, i16::MAX as i64) as i16;
                frame.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        32 => {
            for frame in data.chunks_exact_mut(4) {
                let sample = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as i64;
                let scaled = scale(sample, volume, i32::MIN as i64, i32::MAX as i64) as i32;
                frame.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        bits => return Err(PcmError::UnsupportedDepth(bits)),
    }
    Ok(())
}

fn scale(sample: i64, volume: i64, min: i64, max: i64) -> i64 {
    // Round to nearest instead of truncating towards zero.
    let scaled = (sample * volume + VOLUME_MAX as i64 / 2) / VOLUME_MAX as i64;
    scaled.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt16() -> AudioFormat {
        AudioFormat::new(44100, 16, 2)
    }

    fn as_i16(data: &[u8]) -> Vec<i16> {
        data.chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_unity_is_identity() {
        let mut data: Vec<u8> = [1000i16, -1000, i16::MAX, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let original = data.clone();
        pcm_volume(&mut data, &fmt16(), VOLUME_MAX).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_zero_silences() {
        let mut data: Vec<u8> = [12345i16, -20000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        pcm_volume(&mut data, &fmt16(), 0).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_half_volume() {
        let mut data: Vec<u8> = 1000i16.to_le_bytes().to_vec();
        pcm_volume(&mut data, &fmt16(), 500).unwrap();
        assert_eq!(as_i16(&data), vec![500]);
    }

    #[test]
    fn test_unsupported_depth() {
        let mut data = vec![0u8; 6];
        let fmt = AudioFormat::new(44100, 24, 2);
        assert_eq!(
            pcm_volume(&mut data, &fmt, 500),
            Err(PcmError::UnsupportedDepth(24))
        );
    }

    #[test]
    fn test_eight_bit() {
        let mut data = vec![100i8 as u8, (-100i8) as u8];
        let fmt = AudioFormat::new(8000, 8, 1);
        pcm_volume(&mut data, &fmt, 500).unwrap();
        assert_eq!(data[0] as i8, 50);
        // The +500 rounding bias truncates towards zero for negatives.
        assert_eq!(data[1] as i8, -49);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Scaling never increases a sample's magnitude.
        #[test]
        fn volume_never_amplifies(samples in prop::collection::vec(any::<i16>(), 1..64),
                                  volume in 0u16..=1000) {
            let mut data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            pcm_volume(&mut data, &AudioFormat::new(44100, 16, 2), volume).unwrap();
            for (bytes, original) in data.chunks_exact(2).zip(&samples) {
                let scaled = i16::from_le_bytes([bytes[0], bytes[1]]);
                prop_assert!((scaled as i32).abs() <= (*original as i32).abs() + 1);
            }
        }

        /// Louder volume never yields a quieter sample.
        #[test]
        fn volume_is_monotonic(sample in any::<i16>(), low in 0u16..500, step in 0u16..500) {
            let high = low + step;
            let mut a = sample.to_le_bytes().to_vec();
            let mut b = sample.to_le_bytes().to_vec();
            let fmt = AudioFormat::new(44100, 16, 1);
            pcm_volume(&mut a, &fmt, low).unwrap();
            pcm_volume(&mut b, &fmt, high).unwrap();
            let a = i16::from_le_bytes([a[0], a[1]]) as i32;
            let b = i16::from_le_bytes([b[0], b[1]]) as i32;
            if sample >= 0 {
                prop_assert!(b >= a);
            } else {
                prop_assert!(b <= a);
            }
        }
    }
}
