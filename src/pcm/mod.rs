//! Sample-level DSP used by the playback loop: software volume and the
//! crossfade mixer. Both operate in place on interleaved integer PCM.

pub mod mix;
pub mod volume;

pub use mix::{cross_fade_apply, cross_fade_calc};
pub use volume::{PcmError, VOLUME_MAX, pcm_volume};
