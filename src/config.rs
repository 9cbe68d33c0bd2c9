//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Linux: ~/.config/tonearm/config.toml
//! - macOS: ~/Library/Application Support/tonearm/config.toml
//! - Windows: %APPDATA%\tonearm\config.toml
//!
//! The file is optional; every setting has a default. Values the player
//! core cannot work with are clamped at load time with a warning rather
//! than rejected.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::chunk::CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::pcm::VOLUME_MAX;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Player core settings
    pub player: PlayerConfig,
}

/// Settings the player core reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Capacity of the chunk pool, in 4 KiB chunks
    pub buffer_chunks: usize,

    /// Bytes that must be decoded before playback starts
    pub buffered_before_play: usize,

    /// Seconds of crossfade between consecutive songs (0 = off)
    pub cross_fade_seconds: f64,

    /// Software volume, 0..=1000 (1000 = unity)
    pub software_volume: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            // 4 MiB of decoded audio, ~6 seconds of CD stereo ahead.
            buffer_chunks: 1024,
            buffered_before_play: 64 * CHUNK_SIZE,
            cross_fade_seconds: 0.0,
            software_volume: VOLUME_MAX,
        }
    }
}

impl PlayerConfig {
    /// Clamp out-of-range values to something the core can run with.
    pub fn validated(mut self) -> Self {
        if self.buffer_chunks < 4 {
            tracing::warn!(
                buffer_chunks = self.buffer_chunks,
                "buffer_chunks too small, using 4"
            );
            self.buffer_chunks = 4;
        }
        let capacity = self.buffer_chunks * CHUNK_SIZE;
        if self.buffered_before_play >= capacity {
            // Waiting for more than the pool holds would never finish.
            let clamped = capacity / 2;
            tracing::warn!(
                buffered_before_play = self.buffered_before_play,
                clamped,
                "buffered_before_play exceeds the buffer, clamping"
            );
            self.buffered_before_play = clamped;
        }
        if self.software_volume > VOLUME_MAX {
            tracing::warn!(
                software_volume = self.software_volume,
                "software_volume above {VOLUME_MAX}, clamping"
            );
            self.software_volume = VOLUME_MAX;
        }
        if self.cross_fade_seconds < 0.0 {
            self.cross_fade_seconds = 0.0;
        }
        self
    }
}

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tonearm"))
}

/// Get the full path to the config file.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

impl Config {
    /// Load from `path`, or from the default location, or fall back to
    /// defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}
