//! Songs and their tags.

/// Metadata attached to a song or carried by a chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Total duration in seconds, when the container declares one
    pub duration: Option<f64>,
}

impl Tag {
    /// Duration declared by the tag, or 0 when unknown.
    pub fn duration_or_zero(&self) -> f64 {
        self.duration.unwrap_or(0.0)
    }
}

/// Something the player can be asked to play: a local file path or a
/// remote stream URL.
#[derive(Debug, Clone)]
pub struct Song {
    pub url: String,
    pub tag: Option<Tag>,
}

impl Song {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tag: None,
        }
    }

    pub fn with_tag(url: impl Into<String>, tag: Tag) -> Self {
        Self {
            url: url.into(),
            tag: Some(tag),
        }
    }

    /// Local files have stable tags; remote streams may retag mid-play.
    pub fn is_file(&self) -> bool {
        !self.url.contains("://")
    }
}

/// Song identity is its URL; two queue entries for the same URL are the
/// same song as far as the player is concerned.
impl PartialEq for Song {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Song {}
