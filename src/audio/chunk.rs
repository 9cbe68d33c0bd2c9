//! Music chunks and the fixed-capacity chunk pool.
//!
//! All decoded audio travels through [`MusicChunk`]s allocated from one
//! [`ChunkBuffer`]. The buffer caps how much decoded-but-unplayed audio can
//! exist at once: when it is exhausted the decoder blocks until the player
//! returns chunks. Chunks are owned boxes; moving them between the buffer, a
//! pipe, and the playing slot means a chunk can never be in two places.

use crate::audio::format::AudioFormat;
use crate::song::Tag;

/// Payload size of one chunk in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// One block of decoded PCM with its playback metadata.
#[derive(Debug)]
pub struct MusicChunk {
    /// Number of valid payload bytes (may be 0 for a tag-only chunk)
    pub length: usize,
    /// Stream bit rate in kbps at this point of the song
    pub bit_rate: u32,
    /// Playback timestamp of the chunk within its song, in seconds
    pub times: f64,
    /// Tag update carried by this chunk, if the stream metadata changed
    pub tag: Option<Tag>,
    /// Format of the payload
    pub format: Option<AudioFormat>,
    data: Box<[u8; CHUNK_SIZE]>,
}

impl MusicChunk {
    fn new() -> Self {
        Self {
            length: 0,
            bit_rate: 0,
            times: 0.0,
            tag: None,
            format: None,
            data: Box::new([0; CHUNK_SIZE]),
        }
    }

    /// The valid payload.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The whole payload buffer, for the producer to fill. Set `length`
    /// afterwards.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Grow the valid payload by copying `extra` after the current end.
    /// Copies at most the remaining capacity and returns how much was taken.
    pub fn extend(&mut self, extra: &[u8]) -> usize {
        let room = CHUNK_SIZE - self.length;
        let n = extra.len().min(room);
        self.data[self.length..self.length + n].copy_from_slice(&extra[..n]);
        self.length += n;
        n
    }

    /// Does the payload claim the given format?
    pub fn matches_format(&self, format: &AudioFormat) -> bool {
        self.format.as_ref() == Some(format)
    }

    fn reset(&mut self) {
        self.length = 0;
        self.bit_rate = 0;
        self.times = 0.0;
        self.tag = None;
        self.format = None;
    }
}

/// The chunk pool is exhausted; the producer has to wait for the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("music chunk buffer exhausted")]
pub struct OutOfChunks;

/// Fixed-capacity pool of [`MusicChunk`]s.
///
/// Freed chunks are recycled rather than deallocated, so steady-state
/// playback does not touch the allocator. The pool tracks how many chunks
/// are outstanding; a run of the player must return every one of them.
pub struct ChunkBuffer {
    capacity: usize,
    free: Vec<Box<MusicChunk>>,
    outstanding: usize,
}

impl ChunkBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            free: Vec::with_capacity(capacity),
            outstanding: 0,
        }
    }

    /// Total number of chunks this pool may hand out at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks currently held outside the pool.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Take a chunk out of the pool.
    pub fn allocate(&mut self) -> Result<Box<MusicChunk>, OutOfChunks> {
        if self.outstanding >= self.capacity {
            return Err(OutOfChunks);
        }
        self.outstanding += 1;
        Ok(self
            .free
            .pop()
            .unwrap_or_else(|| Box::new(MusicChunk::new())))
    }

    /// Return a chunk to the pool. Its metadata is cleared for reuse.
    pub fn release(&mut self, mut chunk: Box<MusicChunk>) {
        debug_assert!(self.outstanding > 0);
        chunk.reset();
        self.outstanding -= 1;
        self.free.push(chunk);
    }
}
