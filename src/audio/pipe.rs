//! The decoder→player chunk FIFO.

use parking_lot::Mutex;

use crate::audio::chunk::{ChunkBuffer, MusicChunk};

/// FIFO of chunks holding one decode session's pending audio.
///
/// The decoder pushes, the player shifts; the two never touch the pipe at
/// the same index, but both may size-check it, so the deque sits behind a
/// short-held mutex. Cross-thread scheduling is the control blocks' job,
/// not the pipe's.
pub struct MusicPipe {
    inner: Mutex<PipeInner>,
}

struct PipeInner {
    chunks: std::collections::VecDeque<Box<MusicChunk>>,
    bytes: usize,
}

impl MusicPipe {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PipeInner {
                chunks: std::collections::VecDeque::new(),
                bytes: 0,
            }),
        }
    }

    /// Append a chunk (decoder side).
    pub fn push(&self, chunk: Box<MusicChunk>) {
        let mut inner = self.inner.lock();
        inner.bytes += chunk.length;
        inner.chunks.push_back(chunk);
    }

    /// Remove the oldest chunk (player side).
    pub fn shift(&self) -> Option<Box<MusicChunk>> {
        let mut inner = self.inner.lock();
        let chunk = inner.chunks.pop_front()?;
        inner.bytes -= chunk.length;
        Some(chunk)
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    /// Total payload bytes queued.
    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return every queued chunk to `buffer`.
    pub fn clear(&self, buffer: &Mutex<ChunkBuffer>) {
        let mut inner = self.inner.lock();
        let mut buffer = buffer.lock();
        while let Some(chunk) = inner.chunks.pop_front() {
            buffer.release(chunk);
        }
        inner.bytes = 0;
    }
}

impl Default for MusicPipe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_len(buffer: &Mutex<ChunkBuffer>, len: usize) -> Box<MusicChunk> {
        let mut chunk = buffer.lock().allocate().unwrap();
        chunk.length = len;
        chunk
    }

    #[test]
    fn test_fifo_order_and_bytes() {
        let buffer = Mutex::new(ChunkBuffer::new(4));
        let pipe = MusicPipe::new();

        pipe.push(chunk_with_len(&buffer, 100));
        pipe.push(chunk_with_len(&buffer, 200));
        assert_eq!(pipe.len(), 2);
        assert_eq!(pipe.bytes(), 300);

        let first = pipe.shift().unwrap();
        assert_eq!(first.length, 100);
        assert_eq!(pipe.bytes(), 200);
        buffer.lock().release(first);

        let second = pipe.shift().unwrap();
        assert_eq!(second.length, 200);
        buffer.lock().release(second);
        assert!(pipe.shift().is_none());
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_clear_returns_chunks_to_buffer() {
        let buffer = Mutex::new(ChunkBuffer::new(3));
        let pipe = MusicPipe::new();
        for len in [10, 20, 30] {
            pipe.push(chunk_with_len(&buffer, len));
        }
        assert_eq!(buffer.lock().outstanding(), 3);

        pipe.clear(&buffer);
        assert!(pipe.is_empty());
        assert_eq!(pipe.bytes(), 0);
        assert_eq!(buffer.lock().outstanding(), 0);
    }
}
