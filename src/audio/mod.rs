//! PCM plumbing: sample formats, chunk pool, and the decoder→player FIFO.

pub mod chunk;
pub mod format;
pub mod pipe;

pub use chunk::{CHUNK_SIZE, ChunkBuffer, MusicChunk, OutOfChunks};
pub use format::AudioFormat;
pub use pipe::MusicPipe;
