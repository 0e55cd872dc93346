//! Chunk storage
//!
//! A chunk holds the samples of one series for a contiguous time range. Two
//! encodings share one interface:
//!
//! ```text
//! Chunk::Plain       parallel timestamp/value arrays, binary-searchable
//! Chunk::Compressed  one Kuba bit stream, decoded forward only
//! ```
//!
//! Compressed chunks are never edited in the middle. Upserts, deletes and
//! splits decode the stream and re-encode into a fresh chunk that replaces
//! the original only after every step has succeeded.

pub mod chunk;
pub mod compressed;
pub mod iter;
pub mod plain;

pub use chunk::{Chunk, ChunkType};
pub use compressed::{CompressedChunk, Decoder};
pub use iter::{ChunkIterator, IterDirection};
pub use plain::PlainChunk;
