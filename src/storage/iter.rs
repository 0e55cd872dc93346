//! Scan cursors over a single chunk
//!
//! Direction is fixed when the iterator is created. Plain chunks are walked
//! in place in either direction. Compressed chunks replay forward straight
//! from the packed stream; a reverse scan first decodes the whole chunk into
//! a temporary [`PlainChunk`] that the iterator owns and drops with itself.

use crate::storage::compressed::{CompressedChunk, Decoder};
use crate::storage::plain::PlainChunk;
use crate::types::Sample;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IterDirection {
    /// Oldest to newest
    #[default]
    Forward,
    /// Newest to oldest
    Reverse,
}

/// Position within a plain chunk
#[derive(Debug, Clone, Copy)]
struct Cursor {
    direction: IterDirection,
    remaining: usize,
}

impl Cursor {
    fn new(len: usize, direction: IterDirection) -> Self {
        Self {
            direction,
            remaining: len,
        }
    }

    fn step(&mut self, chunk: &PlainChunk) -> Option<Sample> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let index = match self.direction {
            IterDirection::Forward => chunk.len() - self.remaining - 1,
            IterDirection::Reverse => self.remaining,
        };
        chunk.sample_at(index)
    }
}

enum Source<'a> {
    Plain(&'a PlainChunk, Cursor),
    Packed(Decoder<'a>),
    Decoded(PlainChunk, Cursor),
}

/// Iterator over the samples of one chunk
pub struct ChunkIterator<'a> {
    source: Source<'a>,
}

impl<'a> ChunkIterator<'a> {
    /// Iterate a plain chunk in place
    pub fn plain(chunk: &'a PlainChunk, direction: IterDirection) -> Self {
        Self {
            source: Source::Plain(chunk, Cursor::new(chunk.len(), direction)),
        }
    }

    /// Iterate a compressed chunk
    ///
    /// Reverse scans decode the chunk up front. A corrupted stream is logged
    /// and ends the iteration early.
    pub fn compressed(chunk: &'a CompressedChunk, direction: IterDirection) -> Self {
        let source = match direction {
            IterDirection::Forward => Source::Packed(chunk.decoder()),
            IterDirection::Reverse => {
                let decoded = chunk.decompress().unwrap_or_else(|e| {
                    error!(
                        error = %e,
                        samples = chunk.len(),
                        "Failed to decode compressed chunk for reverse scan"
                    );
                    PlainChunk::with_sample_capacity(0)
                });
                let cursor = Cursor::new(decoded.len(), direction);
                Source::Decoded(decoded, cursor)
            }
        };
        Self { source }
    }

    /// True if the iterator owns a decoded copy of its chunk
    pub fn owns_decoded_copy(&self) -> bool {
        matches!(self.source, Source::Decoded(..))
    }
}

impl Iterator for ChunkIterator<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        match &mut self.source {
            Source::Plain(chunk, cursor) => cursor.step(chunk),
            Source::Decoded(chunk, cursor) => cursor.step(chunk),
            Source::Packed(decoder) => match decoder.next()? {
                Ok(sample) => Some(sample),
                Err(e) => {
                    error!(error = %e, "Corrupted compressed chunk, stopping scan");
                    None
                }
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.source {
            Source::Plain(_, cursor) | Source::Decoded(_, cursor) => {
                (cursor.remaining, Some(cursor.remaining))
            }
            Source::Packed(decoder) => (0, decoder.size_hint().1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(timestamps: &[i64]) -> PlainChunk {
        let mut chunk = PlainChunk::with_sample_capacity(timestamps.len());
        for &ts in timestamps {
            chunk.add(Sample::new(ts, ts as f64)).unwrap();
        }
        chunk
    }

    #[test]
    fn test_plain_both_directions() {
        let chunk = plain(&[1, 2, 3]);
        let forward: Vec<i64> = ChunkIterator::plain(&chunk, IterDirection::Forward)
            .map(|s| s.timestamp)
            .collect();
        let reverse: Vec<i64> = ChunkIterator::plain(&chunk, IterDirection::Reverse)
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(forward, vec![1, 2, 3]);
        assert_eq!(reverse, vec![3, 2, 1]);
    }

    #[test]
    fn test_empty_chunk_yields_nothing() {
        let chunk = PlainChunk::new(64);
        assert_eq!(ChunkIterator::plain(&chunk, IterDirection::Reverse).count(), 0);

        let packed = CompressedChunk::new(64);
        assert_eq!(
            ChunkIterator::compressed(&packed, IterDirection::Forward).count(),
            0
        );
        assert_eq!(
            ChunkIterator::compressed(&packed, IterDirection::Reverse).count(),
            0
        );
    }

    #[test]
    fn test_compressed_reverse_owns_decoded_copy() {
        let mut chunk = CompressedChunk::new(128);
        for ts in [10, 20, 35, 50] {
            chunk.add(Sample::new(ts, ts as f64 / 3.0)).unwrap();
        }

        let forward = ChunkIterator::compressed(&chunk, IterDirection::Forward);
        assert!(!forward.owns_decoded_copy());
        let mut forward: Vec<Sample> = forward.collect();

        let reverse = ChunkIterator::compressed(&chunk, IterDirection::Reverse);
        assert!(reverse.owns_decoded_copy());
        assert_eq!(reverse.size_hint(), (4, Some(4)));

        forward.reverse();
        assert_eq!(reverse.collect::<Vec<_>>(), forward);
    }
}
