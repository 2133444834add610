//! Fixed-size, overlapping text chunking.
//!
//! Sizes are measured in Unicode scalar values so a window never splits a
//! code point. Consecutive windows share `overlap` characters.

use crate::error::{RagError, RagResult};
use crate::models::Chunk;

/// Validated chunking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingParams {
    pub fn new(chunk_size: usize, overlap: usize) -> RagResult<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(RagError::InvalidChunkingParameters {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive windows
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Number of chunks produced for a text of `len` characters
    pub fn expected_chunks(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let remaining = len.saturating_sub(self.overlap);
        remaining.div_ceil(self.stride()).max(1)
    }
}

/// Split `text` into overlapping chunks of at most `chunk_size` characters.
///
/// Returns an empty vector for empty input. Chunks carry no metadata.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> RagResult<Vec<Chunk>> {
    let params = ChunkingParams::new(chunk_size, overlap)?;
    Ok(chunk_with(text, params))
}

pub fn chunk_with(text: &str, params: ChunkingParams) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(params.expected_chunks(chars.len()));
    let mut start = 0;
    loop {
        let end = (start + params.chunk_size).min(chars.len());
        chunks.push(Chunk::new(chars[start..end].iter().collect::<String>()));
        if end == chars.len() {
            break;
        }
        start += params.stride();
    }

    chunks
}
