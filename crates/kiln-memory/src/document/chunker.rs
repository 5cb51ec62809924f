//! Deterministic sliding-window chunking on word boundaries.

use kiln_core::ConfigError;

/// An unpersisted chunk produced by splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub index: i64,
    pub text: String,
    pub word_count: usize,
}

/// Splits text into overlapping word windows. Identical input always
/// produces identical boundaries; splitting uses `split_whitespace`, so no
/// locale-dependent tokenization can drift.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidChunking` when `chunk_size` is zero or
    /// `overlap >= chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::InvalidChunking(
                "chunk_size must be at least 1".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ConfigError::InvalidChunking(format!(
                "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered overlapping windows. Consecutive windows
    /// share `overlap` words; the window start advances by
    /// `chunk_size - overlap` each step.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<ChunkDraft> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0i64;
        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(ChunkDraft {
                index,
                text: words[start..end].join(" "),
                word_count: end - start,
            });
            start += step;
            index += 1;
        }
        chunks
    }
}
