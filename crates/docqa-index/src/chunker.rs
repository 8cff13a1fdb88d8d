//! Token-bounded splitting of extracted text into overlapping chunks.
//!
//! Split points are chosen at the latest paragraph break, then line break, then
//! sentence end, then word gap inside the window. A hard cut at the token limit
//! happens only when the window holds no gap at all.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{IndexError, Result};
use crate::tokenizer::Tokenizer;

pub const DEFAULT_CHUNK_SIZE: usize = 750;
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk.
    pub chunk_size: usize,
    /// Tokens repeated at the start of each chunk from the end of the previous one.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] if the size is zero or the overlap is not smaller
    /// than the size.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IndexError::Config("chunk_size must be greater than 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IndexError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: u32,
    pub text: String,
    /// Byte span in the source text, overlap included.
    pub byte_range: Range<usize>,
    /// Token span in the source tokenization.
    pub token_range: Range<usize>,
    /// First byte not already covered by the previous chunk.
    pub fresh_start: usize,
}

impl TextChunk {
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.token_range.len()
    }

    /// The part of the chunk that does not repeat the previous chunk.
    #[must_use]
    pub fn fresh_text(&self) -> &str {
        &self.text[self.fresh_start - self.byte_range.start..]
    }
}

/// Strength of the gap in front of a token; higher is a better split point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Gap {
    None,
    Word,
    Sentence,
    Line,
    Paragraph,
}

const SPLIT_PREFERENCE: [Gap; 4] = [Gap::Paragraph, Gap::Line, Gap::Sentence, Gap::Word];

#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    config: ChunkerConfig,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Chunker {
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] for an invalid size/overlap pair.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { tokenizer, config })
    }

    #[must_use]
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    #[must_use]
    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Split `text` into ordered chunks. Whitespace-only input yields none.
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let spans = self.tokenizer.token_spans(text);
        let gaps = classify_gaps(text, &spans);
        let total = spans.len();
        let content_end = spans
            .iter()
            .rposition(|s| !text[s.clone()].trim().is_empty())
            .map_or(total, |i| i + 1);

        let ChunkerConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        } = self.config;

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut fresh_start = 0;

        loop {
            let end = if total - start <= size {
                total
            } else {
                pick_split(&gaps, start, size, overlap, content_end)
            };

            let byte_range = spans[start].start..spans[end - 1].end;
            chunks.push(TextChunk {
                index: u32::try_from(chunks.len()).unwrap_or(u32::MAX),
                text: text[byte_range.clone()].to_owned(),
                byte_range: byte_range.clone(),
                token_range: start..end,
                fresh_start,
            });

            if end == total {
                break;
            }
            fresh_start = byte_range.end;
            start = end - overlap;
        }

        chunks
    }
}

/// Token index that ends the chunk starting at `start` (exclusive).
///
/// Candidates lie in `start + overlap + 1 ..= start + size` so the next chunk
/// always advances. Structural gaps must also fall in the back half of the
/// window to keep chunks from collapsing to a few tokens.
fn pick_split(
    gaps: &[Gap],
    start: usize,
    size: usize,
    overlap: usize,
    content_end: usize,
) -> usize {
    let hard = start + size;
    let lo = start + overlap + 1;
    let hi = hard.min(content_end.saturating_sub(1));
    if hi < lo {
        return hard;
    }
    let structural_lo = lo.max(start + overlap + (size - overlap) / 2);

    for gap in SPLIT_PREFERENCE {
        let from = if gap == Gap::Word { lo } else { structural_lo };
        if from > hi {
            continue;
        }
        if let Some(b) = (from..=hi).rev().find(|&b| gaps[b] >= gap) {
            return b;
        }
    }
    hi
}

/// Gap strength in front of each token; `gaps[0]` is always [`Gap::None`].
fn classify_gaps(text: &str, spans: &[Range<usize>]) -> Vec<Gap> {
    let mut gaps = Vec::with_capacity(spans.len());
    gaps.push(Gap::None);
    for pair in spans.windows(2) {
        let prev = &text[pair[0].clone()];
        let cur = &text[pair[1].clone()];

        let prev_body = prev.trim_end();
        let trailing = &prev[prev_body.len()..];
        let leading = &cur[..cur.len() - cur.trim_start().len()];

        let newlines = trailing.matches('\n').count() + leading.matches('\n').count();
        let gap = if newlines >= 2 {
            Gap::Paragraph
        } else if newlines == 1 {
            Gap::Line
        } else if trailing.is_empty() && leading.is_empty() {
            Gap::None
        } else if prev_body.ends_with(['.', '!', '?']) {
            Gap::Sentence
        } else {
            Gap::Word
        };
        gaps.push(gap);
    }
    gaps
}
