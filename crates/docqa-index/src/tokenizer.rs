//! Token segmentation used for chunk sizing and context budgets.

use std::ops::Range;

/// Splits text into tokens that are contiguous byte spans.
///
/// Implementations must cover the input exactly: the first span starts at 0, every
/// span starts where the previous one ended, the last span ends at `text.len()`,
/// and every boundary lies on a `char` boundary. Empty input yields no spans.
pub trait Tokenizer: Send + Sync {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }

    fn name(&self) -> &str;
}

const MAX_WORD_PIECE: usize = 4;

/// Heuristic BPE stand-in: roughly one token per four characters of a word.
///
/// Each token is optional leading whitespace followed by up to four alphanumeric
/// characters or a single other character. Whitespace at the very end of the
/// input forms a token of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::with_capacity(text.len() / 3 + 1);
        let mut chars = text.char_indices().peekable();
        let mut start = 0;

        loop {
            while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

            let Some((_, first)) = chars.next() else {
                if start < text.len() {
                    spans.push(start..text.len());
                }
                break;
            };

            if first.is_alphanumeric() {
                let mut taken = 1;
                while taken < MAX_WORD_PIECE
                    && chars.next_if(|(_, c)| c.is_alphanumeric()).is_some()
                {
                    taken += 1;
                }
            }

            let end = chars.peek().map_or(text.len(), |(i, _)| *i);
            spans.push(start..end);
            start = end;
        }

        spans
    }

    fn name(&self) -> &str {
        "approx"
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::ops::Range;
    use std::path::Path;

    use super::Tokenizer;
    use crate::error::IndexError;

    /// HuggingFace `tokenizer.json` model with offsets stretched into contiguous spans.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
        name: String,
    }

    impl std::fmt::Debug for HfTokenizer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HfTokenizer")
                .field("name", &self.name)
                .finish_non_exhaustive()
        }
    }

    impl HfTokenizer {
        /// # Errors
        ///
        /// Returns [`IndexError::Config`] if the file cannot be loaded.
        pub fn from_file(path: &Path) -> Result<Self, IndexError> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| IndexError::Config(format!("tokenizer {}: {e}", path.display())))?;
            Ok(Self {
                inner,
                name: path.display().to_string(),
            })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
            if text.is_empty() {
                return Vec::new();
            }
            let starts: Vec<usize> = match self.inner.encode(text, false) {
                Ok(encoding) => encoding.get_offsets().iter().map(|(s, _)| *s).collect(),
                Err(e) => {
                    tracing::warn!("tokenizer failed, falling back to approximation: {e}");
                    return super::ApproxTokenizer.token_spans(text);
                }
            };
            contiguous_spans(text, &starts)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// Turn token start offsets into spans that tile the text.
    pub(super) fn contiguous_spans(text: &str, starts: &[usize]) -> Vec<Range<usize>> {
        let mut cuts: Vec<usize> = starts
            .iter()
            .copied()
            .filter(|&s| s > 0 && s < text.len() && text.is_char_boundary(s))
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut spans = Vec::with_capacity(cuts.len() + 1);
        let mut prev = 0;
        for cut in cuts {
            spans.push(prev..cut);
            prev = cut;
        }
        spans.push(prev..text.len());
        spans
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn spans_tile_text() {
            let text = "Model risk";
            let spans = contiguous_spans(text, &[0, 5, 5, 6]);
            assert_eq!(spans, vec![0..5, 5..6, 6..10]);
        }

        #[test]
        fn out_of_range_offsets_ignored() {
            let spans = contiguous_spans("abc", &[0, 99]);
            assert_eq!(spans, vec![0..3]);
        }
    }
}
