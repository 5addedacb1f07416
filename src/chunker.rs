//! Sentence-aligned, token-accurate, overlapping chunker.
//!
//! Turns extractor output (a list of `(page_number, text)` segments) into an
//! ordered sequence of [`Chunk`]s, each at most `chunk_size` tokens, overlapping
//! the previous by `chunk_overlap` tokens, never crossing a segment boundary.

use tiktoken_rs::CoreBPE;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, thiserror::Error)]
pub enum ChunkingError {
    #[error("extraction produced no text")]
    Empty,
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 100,
        }
    }
}

/// A segment of extracted text tagged with its source page number.
#[derive(Debug, Clone)]
pub struct Segment {
    pub page_number: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub page_number: Option<u32>,
    pub text: String,
    pub token_count: usize,
}

pub struct Chunker {
    config: ChunkerConfig,
    bpe: CoreBPE,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> anyhow::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self { config, bpe })
    }

    /// Exposed for local token-usage accounting elsewhere (the RAG
    /// orchestrator's response `usage` block) so it shares one tokenizer
    /// instance rather than re-loading `cl100k_base` a second time.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn split_sentences(text: &str) -> Vec<&str> {
        text.unicode_sentences().collect()
    }

    /// Chunk a list of extracted segments. Empty input yields zero chunks.
    pub fn chunk(&self, segments: &[Segment]) -> Result<Vec<Chunk>, ChunkingError> {
        let mut chunks = Vec::new();
        let mut global_index = 0usize;
        let mut total_tokens = 0usize;

        for segment in segments {
            let sentences = Self::split_sentences(&segment.text);
            if sentences.is_empty() {
                continue;
            }

            let mut current: Vec<&str> = Vec::new();
            let mut current_tokens = 0usize;

            for sentence in sentences {
                let sentence_tokens = self.count_tokens(sentence);
                total_tokens += sentence_tokens;

                if sentence_tokens > self.config.chunk_size {
                    // Flush whatever is accumulated, then split the oversized
                    // sentence itself into contiguous token windows.
                    if !current.is_empty() {
                        self.emit(
                            &mut chunks,
                            &mut global_index,
                            segment.page_number,
                            &current,
                        );
                        current = self.carry_overlap(&current);
                        current_tokens = current
                            .iter()
                            .map(|s| self.count_tokens(s))
                            .sum();
                    }
                    for window in self.split_oversized_sentence(sentence) {
                        chunks.push(Chunk {
                            index: global_index,
                            page_number: segment.page_number,
                            token_count: self.count_tokens(&window),
                            text: window,
                        });
                        global_index += 1;
                    }
                    continue;
                }

                if current_tokens + sentence_tokens > self.config.chunk_size && !current.is_empty() {
                    self.emit(&mut chunks, &mut global_index, segment.page_number, &current);
                    current = self.carry_overlap(&current);
                    current_tokens = current.iter().map(|s| self.count_tokens(s)).sum();
                }

                current.push(sentence);
                current_tokens += sentence_tokens;
            }

            if !current.is_empty() {
                let tokens: usize = current.iter().map(|s| self.count_tokens(s)).sum();
                if tokens < self.config.min_chunk_size && !chunks.is_empty() {
                    if let Some(last) = chunks.last_mut() {
                        if last.page_number == segment.page_number {
                            last.text.push(' ');
                            last.text.push_str(&current.join(" "));
                            last.token_count = self.count_tokens(&last.text);
                            continue;
                        }
                    }
                }
                self.emit(&mut chunks, &mut global_index, segment.page_number, &current);
            }
        }

        if total_tokens == 0 {
            return Err(ChunkingError::Empty);
        }

        Ok(chunks)
    }

    fn emit(
        &self,
        chunks: &mut Vec<Chunk>,
        global_index: &mut usize,
        page_number: Option<u32>,
        sentences: &[&str],
    ) {
        let text = sentences.join(" ");
        let token_count = self.count_tokens(&text);
        chunks.push(Chunk {
            index: *global_index,
            page_number,
            text,
            token_count,
        });
        *global_index += 1;
    }

    /// Returns the trailing sentences of `sentences` whose cumulative token
    /// count is closest to (without exceeding) `chunk_overlap`.
    fn carry_overlap<'a>(&self, sentences: &[&'a str]) -> Vec<&'a str> {
        if self.config.chunk_overlap == 0 {
            return Vec::new();
        }
        let mut carried = Vec::new();
        let mut tokens = 0usize;
        for sentence in sentences.iter().rev() {
            let t = self.count_tokens(sentence);
            if tokens + t > self.config.chunk_overlap && !carried.is_empty() {
                break;
            }
            carried.push(*sentence);
            tokens += t;
        }
        carried.reverse();
        carried
    }

    fn split_oversized_sentence(&self, sentence: &str) -> Vec<String> {
        let tokens = self.bpe.encode_with_special_tokens(sentence);
        let window = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let step = window.saturating_sub(overlap).max(1);

        let mut windows = Vec::new();
        let mut start = 0usize;
        while start < tokens.len() {
            let end = (start + window).min(tokens.len());
            let slice = &tokens[start..end];
            if let Ok(text) = self.bpe.decode(slice.to_vec()) {
                windows.push(text);
            }
            if end == tokens.len() {
                break;
            }
            start += step;
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size: 50,
            chunk_overlap: 10,
            min_chunk_size: 5,
        })
        .unwrap()
    }

    #[test]
    fn empty_input_yields_no_chunks_and_fails() {
        let c = chunker();
        let result = c.chunk(&[Segment { page_number: Some(1), text: String::new() }]);
        assert!(matches!(result, Err(ChunkingError::Empty)));
    }

    #[test]
    fn single_short_segment_yields_one_chunk() {
        let c = chunker();
        let segments = vec![Segment {
            page_number: Some(1),
            text: "The quick brown fox jumps over the lazy dog. It was a sunny day.".to_string(),
        }];
        let chunks = c.chunk(&segments).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].page_number, Some(1));
    }

    #[test]
    fn oversized_sentence_splits_into_windows_within_chunk_size() {
        let c = chunker();
        let long_sentence = "word ".repeat(200) + ".";
        let segments = vec![Segment {
            page_number: None,
            text: long_sentence,
        }];
        let chunks = c.chunk(&segments).unwrap();
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.token_count <= 50);
        }
    }

    #[test]
    fn chunk_indices_are_dense_and_ordered() {
        let c = chunker();
        let segments = vec![
            Segment {
                page_number: Some(1),
                text: "Sentence one is here. Sentence two follows along nicely. Sentence three completes the first segment quite well.".to_string(),
            },
            Segment {
                page_number: Some(2),
                text: "Another page starts here. It too has a couple of sentences to work with.".to_string(),
            },
        ];
        let chunks = c.chunk(&segments).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }
}
