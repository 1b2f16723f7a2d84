//! Paragraph / sentence / word text chunker.
//!
//! Splits extracted document text into bounded, semantically coherent
//! [`TextChunk`]s. Sizes are measured in characters.
//!
//! # Algorithm
//!
//! 1. Normalize line endings and intra-line whitespace, keeping blank lines
//!    as paragraph separators.
//! 2. With `respect_paragraphs`, split on blank lines and drop paragraphs
//!    shorter than `min_chunk_size` as noise.
//! 3. A paragraph that fits within `max_chunk_size` becomes one chunk.
//! 4. An oversized paragraph is split into sentences (`.`, `!` or `?` runs
//!    followed by whitespace and a capital letter) and the sentences are
//!    greedily packed. A sentence that is still too long falls back to the
//!    same greedy packing over whitespace-separated words.
//! 5. Overlap is a post-pass: every chunk after the first is prefixed with
//!    the trailing `overlap / overlap_chars_per_word` words of the previous
//!    chunk, capped at a third of that chunk's words. Overlap never causes
//!    re-splitting.
//!
//! # Example
//!
//! ```rust
//! use docsim_core::chunk::{chunk_text, ChunkerConfig};
//!
//! let config = ChunkerConfig { overlap: 0, min_chunk_size: 10, ..ChunkerConfig::default() };
//! let out = chunk_text("Paragraph A. Sentence two.\n\nParagraph B.", &config).unwrap();
//! assert_eq!(out.chunks.len(), 2);
//! assert_eq!(out.chunks[1].content, "Paragraph B.");
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DocsimError, Result};
use crate::models::{ChunkType, DocumentChunk};

/// Chunking parameters. All sizes are character counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    /// Overlap budget in characters, converted to words in the post-pass.
    pub overlap: usize,
    pub min_chunk_size: usize,
    pub respect_paragraphs: bool,
    pub respect_sentences: bool,
    /// Characters per overlap word. Empirical; calibrate against real data.
    pub overlap_chars_per_word: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
            min_chunk_size: 50,
            respect_paragraphs: true,
            respect_sentences: true,
            overlap_chars_per_word: 10,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(DocsimError::Validation(
                "max_chunk_size must be > 0".to_string(),
            ));
        }
        if self.overlap >= self.max_chunk_size {
            return Err(DocsimError::Validation(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                self.overlap, self.max_chunk_size
            )));
        }
        if self.min_chunk_size == 0 || self.min_chunk_size > self.max_chunk_size {
            return Err(DocsimError::Validation(format!(
                "min_chunk_size ({}) must be in (0, {}]",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        if self.overlap_chars_per_word == 0 {
            return Err(DocsimError::Validation(
                "overlap_chars_per_word must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of words the overlap pass tries to copy.
    pub fn overlap_words(&self) -> usize {
        self.overlap / self.overlap_chars_per_word
    }

    /// Upper bound on a chunk's length once its overlap prefix is added.
    pub fn max_output_chars(&self) -> usize {
        self.max_chunk_size + self.overlap
    }
}

/// A chunk produced by [`chunk_text`], not yet bound to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    /// Final text, including any overlap prefix.
    pub content: String,
    pub chunk_type: ChunkType,
    /// Byte length of the overlap prefix (including its trailing space).
    pub overlap_bytes: usize,
}

impl TextChunk {
    /// The chunk text as it was before the overlap pass.
    pub fn base_content(&self) -> &str {
        &self.content[self.overlap_bytes..]
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Per-run chunking statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub chunk_count: usize,
    pub min_size: usize,
    pub avg_size: f64,
    pub max_size: usize,
    /// Configured `overlap / max_chunk_size × 100`, not measured.
    pub overlap_percentage: f64,
    pub dropped_paragraphs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingOutput {
    pub chunks: Vec<TextChunk>,
    pub stats: ChunkStats,
}

impl ChunkingOutput {
    /// Bind the chunks to a document, assigning fresh ids and dense indices.
    pub fn into_document_chunks(self, document_id: &str) -> Vec<DocumentChunk> {
        to_document_chunks(document_id, &self.chunks)
    }
}

/// Materialize [`DocumentChunk`]s (active, without embeddings) for `document_id`.
pub fn to_document_chunks(document_id: &str, chunks: &[TextChunk]) -> Vec<DocumentChunk> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| DocumentChunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            content: c.content.clone(),
            chunk_index: i as i64,
            chunk_type: c.chunk_type,
            embedding: None,
            is_active: true,
        })
        .collect()
}

/// Split `text` into chunks according to `config`.
///
/// Fails only on an invalid configuration. Empty or all-noise input yields
/// zero chunks.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Result<ChunkingOutput> {
    config.validate()?;

    let normalized = normalize_whitespace(text);
    let max = config.max_chunk_size;

    let mut pieces: Vec<(String, ChunkType)> = Vec::new();
    let mut dropped = 0usize;

    let paragraphs: Vec<&str> = if config.respect_paragraphs {
        normalized.split("\n\n").collect()
    } else {
        vec![normalized.as_str()]
    };

    for para in paragraphs {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let len = char_len(para);
        if config.respect_paragraphs && len < config.min_chunk_size {
            dropped += 1;
            continue;
        }
        if len <= max {
            pieces.push((para.to_string(), ChunkType::Paragraph));
        } else if config.respect_sentences {
            split_by_sentences(para, max, &mut pieces);
        } else {
            split_by_words(para, max, &mut pieces);
        }
    }

    let chunks = apply_overlap(pieces, config.overlap_words(), config.overlap);
    let stats = compute_stats(&chunks, config, dropped);

    tracing::debug!(
        chunks = stats.chunk_count,
        dropped = stats.dropped_paragraphs,
        max_size = stats.max_size,
        "chunked text"
    );

    Ok(ChunkingOutput { chunks, stats })
}

/// Unify line endings, collapse intra-line whitespace, trim lines, and
/// squeeze runs of blank lines into a single paragraph separator.
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;

    for line in unified.split('\n') {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !out.is_empty() {
                pending_blank = true;
            }
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        pending_blank = false;
        out.push_str(&collapsed);
    }

    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on runs of `.`, `!` or `?` that are followed by whitespace and an
/// uppercase letter. Terminal punctuation stays with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if !is_terminal(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i;
        while j + 1 < chars.len() && is_terminal(chars[j + 1].1) {
            j += 1;
        }
        let end = chars[j].0 + chars[j].1.len_utf8();
        let mut k = j + 1;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        if k > j + 1 && k < chars.len() && chars[k].1.is_uppercase() {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = chars[k].0;
            i = k;
        } else {
            i = j + 1;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Greedy accumulator shared by the sentence and word passes.
struct Packer<'a> {
    buf: String,
    buf_chars: usize,
    max: usize,
    kind: ChunkType,
    out: &'a mut Vec<(String, ChunkType)>,
}

impl<'a> Packer<'a> {
    fn new(max: usize, kind: ChunkType, out: &'a mut Vec<(String, ChunkType)>) -> Self {
        Self {
            buf: String::new(),
            buf_chars: 0,
            max,
            kind,
            out,
        }
    }

    /// Append a unit that is known to fit on its own.
    fn push(&mut self, unit: &str) {
        let len = char_len(unit);
        let would_be = if self.buf.is_empty() {
            len
        } else {
            self.buf_chars + 1 + len
        };
        if would_be > self.max {
            self.flush();
        }
        if !self.buf.is_empty() {
            self.buf.push(' ');
            self.buf_chars += 1;
        }
        self.buf.push_str(unit);
        self.buf_chars += len;
    }

    fn flush(&mut self) {
        if !self.buf.is_empty() {
            self.out.push((std::mem::take(&mut self.buf), self.kind));
            self.buf_chars = 0;
        }
    }
}

fn split_by_sentences(para: &str, max: usize, out: &mut Vec<(String, ChunkType)>) {
    let mut oversized: Vec<(usize, &str)> = Vec::new();
    let mut groups: Vec<(String, ChunkType)> = Vec::new();
    {
        let mut packer = Packer::new(max, ChunkType::SentenceGroup, &mut groups);
        for sentence in split_sentences(para) {
            if char_len(sentence) > max {
                packer.flush();
                oversized.push((packer.out.len(), sentence));
                continue;
            }
            packer.push(sentence);
        }
        packer.flush();
    }

    // Interleave word-split sentences back at the positions they occupied.
    let mut next = 0usize;
    for (pos, sentence) in oversized {
        while next < pos {
            out.push(groups[next].clone());
            next += 1;
        }
        split_by_words(sentence, max, out);
    }
    out.extend(groups.into_iter().skip(next));
}

fn split_by_words(text: &str, max: usize, out: &mut Vec<(String, ChunkType)>) {
    let mut packer = Packer::new(max, ChunkType::WordGroup, out);
    for word in text.split_whitespace() {
        if char_len(word) <= max {
            packer.push(word);
            continue;
        }
        packer.flush();
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(max) {
            packer.out.push((piece.iter().collect(), ChunkType::WordGroup));
        }
    }
    packer.flush();
}

fn apply_overlap(
    pieces: Vec<(String, ChunkType)>,
    overlap_words: usize,
    overlap_chars: usize,
) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::with_capacity(pieces.len());
    let mut prev_base: Option<String> = None;

    for (index, (base, chunk_type)) in pieces.into_iter().enumerate() {
        let mut content = base.clone();
        let mut overlap_bytes = 0;

        if let Some(prev) = prev_base.as_deref() {
            let words: Vec<&str> = prev.split_whitespace().collect();
            let take = overlap_words.min(words.len() / 3);
            let tail = overlap_tail(&words[words.len() - take..], overlap_chars);
            if !tail.is_empty() {
                let prefix = tail.join(" ");
                overlap_bytes = prefix.len() + 1;
                content = format!("{} {}", prefix, base);
            }
        }

        chunks.push(TextChunk {
            index,
            content,
            chunk_type,
            overlap_bytes,
        });
        prev_base = Some(base);
    }

    chunks
}

/// The longest suffix of `words` whose prefix text, separator included,
/// fits in `budget` characters.
fn overlap_tail<'a>(words: &[&'a str], budget: usize) -> Vec<&'a str> {
    let mut used = 0;
    let mut start = words.len();
    while start > 0 {
        let cost = char_len(words[start - 1]) + 1;
        if used + cost > budget {
            break;
        }
        used += cost;
        start -= 1;
    }
    words[start..].to_vec()
}

fn compute_stats(chunks: &[TextChunk], config: &ChunkerConfig, dropped: usize) -> ChunkStats {
    let sizes: Vec<usize> = chunks.iter().map(|c| c.char_len()).collect();
    let total: usize = sizes.iter().sum();
    ChunkStats {
        chunk_count: chunks.len(),
        min_size: sizes.iter().copied().min().unwrap_or(0),
        avg_size: if sizes.is_empty() {
            0.0
        } else {
            total as f64 / sizes.len() as f64
        },
        max_size: sizes.iter().copied().max().unwrap_or(0),
        overlap_percentage: config.overlap as f64 / config.max_chunk_size as f64 * 100.0,
        dropped_paragraphs: dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, overlap: usize, min: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_size: max,
            overlap,
            min_chunk_size: min,
            ..ChunkerConfig::default()
        }
    }

    fn long_paragraph(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i * 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_two_paragraph_scenario() {
        let text = "Paragraph A. Sentence two.\n\nParagraph B.";
        let out = chunk_text(text, &config(5000, 0, 10)).unwrap();
        assert_eq!(out.chunks.len(), 2);
        assert_eq!(out.chunks[0].content, "Paragraph A. Sentence two.");
        assert_eq!(out.chunks[1].content, "Paragraph B.");
        assert_eq!(out.stats.dropped_paragraphs, 0);
        assert!(out
            .chunks
            .iter()
            .all(|c| c.chunk_type == ChunkType::Paragraph));
    }

    #[test]
    fn test_short_paragraphs_dropped() {
        let text = "Page 3\n\nThis paragraph is long enough to keep around.\n\n--";
        let out = chunk_text(text, &config(500, 0, 10)).unwrap();
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.stats.dropped_paragraphs, 2);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let out = chunk_text("   \n\n  ", &ChunkerConfig::default()).unwrap();
        assert!(out.chunks.is_empty());
        assert_eq!(out.stats.chunk_count, 0);
        assert_eq!(out.stats.min_size, 0);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(chunk_text("x", &config(0, 0, 1)).is_err());
        assert!(chunk_text("x", &config(100, 100, 10)).is_err());
        assert!(chunk_text("x", &config(100, 150, 10)).is_err());
        assert!(chunk_text("x", &config(100, 10, 0)).is_err());
        assert!(chunk_text("x", &config(100, 10, 101)).is_err());
        assert!(chunk_text("x", &config(100, 10, 100)).is_ok());

        let bad_words = ChunkerConfig {
            overlap_chars_per_word: 0,
            ..ChunkerConfig::default()
        };
        assert!(matches!(
            chunk_text("x", &bad_words),
            Err(DocsimError::Validation(_))
        ));
    }

    #[test]
    fn test_oversized_paragraph_split_by_sentences() {
        let para = long_paragraph(20);
        let out = chunk_text(&para, &config(200, 0, 10)).unwrap();
        assert!(out.chunks.len() > 1);
        for c in &out.chunks {
            assert_eq!(c.chunk_type, ChunkType::SentenceGroup);
            assert!(c.char_len() <= 200, "chunk too long: {}", c.char_len());
            assert!(c.content.ends_with('.'), "cut mid-sentence: {}", c.content);
        }
    }

    #[test]
    fn test_sentence_split_requires_capital() {
        let sentences = split_sentences("Version 2.5 is out. it is lowercase. Next one!! Done");
        assert_eq!(
            sentences,
            vec!["Version 2.5 is out. it is lowercase.", "Next one!!", "Done"]
        );
    }

    #[test]
    fn test_giant_sentence_falls_back_to_words() {
        let sentence = (0..100)
            .map(|i| if i == 0 { "Word0".to_string() } else { format!("word{}", i) })
            .collect::<Vec<_>>()
            .join(" ");
        let text = format!("Short intro sentence. {}", sentence);
        let out = chunk_text(&text, &config(60, 0, 5)).unwrap();
        assert_eq!(out.chunks[0].chunk_type, ChunkType::SentenceGroup);
        assert_eq!(out.chunks[0].content, "Short intro sentence.");
        assert!(out.chunks[1..]
            .iter()
            .all(|c| c.chunk_type == ChunkType::WordGroup));
        assert!(out.chunks.iter().all(|c| c.char_len() <= 60));
    }

    #[test]
    fn test_words_without_sentence_mode() {
        let cfg = ChunkerConfig {
            respect_sentences: false,
            ..config(50, 0, 5)
        };
        let out = chunk_text(&long_paragraph(5), &cfg).unwrap();
        assert!(out.chunks.len() > 1);
        assert!(out.chunks.iter().all(|c| c.chunk_type == ChunkType::WordGroup));
    }

    #[test]
    fn test_single_huge_word_hard_split() {
        let word = "x".repeat(250);
        let out = chunk_text(&word, &config(100, 0, 5)).unwrap();
        let sizes: Vec<usize> = out.chunks.iter().map(|c| c.char_len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_multibyte_chars_counted_as_chars() {
        let text = "┌──┐ ".repeat(40);
        let out = chunk_text(&text, &config(30, 0, 1)).unwrap();
        assert!(!out.chunks.is_empty());
        assert!(out.chunks.iter().all(|c| c.char_len() <= 30));
    }

    #[test]
    fn test_overlap_prepends_tail_words() {
        let text = "one two three four five six seven eight nine\n\nten eleven twelve";
        // 30 / 10 = 3 words wanted; previous chunk has 9 words -> cap 3.
        let out = chunk_text(text, &config(100, 30, 5)).unwrap();
        assert_eq!(out.chunks.len(), 2);
        assert_eq!(out.chunks[0].overlap_bytes, 0);
        assert_eq!(out.chunks[1].content, "seven eight nine ten eleven twelve");
        assert_eq!(out.chunks[1].base_content(), "ten eleven twelve");
    }

    #[test]
    fn test_overlap_capped_at_third_of_previous() {
        let text = "alpha beta gamma delta epsilon zeta\n\nomega psi chi";
        // 90 / 10 = 9 words wanted; previous has 6 words -> cap 2.
        let out = chunk_text(text, &config(100, 90, 5)).unwrap();
        assert_eq!(out.chunks[1].content, "epsilon zeta omega psi chi");
    }

    #[test]
    fn test_overlap_uses_pre_overlap_content() {
        let text = "a1 a2 a3 a4 a5 a6\n\nb1 b2 b3 b4 b5 b6\n\nc1 c2 c3";
        let out = chunk_text(text, &config(100, 20, 2)).unwrap();
        assert_eq!(out.chunks[1].content, "a5 a6 b1 b2 b3 b4 b5 b6");
        assert_eq!(out.chunks[2].content, "b5 b6 c1 c2 c3");
    }

    #[test]
    fn test_overlap_prefix_fits_character_budget() {
        // Twelve 16-character words per chunk; 40 / 10 = 4 overlap words
        // would be 68 characters, so only two fit.
        let words: Vec<String> = (0..60).map(|i| format!("longwordnumber{:02}", i)).collect();
        let cfg = ChunkerConfig {
            respect_sentences: false,
            ..config(210, 40, 5)
        };
        let out = chunk_text(&words.join(" "), &cfg).unwrap();
        assert!(out.chunks.len() > 2);
        for chunk in &out.chunks[1..] {
            assert_eq!(chunk.overlap_bytes, 34);
            assert!(chunk.char_len() <= cfg.max_output_chars());
        }
    }

    #[test]
    fn test_stats() {
        let text = "First paragraph here.\n\nSecond one, a bit longer than the first.";
        let out = chunk_text(text, &config(100, 25, 5)).unwrap();
        assert_eq!(out.stats.chunk_count, 2);
        assert_eq!(out.stats.min_size, out.chunks[0].char_len());
        assert_eq!(out.stats.max_size, out.chunks[1].char_len());
        assert!((out.stats.overlap_percentage - 25.0).abs() < 1e-9);
        let avg = (out.chunks[0].char_len() + out.chunks[1].char_len()) as f64 / 2.0;
        assert!((out.stats.avg_size - avg).abs() < 1e-9);
    }

    #[test]
    fn test_base_lengths_cover_input() {
        let text = format!(
            "{}\n\n{}\n\nA normal paragraph in between.\n\n{}",
            long_paragraph(12),
            long_paragraph(3),
            long_paragraph(30)
        );
        let cfg = config(180, 40, 5);
        let out = chunk_text(&text, &cfg).unwrap();
        assert_eq!(out.stats.dropped_paragraphs, 0);

        let normalized_len = char_len(&normalize_whitespace(&text));
        let base_sum: usize = out.chunks.iter().map(|c| char_len(c.base_content())).sum();
        assert!(base_sum <= normalized_len);
        // Only the separators between chunks are lost (at most a blank line each).
        assert!(normalized_len - base_sum <= 2 * out.chunks.len());
        for c in &out.chunks {
            assert!(char_len(c.base_content()) <= cfg.max_chunk_size);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = format!("{}\n\nTail paragraph for good measure.", long_paragraph(25));
        let cfg = config(150, 30, 10);
        let a = chunk_text(&text, &cfg).unwrap();
        let b = chunk_text(&text, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_into_document_chunks_dense_indices() {
        let text = "Para one is here.\n\nPara two is here.\n\nPara three is here.";
        let docs = chunk_text(text, &config(100, 0, 5))
            .unwrap()
            .into_document_chunks("doc-1");
        assert_eq!(docs.len(), 3);
        for (i, c) in docs.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, "doc-1");
            assert!(c.is_active);
            assert!(c.embedding.is_none());
        }
    }

    #[test]
    fn test_normalize_whitespace_keeps_paragraphs() {
        let text = "  line   one \r\nline two\r\n\r\n\r\n\tpara   two  ";
        assert_eq!(normalize_whitespace(text), "line one\nline two\n\npara two");
    }
}
