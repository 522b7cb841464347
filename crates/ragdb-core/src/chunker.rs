//! Recursive character chunker.
//!
//! Splits a document into overlapping passages of at most `max_chars`
//! characters. Each window is cut at the coarsest boundary that fits in its
//! second half: paragraph, line, sentence, word. Earlier boundaries are only
//! used when the second half has none, and a raw character cut is the last
//! resort. The next window starts `overlap_chars` before the previous end
//! (snapped back to a word start when possible), so consecutive chunks always
//! share at least `overlap_chars` characters.

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

const BOUNDARIES: [Boundary; 4] = [Boundary::Paragraph, Boundary::Line, Boundary::Sentence, Boundary::Word];

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    settings: ChunkingSettings,
}

impl Chunker {
    pub fn new(settings: ChunkingSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ChunkingSettings { &self.settings }

    pub fn split(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.url.trim().is_empty() {
            return Err(Error::Ingestion(format!(
                "document '{}' has no url; provenance is required",
                document.title
            )));
        }
        Ok(self
            .spans(&document.text)
            .into_iter()
            .filter(|(_, _, content)| !content.trim().is_empty())
            .map(|(start, end, content)| Chunk {
                id: chunk_id(document, start, &content),
                source_url: document.url.clone(),
                section: document.section.clone(),
                title: document.title.clone(),
                content,
                start,
                end,
            })
            .collect())
    }

    /// Character spans `(start, end, content)` of every chunk of `text`.
    fn spans(&self, text: &str) -> Vec<(usize, usize, String)> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let max = self.settings.max_chars;
        let overlap = self.settings.overlap_chars;
        let slice = |s: usize, e: usize| chars[s..e].iter().collect::<String>();

        if n <= max {
            return vec![(0, n, text.to_string())];
        }

        let mut spans = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;
        loop {
            if n - start <= max {
                spans.push((start, n, slice(start, n)));
                break;
            }
            let window_end = start + max;
            // The cut must leave room for the overlap and extend past the
            // previous chunk.
            let min_end = (start + overlap + 1).max(prev_end + 1);
            // Cuts in the second half of the window win over earlier ones.
            let preferred = (start + max / 2).max(min_end);
            let end = find_break(&chars, preferred, window_end)
                .or_else(|| find_break(&chars, min_end, window_end))
                .unwrap_or(window_end);
            spans.push((start, end, slice(start, end)));
            prev_end = end;

            let next = end - overlap;
            start = snap_to_word_start(&chars, next, start + 1);
        }
        spans
    }
}

fn find_break(chars: &[char], min_end: usize, window_end: usize) -> Option<usize> {
    BOUNDARIES
        .iter()
        .find_map(|b| (min_end..=window_end).rev().find(|&p| is_break_after(chars, p, *b)))
}

/// True when position `p` directly follows a boundary of the given kind.
fn is_break_after(chars: &[char], p: usize, boundary: Boundary) -> bool {
    if p == 0 || p > chars.len() {
        return false;
    }
    match boundary {
        Boundary::Paragraph => p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n',
        Boundary::Line => chars[p - 1] == '\n',
        Boundary::Sentence => {
            p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?')
        }
        Boundary::Word => chars[p - 1].is_whitespace(),
    }
}

/// Move `pos` back to the start of the word it falls in, never below `floor`.
/// Leaves `pos` unchanged when no word start exists in `[floor, pos]`.
fn snap_to_word_start(chars: &[char], pos: usize, floor: usize) -> usize {
    (floor..=pos)
        .rev()
        .find(|&p| chars[p - 1].is_whitespace() && !chars[p].is_whitespace())
        .unwrap_or(pos)
}

fn chunk_id(document: &Document, start: usize, content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [document.url.as_str(), document.section.as_str(), document.title.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&(start as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}
