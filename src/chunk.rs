//! Recursive boundary-seeking text splitter and the parent/child chunker.
//!
//! [`TextSplitter`] looks for the coarsest boundary present in the text,
//! trying paragraph breaks, then line breaks, then sentence ends, then word
//! gaps, and finally individual characters. Pieces that fit within
//! `chunk_size` are merged greedily, carrying up to `chunk_overlap`
//! characters of trailing context into the next piece. Pieces that are still
//! too large are split again at the next finer boundary.
//!
//! Every piece is a contiguous slice of the input and consecutive pieces
//! either touch or overlap, so the input can always be rebuilt from its
//! pieces. Sizes are measured in characters, and cuts never fall inside a
//! UTF-8 sequence.
//!
//! [`Chunker`] applies two splitters: a coarse one producing *parents*
//! (stored whole and returned to the model) and a fine one producing
//! *children* (embedded and indexed for search).

use std::collections::VecDeque;
use std::ops::Range;

use anyhow::{bail, Result};

use crate::config::{ChunkingConfig, SplitterConfig};

/// Boundaries tried in order, coarsest first. The empty separator means a
/// hard character cut.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn from_config(config: SplitterConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into pieces of at most `chunk_size` characters.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_spans(text)
            .into_iter()
            .map(|span| &text[span])
            .collect()
    }

    /// Byte ranges of each piece within `text`, in order.
    pub fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        if !text.is_empty() {
            self.split_range(text, 0..text.len(), 0, &mut out);
        }
        out
    }

    fn split_range(&self, text: &str, range: Range<usize>, level: usize, out: &mut Vec<Range<usize>>) {
        let slice = &text[range.clone()];

        // First separator (at or below `level`) that actually occurs.
        let mut chosen = self.separators.len().saturating_sub(1);
        for (i, sep) in self.separators.iter().enumerate().skip(level) {
            if sep.is_empty() || slice.contains(sep.as_str()) {
                chosen = i;
                break;
            }
        }
        let sep = self.separators.get(chosen).map(String::as_str).unwrap_or("");

        if sep.is_empty() {
            self.hard_cut(text, range, out);
            return;
        }

        let mut fitting: Vec<(Range<usize>, usize)> = Vec::new();
        for atom in split_keep_end(slice, sep, range.start) {
            let len = text[atom.clone()].chars().count();
            if len <= self.chunk_size {
                fitting.push((atom, len));
            } else {
                if !fitting.is_empty() {
                    self.merge(&fitting, out);
                    fitting.clear();
                }
                self.split_range(text, atom, chosen + 1, out);
            }
        }
        if !fitting.is_empty() {
            self.merge(&fitting, out);
        }
    }

    /// Greedy merge of adjacent atoms with a trailing overlap window.
    fn merge(&self, atoms: &[(Range<usize>, usize)], out: &mut Vec<Range<usize>>) {
        let mut window: VecDeque<&(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for atom in atoms {
            let len = atom.1;
            if total + len > self.chunk_size && !window.is_empty() {
                out.push(window_span(&window));
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= front.1,
                        None => break,
                    }
                }
            }
            window.push_back(atom);
            total += len;
        }

        if !window.is_empty() {
            out.push(window_span(&window));
        }
    }

    fn hard_cut(&self, text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
        let bounds: Vec<usize> = text[range.clone()]
            .char_indices()
            .map(|(i, _)| range.start + i)
            .chain(std::iter::once(range.end))
            .collect();
        let chars = bounds.len() - 1;
        let stride = self.chunk_size - self.chunk_overlap;

        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars);
            out.push(bounds[start]..bounds[end]);
            if end == chars {
                break;
            }
            start += stride;
        }
    }
}

fn window_span(window: &VecDeque<&(Range<usize>, usize)>) -> Range<usize> {
    let start = window.front().map(|a| a.0.start).unwrap_or(0);
    let end = window.back().map(|a| a.0.end).unwrap_or(start);
    start..end
}

/// Split on `sep`, keeping each separator at the end of the atom it closes.
/// Ranges are offset by `base`.
fn split_keep_end(slice: &str, sep: &str, base: usize) -> Vec<Range<usize>> {
    let mut atoms = Vec::new();
    let mut start = 0;
    for (idx, matched) in slice.match_indices(sep) {
        let end = idx + matched.len();
        atoms.push(base + start..base + end);
        start = end;
    }
    if start < slice.len() {
        atoms.push(base + start..base + slice.len());
    }
    atoms
}

/// Two-level chunker: parents for storage, children for the index.
#[derive(Debug, Clone)]
pub struct Chunker {
    parent: TextSplitter,
    child: TextSplitter,
}

impl Chunker {
    pub fn new(parent: TextSplitter, child: TextSplitter) -> Result<Self> {
        if parent.chunk_size() < child.chunk_size() {
            bail!(
                "parent chunk_size ({}) must be >= child chunk_size ({})",
                parent.chunk_size(),
                child.chunk_size()
            );
        }
        Ok(Self { parent, child })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(
            TextSplitter::from_config(config.parent)?,
            TextSplitter::from_config(config.child)?,
        )
    }

    /// Split a document into `(parent_text, parent_id)` pairs. Ids are
    /// `"{document_id}-{index}"`, so re-splitting the same document yields
    /// the same ids.
    pub fn split_parent(&self, document_id: &str, text: &str) -> Vec<(String, String)> {
        self.parent
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| (piece.to_string(), parent_id(document_id, i)))
            .collect()
    }

    pub fn split_child(&self, parent_text: &str) -> Vec<String> {
        self.child
            .split(parent_text)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

pub fn parent_id(document_id: &str, index: usize) -> String {
    format!("{}-{}", document_id, index)
}

pub fn child_id(parent_id: &str, index: usize) -> String {
    format!("{}#{}", parent_id, index)
}

/// Prefix shared by every child id of `parent_id`.
pub fn child_prefix(parent_id: &str) -> String {
    format!("{}#", parent_id)
}
