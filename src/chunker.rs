//! Recursive character splitting.
//!
//! Text is cut on the coarsest separator that occurs in it (paragraph, line,
//! word, then single characters). Pieces that still exceed the window are
//! split again with the next separator. Small pieces are merged back into
//! windows of at most `chunk_size` characters, and each window after the
//! first starts with the trailing pieces of the previous one, up to
//! `chunk_overlap` characters.

use anyhow::Result;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Clone, Copy, Debug)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            anyhow::bail!("chunk size must be greater than zero");
        }
        if chunk_overlap >= chunk_size {
            anyhow::bail!(
                "chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})"
            );
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[&str] = &[];
        for (idx, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                break;
            }
            if text.contains(candidate) {
                separator = *candidate;
                remaining = &separators[idx + 1..];
                break;
            }
        }

        let mut windows = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                windows.extend(self.merge(&pending));
                pending.clear();
            }

            if remaining.is_empty() {
                if let Some(window) = trimmed(piece) {
                    windows.push(window);
                }
            } else {
                windows.extend(self.split_with(piece, remaining));
            }
        }

        if !pending.is_empty() {
            windows.extend(self.merge(&pending));
        }

        windows
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(window) = trimmed(&current.concat()) {
                    windows.push(window);
                }

                while !current.is_empty()
                    && (total > self.chunk_overlap || total + len > self.chunk_size)
                {
                    total -= char_len(current[0]);
                    current.remove(0);
                }
            }

            current.push(piece);
            total += len;
        }

        if let Some(window) = trimmed(&current.concat()) {
            windows.push(window);
        }

        windows
    }
}

/// Splits on `separator`, attaching each separator to the piece that follows
/// it. An empty separator yields single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, ch)| &text[idx..idx + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

fn trimmed(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
