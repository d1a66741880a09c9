//! Chunker capability and the default line-window chunker.
//!
//! A [`Chunker`] splits file content into ordered [`CodeChunk`]s with line
//! ranges. It must be deterministic: identical input yields identical
//! chunks, which keeps chunk ids stable across runs.
//!
//! # Line-window algorithm
//!
//! 1. Start a window at the first line not yet emitted.
//! 2. Extend it to at most `max_lines` lines.
//! 3. If the window does not reach the end of the file, pull its end back
//!    to the last blank line in its second half so chunks break between
//!    declarations rather than inside them.
//! 4. Emit the window (skipping whitespace-only windows) and start the next
//!    one `overlap_lines` before the previous end.
//!
//! Empty and whitespace-only files yield no chunks.
//!
//! # Example
//!
//! ```rust
//! use codesync::chunk::{Chunker, LineChunker};
//!
//! let chunker = LineChunker::new(60, 0);
//! let chunks = chunker.chunk("fn a() {}\n\nfn b() {}\n", "src/lib.rs");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 4));
//! ```

use sha2::{Digest, Sha256};

use crate::models::CodeChunk;

/// Splits file content into ordered chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, content: &str, relative_path: &str) -> Vec<CodeChunk>;
}

/// Fixed-size line windows with overlap, broken at blank lines when possible.
#[derive(Debug, Clone)]
pub struct LineChunker {
    max_lines: usize,
    overlap_lines: usize,
}

impl LineChunker {
    /// `max_lines` is clamped to at least 1 and `overlap_lines` to below it.
    pub fn new(max_lines: usize, overlap_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            overlap_lines: overlap_lines.min(max_lines - 1),
        }
    }
}

impl Default for LineChunker {
    fn default() -> Self {
        Self::new(60, 8)
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, content: &str, _relative_path: &str) -> Vec<CodeChunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            return Vec::new();
        }

        let min_window = (self.max_lines / 2).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            let hard_end = (start + self.max_lines).min(lines.len());
            let end = if hard_end == lines.len() {
                hard_end
            } else {
                (start + min_window..hard_end)
                    .rev()
                    .find(|&i| lines[i].trim().is_empty())
                    .map(|i| i + 1)
                    .unwrap_or(hard_end)
            };

            let window = &lines[start..end];
            if window.iter().any(|l| !l.trim().is_empty()) {
                chunks.push(CodeChunk {
                    text: window.join("\n"),
                    start_line: start + 1,
                    end_line: end + 1,
                });
            }

            if end == lines.len() {
                break;
            }
            start = end.saturating_sub(self.overlap_lines).max(start + 1);
        }

        chunks
    }
}

/// Deterministic chunk id for the `ordinal`-th chunk of a file.
///
/// Only the relative path and the ordinal go into the id, so every version
/// of a file maps onto the same id space. Re-indexing a file overwrites
/// whatever an earlier, possibly uncommitted, run wrote under those ids.
pub fn chunk_id(relative_path: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update([0u8]);
    hasher.update((ordinal as u64).to_le_bytes());
    let digest = hasher.finalize();
    format!("chunk_{}", hex::encode(&digest[..16]))
}
