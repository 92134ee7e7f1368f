//! Overlapping line-window chunking.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// One window of source text with a stable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `"{file_path}:{start_line}-{end_line}"`.
    pub id: String,
    pub text: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub language: &'static str,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Hard cap on lines per chunk (default: 60).
    pub max_lines: usize,
    /// Lines shared by consecutive chunks (default: 10).
    pub overlap_lines: usize,
    /// Soft cap on characters per chunk; a single longer line still forms a chunk (default: 1200).
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_lines: 60,
            overlap_lines: 10,
            max_chars: 1200,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns an error if the window is empty or the overlap would stall progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_lines == 0 || self.max_chars == 0 {
            return Err(IndexError::Config(
                "max_lines and max_chars must be positive".into(),
            ));
        }
        if self.overlap_lines >= self.max_lines {
            return Err(IndexError::Config(format!(
                "overlap_lines ({}) must be smaller than max_lines ({})",
                self.overlap_lines, self.max_lines
            )));
        }
        Ok(())
    }
}

/// Language tag stored in chunk metadata.
#[must_use]
pub fn language_of(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("py" | "pyi") => "python",
        Some("md") => "markdown",
        Some("toml") => "toml",
        Some("json") => "json",
        Some("txt") => "text",
        _ => "unknown",
    }
}

/// Split `text` into overlapping windows.
///
/// Windows hold at most `max_lines` lines and stop early once adding the
/// next line would exceed `max_chars`. Each window after the first starts
/// `overlap_lines` before the previous end, but always at least one line
/// later than the previous start. Windows containing only whitespace are
/// dropped.
#[must_use]
pub fn chunk_source(file_path: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    let language = language_of(file_path);
    let max_lines = config.max_lines.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start;
        let mut chars = 0usize;
        while end < lines.len() && end - start < max_lines {
            let len = lines[end].len() + 1;
            if end > start && chars + len > config.max_chars {
                break;
            }
            chars += len;
            end += 1;
        }

        let window = &lines[start..end];
        if window.iter().any(|l| !l.trim().is_empty()) {
            let body = window.join("\n");
            let (first, last) = (start + 1, end);
            chunks.push(Chunk {
                id: format!("{file_path}:{first}-{last}"),
                content_hash: blake3::hash(body.as_bytes()).to_hex().to_string(),
                text: body,
                file_path: file_path.to_owned(),
                start_line: first,
                end_line: last,
                language,
            });
        }

        if end >= lines.len() {
            break;
        }
        start = end.saturating_sub(config.overlap_lines).max(start + 1);
    }
    chunks
}
