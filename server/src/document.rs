//! Open document text, mirrored from the host.
//!
//! The server advertises incremental sync, so content changes arrive either
//! as ranged splices or as whole-text replacements. LSP positions count
//! UTF-16 code units within a line; they are converted to byte offsets here
//! and clamped to the document rather than rejected; the host owns the
//! text, this store only follows along.

use std::collections::HashMap;

use crate::protocol::{ContentChange, Position};

#[derive(Default)]
pub(crate) struct DocumentStore {
    docs: HashMap<String, String>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, uri: String, text: String) {
        self.docs.insert(uri, text);
    }

    pub fn close(&mut self, uri: &str) {
        self.docs.remove(uri);
    }

    pub fn text(&self, uri: &str) -> Option<&str> {
        self.docs.get(uri).map(String::as_str)
    }

    /// URIs of all open documents, for configuration-change re-validation.
    pub fn open_uris(&self) -> Vec<String> {
        self.docs.keys().cloned().collect()
    }

    /// Apply the host's content changes in order. Returns `false` when the
    /// document was never opened (the changes are dropped).
    pub fn apply_changes(&mut self, uri: &str, changes: &[ContentChange]) -> bool {
        let Some(text) = self.docs.get_mut(uri) else {
            return false;
        };
        for change in changes {
            match change.range {
                Some(range) => {
                    let start = byte_offset(text, range.start);
                    let end = byte_offset(text, range.end).max(start);
                    text.replace_range(start..end, &change.text);
                }
                None => {
                    text.clear();
                    text.push_str(&change.text);
                }
            }
        }
        true
    }
}

/// Byte offset of an LSP position, clamped to the document.
///
/// A line past the end maps to the document end; a character past the end of
/// its line maps to the end of that line (before the line break).
fn byte_offset(text: &str, pos: Position) -> usize {
    let mut line_start = 0usize;
    for _ in 0..pos.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }

    let line = match text[line_start..].find('\n') {
        Some(i) => &text[line_start..line_start + i],
        None => &text[line_start..],
    };

    let mut units = 0u32;
    for (offset, ch) in line.char_indices() {
        if units >= pos.character {
            return line_start + offset;
        }
        units += ch.len_utf16() as u32;
    }
    line_start + line.len()
}
