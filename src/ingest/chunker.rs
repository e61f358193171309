use std::collections::BTreeMap;

use serde_json::Value;

use super::metadata::{DOC_TYPE_KEY, SECTION_HEADER_KEY, SECTION_TYPE_KEY};
use super::parsers::ParsedDocument;
use crate::error::{RagsyncError, Result};

/// Ordered metadata map. Ordering keeps serialization (and therefore hashing) stable.
pub type Metadata = BTreeMap<String, Value>;

/// A chunk of text with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insert
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// String-valued metadata lookup
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Chunk a parsed document, section by section.
///
/// Every chunk carries the document type and its section header (and
/// section type, when the parser assigned one). Section order, and chunk
/// order within a section, follow the document.
pub fn chunk_document(parsed: &ParsedDocument, max_chunk_size: usize) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();

    for section in &parsed.sections {
        for text in chunk_text(&section.content, max_chunk_size)? {
            let mut chunk = Chunk::new(text)
                .with_metadata(DOC_TYPE_KEY, parsed.doc_type.clone())
                .with_metadata(SECTION_HEADER_KEY, section.header.clone());
            if let Some(section_type) = &section.section_type {
                chunk = chunk.with_metadata(SECTION_TYPE_KEY, section_type.clone());
            }
            chunks.push(chunk);
        }
    }

    // Sections produced nothing (e.g. all whitespace headers); fall back to the raw body
    if chunks.is_empty() {
        for text in chunk_text(&parsed.content, max_chunk_size)? {
            chunks.push(Chunk::new(text).with_metadata(DOC_TYPE_KEY, parsed.doc_type.clone()));
        }
    }

    Ok(chunks)
}

/// Split text into pieces of at most `max_chunk_size` bytes.
///
/// Prefers to break on whitespace or sentence punctuation found in the last
/// 20% of a window. Slices always fall on UTF-8 character boundaries; a
/// single character wider than `max_chunk_size` becomes its own piece.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Result<Vec<String>> {
    if max_chunk_size == 0 {
        return Err(RagsyncError::InvalidInput(
            "max_chunk_size must be greater than 0".to_string(),
        ));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Largest char boundary at or before byte_pos
    let floor_boundary = |byte_pos: usize| -> usize {
        if byte_pos >= text.len() {
            return text.len();
        }
        (0..=byte_pos).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
    };

    // Smallest char boundary strictly after byte_pos
    let next_boundary = |byte_pos: usize| -> usize {
        ((byte_pos + 1)..=text.len())
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(text.len())
    };

    let mut chunks = Vec::new();
    let mut start_byte = 0;

    while start_byte < text.len() {
        let mut end_byte = floor_boundary((start_byte + max_chunk_size).min(text.len()));
        if end_byte <= start_byte {
            end_byte = next_boundary(start_byte);
        }

        let chunk_end_byte = if end_byte < text.len() {
            let search_start = floor_boundary(end_byte.saturating_sub(max_chunk_size / 5).max(start_byte));
            text.get(search_start..end_byte)
                .and_then(|window| {
                    window
                        .char_indices()
                        .rev()
                        .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                        .map(|(offset, _)| next_boundary(search_start + offset))
                })
                .filter(|&boundary| boundary > start_byte && boundary <= end_byte)
                .unwrap_or(end_byte)
        } else {
            end_byte
        };

        let piece = text.get(start_byte..chunk_end_byte).ok_or_else(|| {
            RagsyncError::Parse(format!(
                "Failed to slice text at byte boundaries: start={}, end={}, len={}",
                start_byte,
                chunk_end_byte,
                text.len()
            ))
        })?;

        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        start_byte = chunk_end_byte;
    }

    Ok(chunks)
}
