pub mod json;
pub mod markdown;
pub mod plaintext;
pub mod yaml;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::chunker::{chunk_document, Chunk};
use super::metadata::file_extension;
use crate::error::{RagsyncError, Result};

/// A parsed document with sections
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub sections: Vec<Section>,
    pub doc_type: String,
}

/// A section within a document
#[derive(Debug, Clone)]
pub struct Section {
    pub header: String,
    pub content: String,
    pub section_type: Option<String>,
}

/// Document parser capability.
///
/// Implementors only need [`Parser::parse`]; [`Parser::get_chunks`] reads the
/// file, parses it and splits every section into chunks of at most
/// `max_chunk_size` bytes, preserving document order.
pub trait Parser: Send + Sync {
    /// Parse document content into structured sections
    fn parse(&self, content: &str, path: &str) -> Result<ParsedDocument>;

    /// Produce the ordered chunks for a file
    fn get_chunks(&self, path: &Path, max_chunk_size: usize) -> Result<Vec<Chunk>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagsyncError::Parse(format!("Failed to read {}: {}", path.display(), e)))?;
        let parsed = self.parse(&content, &path.to_string_lossy())?;
        chunk_document(&parsed, max_chunk_size)
    }
}

/// Built-in parsers, selected by extension through a [`ParserTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    Markdown,
    Text,
    Json,
    Yaml,
}

impl ParserKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::Markdown => "markdown",
            ParserKind::Text => "text",
            ParserKind::Json => "json",
            ParserKind::Yaml => "yaml",
        }
    }

    /// The parser implementation for this kind
    pub fn parser(&self) -> &'static dyn Parser {
        match self {
            ParserKind::Markdown => &markdown::MarkdownParser,
            ParserKind::Text => &plaintext::PlainTextParser,
            ParserKind::Json => &json::JsonParser,
            ParserKind::Yaml => &yaml::YamlParser,
        }
    }
}

/// Default extension → parser mapping used when the config has no `parser_map`
pub fn default_parser_map() -> BTreeMap<String, ParserKind> {
    [
        ("md", ParserKind::Markdown),
        ("markdown", ParserKind::Markdown),
        ("txt", ParserKind::Text),
        ("json", ParserKind::Json),
        ("yaml", ParserKind::Yaml),
        ("yml", ParserKind::Yaml),
    ]
    .into_iter()
    .map(|(ext, kind)| (ext.to_string(), kind))
    .collect()
}

/// Static extension → parser table.
///
/// Extensions are stored lowercased without a leading dot, so `".MD"` and
/// `"md"` in configuration resolve to the same entry.
#[derive(Debug, Clone)]
pub struct ParserTable {
    map: BTreeMap<String, ParserKind>,
}

impl ParserTable {
    pub fn new(map: &BTreeMap<String, ParserKind>) -> Self {
        let map = map
            .iter()
            .map(|(ext, kind)| (ext.trim_start_matches('.').to_lowercase(), *kind))
            .filter(|(ext, _)| !ext.is_empty())
            .collect();
        Self { map }
    }

    /// Parser for a file, by extension
    pub fn parser_for(&self, path: &Path) -> Option<ParserKind> {
        self.map.get(&file_extension(path)).copied()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for ParserTable {
    fn default() -> Self {
        Self::new(&default_parser_map())
    }
}

/// Resolves files to parsers and runs them.
///
/// A parser failure is fatal by default. With plain-text fallback enabled, a
/// structured parser that rejects a file (e.g. malformed JSON) is retried as
/// plain text instead.
#[derive(Debug, Clone, Default)]
pub struct ParserRegistry {
    table: ParserTable,
    plaintext_fallback: bool,
}

impl ParserRegistry {
    pub fn new(table: ParserTable) -> Self {
        Self {
            table,
            plaintext_fallback: false,
        }
    }

    pub fn with_plaintext_fallback(mut self, enabled: bool) -> Self {
        self.plaintext_fallback = enabled;
        self
    }

    pub fn table(&self) -> &ParserTable {
        &self.table
    }

    /// Chunk a file with the given parser, applying the fallback policy
    pub fn get_chunks(&self, kind: ParserKind, path: &Path, max_chunk_size: usize) -> Result<Vec<Chunk>> {
        match kind.parser().get_chunks(path, max_chunk_size) {
            Ok(chunks) => Ok(chunks),
            Err(RagsyncError::Parse(e)) if self.plaintext_fallback && kind != ParserKind::Text => {
                log::warn!(
                    "Parser {} failed for {}, falling back to plain text: {}",
                    kind.name(),
                    path.display(),
                    e
                );
                plaintext::PlainTextParser.get_chunks(path, max_chunk_size)
            }
            Err(e) => Err(e),
        }
    }
}
