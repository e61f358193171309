use super::{ParsedDocument, Parser, Section};
use crate::error::Result;

/// Plain text parser
///
/// Treats the entire file as a single section. Also serves as the fallback
/// when a structured parser (YAML, JSON) rejects a file.
pub struct PlainTextParser;

impl Parser for PlainTextParser {
    fn parse(&self, content: &str, path: &str) -> Result<ParsedDocument> {
        let doc_type = if path.ends_with(".yaml") || path.ends_with(".yml") {
            "yaml_plaintext"
        } else if path.ends_with(".json") {
            "json_plaintext"
        } else if path.ends_with(".md") || path.ends_with(".markdown") {
            "markdown_plaintext"
        } else {
            "plaintext"
        };

        let sections = vec![Section {
            header: "content".to_string(),
            content: content.to_string(),
            section_type: None,
        }];

        Ok(ParsedDocument {
            content: content.to_string(),
            sections,
            doc_type: doc_type.to_string(),
        })
    }
}
