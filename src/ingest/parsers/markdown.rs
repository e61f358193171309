use super::{ParsedDocument, Parser, Section};
use crate::error::Result;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser as CmarkParser, Tag, TagEnd};

/// Markdown parser: one section per heading, plus an optional frontmatter section
pub struct MarkdownParser;

/// Accumulates the section currently being read
#[derive(Default)]
struct SectionBuilder {
    header: String,
    body: String,
    level: Option<HeadingLevel>,
}

impl SectionBuilder {
    fn flush(&mut self, sections: &mut Vec<Section>) {
        let body = self.body.trim();
        if !body.is_empty() {
            let header = self.header.trim();
            sections.push(Section {
                header: if header.is_empty() { "content".to_string() } else { header.to_string() },
                content: body.to_string(),
                section_type: self.level.map(|level| format!("h{}", level as u32)),
            });
        }
        *self = SectionBuilder::default();
    }
}

impl Parser for MarkdownParser {
    fn parse(&self, content: &str, _path: &str) -> Result<ParsedDocument> {
        let (frontmatter, body) = split_frontmatter(content);

        let mut sections = Vec::new();
        if let Some(fm) = frontmatter.map(str::trim).filter(|fm| !fm.is_empty()) {
            sections.push(Section {
                header: "frontmatter".to_string(),
                content: fm.to_string(),
                section_type: Some("frontmatter".to_string()),
            });
        }

        let mut current = SectionBuilder::default();
        let mut in_heading = false;

        for event in CmarkParser::new(body) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    current.flush(&mut sections);
                    current.level = Some(level);
                    in_heading = true;
                }
                Event::End(TagEnd::Heading(_)) => in_heading = false,
                Event::Text(text) | Event::Code(text) if in_heading => current.header.push_str(&text),
                Event::Text(text) => current.body.push_str(&text),
                Event::Code(code) => {
                    current.body.push('`');
                    current.body.push_str(&code);
                    current.body.push('`');
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(lang) => lang.to_string(),
                        CodeBlockKind::Indented => String::new(),
                    };
                    current.body.push_str(&format!("\n```{}\n", lang));
                }
                Event::End(TagEnd::CodeBlock) => current.body.push_str("```\n"),
                Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => current.body.push('\n'),
                Event::SoftBreak | Event::HardBreak => current.body.push('\n'),
                _ => {}
            }
        }
        current.flush(&mut sections);

        if sections.is_empty() {
            sections.push(Section {
                header: "content".to_string(),
                content: content.to_string(),
                section_type: None,
            });
        }

        Ok(ParsedDocument {
            content: content.to_string(),
            sections,
            doc_type: "markdown".to_string(),
        })
    }
}

/// Split a leading `---` YAML frontmatter block from the markdown body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, content);
    };

    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            let body = after.split_once('\n').map(|(_, body)| body).unwrap_or("");
            (Some(&rest[..end]), body)
        }
        None => (None, content),
    }
}
