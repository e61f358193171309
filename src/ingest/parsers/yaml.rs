use super::{ParsedDocument, Parser, Section};
use crate::error::{RagsyncError, Result};
use serde_yaml_ng::Value as YamlValue;

/// YAML parser: one section per top-level key
pub struct YamlParser;

impl Parser for YamlParser {
    fn parse(&self, content: &str, path: &str) -> Result<ParsedDocument> {
        let yaml_value: YamlValue = serde_yaml_ng::from_str(content)
            .map_err(|e| RagsyncError::Parse(format!("YAML parse error in {}: {}", path, e)))?;

        let mut sections = Vec::new();

        match yaml_value {
            YamlValue::Mapping(map) => {
                for (key, value) in map {
                    let header = yaml_key_to_text(&key);
                    sections.push(Section {
                        header: header.clone(),
                        content: yaml_value_to_text(&value),
                        section_type: Some(header),
                    });
                }
            }
            YamlValue::Null => {}
            other => {
                sections.push(Section {
                    header: "root".to_string(),
                    content: yaml_value_to_text(&other),
                    section_type: None,
                });
            }
        }

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
            doc_type: "yaml".to_string(),
        })
    }
}

fn yaml_key_to_text(key: &YamlValue) -> String {
    match key {
        YamlValue::String(s) => s.clone(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Bool(b) => b.to_string(),
        _ => "key".to_string(),
    }
}

/// Convert YAML value to readable text representation
fn yaml_value_to_text(value: &YamlValue) -> String {
    match value {
        YamlValue::String(s) => s.clone(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Null => "null".to_string(),
        YamlValue::Sequence(seq) => seq.iter().map(yaml_value_to_text).collect::<Vec<_>>().join(", "),
        YamlValue::Mapping(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", yaml_key_to_text(k), yaml_value_to_text(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        YamlValue::Tagged(tagged) => yaml_value_to_text(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parser_sections_per_key() {
        let content = r#"
key1: value1
key2: value2
nested:
  subkey: subvalue
"#;

        let result = YamlParser.parse(content, "test.yaml").unwrap();
        assert_eq!(result.doc_type, "yaml");
        assert_eq!(result.sections.len(), 3);

        let key1 = result.sections.iter().find(|s| s.header == "key1").unwrap();
        assert_eq!(key1.content, "value1");
        let nested = result.sections.iter().find(|s| s.header == "nested").unwrap();
        assert_eq!(nested.content, "subkey: subvalue");
    }

    #[test]
    fn test_yaml_parser_sequence_root() {
        let result = YamlParser.parse("- a\n- b\n", "list.yml").unwrap();
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].header, "root");
        assert_eq!(result.sections[0].content, "a, b");
    }

    #[test]
    fn test_yaml_parser_rejects_invalid() {
        let result = YamlParser.parse("key: [unclosed", "bad.yaml");
        assert!(matches!(result, Err(RagsyncError::Parse(_))));
    }
}
