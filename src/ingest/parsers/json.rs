use super::{ParsedDocument, Parser, Section};
use crate::error::{RagsyncError, Result};
use serde_json::Value as JsonValue;

/// JSON parser.
///
/// JSON Schema documents become one section per definition/property; other
/// objects one section per top-level key; arrays one section per element.
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, content: &str, path: &str) -> Result<ParsedDocument> {
        let json_value: JsonValue = serde_json::from_str(content)
            .map_err(|e| RagsyncError::Parse(format!("JSON parse error in {}: {}", path, e)))?;

        let mut sections = Vec::new();
        let mut doc_type = "json";

        match &json_value {
            JsonValue::Object(map) => {
                if let Some(JsonValue::Object(definitions)) = map.get("definitions") {
                    for (name, schema) in definitions {
                        sections.push(Section {
                            header: format!("Definition: {}", name),
                            content: format_schema_entry("Definition", name, schema),
                            section_type: Some("definition".to_string()),
                        });
                    }
                }

                if let Some(JsonValue::Object(properties)) = map.get("properties") {
                    for (name, prop) in properties {
                        sections.push(Section {
                            header: format!("Property: {}", name),
                            content: format_schema_entry("Property", name, prop),
                            section_type: Some("property".to_string()),
                        });
                    }
                }

                if sections.is_empty() {
                    for (key, value) in map {
                        sections.push(Section {
                            header: key.clone(),
                            content: json_value_to_text(value),
                            section_type: Some(key.clone()),
                        });
                    }
                } else {
                    doc_type = "json_schema";
                }
            }
            JsonValue::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    sections.push(Section {
                        header: format!("item {}", idx),
                        content: json_value_to_text(item),
                        section_type: Some("item".to_string()),
                    });
                }
            }
            other => {
                sections.push(Section {
                    header: "content".to_string(),
                    content: json_value_to_text(other),
                    section_type: None,
                });
            }
        }

        if sections.is_empty() {
            sections.push(Section {
                header: "root".to_string(),
                content: content.to_string(),
                section_type: None,
            });
        }

        Ok(ParsedDocument {
            content: content.to_string(),
            sections,
            doc_type: doc_type.to_string(),
        })
    }
}

/// Render a JSON Schema definition or property as readable text
fn format_schema_entry(kind: &str, name: &str, schema: &JsonValue) -> String {
    let mut parts = vec![format!("{}: {}", kind, name)];

    if let JsonValue::Object(map) = schema {
        if let Some(JsonValue::String(typ)) = map.get("type") {
            parts.push(format!("Type: {}", typ));
        }

        if let Some(JsonValue::String(desc)) = map.get("description") {
            parts.push(format!("Description: {}", desc));
        }

        if let Some(JsonValue::Array(enum_vals)) = map.get("enum") {
            parts.push(format!("Enum values: {}", json_value_to_text(&JsonValue::Array(enum_vals.clone()))));
        }

        if let Some(JsonValue::Object(props)) = map.get("properties") {
            parts.push("Properties:".to_string());
            for (prop_name, prop_value) in props {
                parts.push(format!("  - {}: {}", prop_name, json_value_to_text(prop_value)));
            }
        }
    } else {
        parts.push(json_value_to_text(schema));
    }

    parts.join("\n")
}

/// Convert JSON value to readable text representation
fn json_value_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => "null".to_string(),
        JsonValue::Array(arr) => arr.iter().map(json_value_to_text).collect::<Vec<_>>().join(", "),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, json_value_to_text(v)))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_parser_schema() {
        let content = r#"
{
  "definitions": {
    "TestType": {
      "type": "object",
      "description": "A test type",
      "properties": {
        "name": {"type": "string"}
      }
    }
  }
}
"#;

        let result = JsonParser.parse(content, "test.json").unwrap();
        assert_eq!(result.doc_type, "json_schema");
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].header, "Definition: TestType");
        assert!(result.sections[0].content.contains("Description: A test type"));
        assert!(result.sections[0].content.contains("name: type: string"));
    }

    #[test]
    fn test_json_parser_plain_object() {
        let result = JsonParser.parse(r#"{"a": 1, "b": [true, null]}"#, "x.json").unwrap();
        assert_eq!(result.doc_type, "json");
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[0].header, "a");
        assert_eq!(result.sections[1].content, "true, null");
    }

    #[test]
    fn test_json_parser_array_items() {
        let result = JsonParser.parse(r#"[{"q": "one"}, {"q": "two"}]"#, "faq.json").unwrap();
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[1].header, "item 1");
        assert_eq!(result.sections[1].content, "q: two");
    }

    #[test]
    fn test_json_parser_rejects_invalid() {
        let result = JsonParser.parse("{invalid", "bad.json");
        assert!(matches!(result, Err(RagsyncError::Parse(_))));
    }
}
