use serde_json::Value;

use crate::model::source::RichText;

/// Read a Jira rich-text value.
///
/// API v2 sends wiki markup strings; fields edited through newer editors may
/// still arrive as Atlassian Document Format trees, which become plain text
/// with paragraph breaks.
pub fn rich_text(value: &Value) -> Option<RichText> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(RichText::Wiki(s.clone())),
        other => extract_text_from_adf(other)
            .filter(|s| !s.trim().is_empty())
            .map(RichText::Plain),
    }
}

/// Extract plain text from Jira's Atlassian Document Format (ADF).
pub fn extract_text_from_adf(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => {
            let parts: Vec<String> = arr.iter().filter_map(extract_text_from_adf).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(""))
            }
        }
        Value::Object(obj) => match obj.get("type").and_then(|v| v.as_str()) {
            Some("text") => obj.get("text").and_then(|v| v.as_str()).map(String::from),
            Some("hardBreak") => Some("\n".into()),
            Some("mention") => obj
                .get("attrs")
                .and_then(|a| a.get("text"))
                .and_then(|v| v.as_str())
                .map(String::from),
            Some("doc") => {
                let blocks: Vec<String> = obj
                    .get("content")
                    .and_then(|c| c.as_array())
                    .map(|blocks| blocks.iter().filter_map(extract_text_from_adf).collect())
                    .unwrap_or_default();
                Some(blocks.join("\n\n"))
            }
            _ => obj.get("content").and_then(extract_text_from_adf),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wiki_strings_pass_through() {
        assert_eq!(
            rich_text(&json!("h1. Title")),
            Some(RichText::Wiki("h1. Title".into()))
        );
        assert_eq!(rich_text(&Value::Null), None);
    }

    #[test]
    fn extracts_paragraphs_from_adf() {
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "Hello " },
                    { "type": "mention", "attrs": { "text": "@John" } }
                ]},
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "line one" },
                    { "type": "hardBreak" },
                    { "type": "text", "text": "line two" }
                ]}
            ]
        });
        assert_eq!(
            rich_text(&doc),
            Some(RichText::Plain("Hello @John\n\nline one\nline two".into()))
        );
    }

    #[test]
    fn empty_document_is_none() {
        let doc = json!({ "type": "doc", "version": 1, "content": [] });
        assert_eq!(rich_text(&doc), None);
    }
}
