//! Shared types: tool descriptors and normalized tool output
//!
//! Tool servers return results in several shapes (plain text, a content
//! list, structured JSON). [`ToolOutput`] is the tagged union the rest of
//! the host works with, and `to_json` is the one normalization point every
//! consumer goes through.

use rmcp::model::{CallToolResult, RawContent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool advertised by one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// Input schema (JSON)
    #[serde(rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// One item of a content-list result
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    /// Plain text content
    Text { text: String },
    /// Binary content carried by mime type (payload not retained)
    Data { mime_type: String },
    /// Content the host does not understand
    Unknown { value: String },
}

/// Normalized result of one tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// A single piece of text
    Text(String),
    /// Multiple content items
    ContentList(Vec<ContentItem>),
    /// Structured JSON with no content items
    Opaque(Value),
}

impl ToolOutput {
    /// Normalize a raw protocol result.
    ///
    /// A lone text item collapses to `Text`; anything with multiple or
    /// non-text items becomes `ContentList`; an empty content list with
    /// structured output becomes `Opaque`.
    pub fn from_call_result(result: CallToolResult) -> Self {
        let items: Vec<ContentItem> = result
            .content
            .into_iter()
            .map(|c| match c.raw {
                RawContent::Text(t) => ContentItem::Text {
                    text: t.text.to_string(),
                },
                RawContent::Image(i) => ContentItem::Data {
                    mime_type: i.mime_type.to_string(),
                },
                other => ContentItem::Unknown {
                    value: format!("{other:?}"),
                },
            })
            .collect();

        match items.as_slice() {
            [] => match result.structured_content {
                Some(value) => Self::Opaque(value),
                None => Self::Text(String::new()),
            },
            [ContentItem::Text { text }] => Self::Text(text.clone()),
            _ => Self::ContentList(items),
        }
    }

    /// Joined text of all textual content
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::ContentList(items) => {
                let texts: Vec<&str> = items
                    .iter()
                    .filter_map(|i| match i {
                        ContentItem::Text { text } if !text.is_empty() => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                texts.join("\n")
            }
            Self::Opaque(value) => value.to_string(),
        }
    }

    /// Canonical JSON form, one shape per variant
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => json!({"type": "text", "text": text}),
            Self::ContentList(items) => {
                let rendered: Vec<Value> = items
                    .iter()
                    .map(|i| match i {
                        ContentItem::Text { text } => json!({"type": "text", "text": text}),
                        ContentItem::Data { mime_type } => {
                            json!({"type": "data", "mimeType": mime_type})
                        }
                        ContentItem::Unknown { value } => {
                            json!({"type": "unknown", "value": value})
                        }
                    })
                    .collect();
                json!({
                    "type": "content_list",
                    "items": rendered,
                    "text": self.as_text(),
                })
            }
            Self::Opaque(value) => json!({"type": "opaque", "value": value}),
        }
    }
}
