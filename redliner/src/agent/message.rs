//! Conversation messages in their persisted shape.
//!
//! Content blocks serialize as `{"text": ..}`, `{"toolUse": {..}}` and
//! `{"toolResult": {..}}`, the layout the session files on disk use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
    Text(String),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
    pub tool_use_id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub status: ToolResultStatus,
    pub content: Vec<ToolResultContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub text: String,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(ContentBlock::ToolResult).collect(),
        }
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        })
    }

    pub fn has_tool_results(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolResult(_)))
    }
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, success: bool, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: if success {
                ToolResultStatus::Success
            } else {
                ToolResultStatus::Error
            },
            content: vec![ToolResultContent { text: text.into() }],
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_shapes() {
        let message = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text("Sure.".to_string()),
                ContentBlock::ToolUse(ToolUseBlock {
                    tool_use_id: "call_1".to_string(),
                    name: "microsoft_actions_tool".to_string(),
                    input: json!({"actions": "[]"}),
                }),
            ],
        };

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "role": "assistant",
                "content": [
                    {"text": "Sure."},
                    {"toolUse": {
                        "toolUseId": "call_1",
                        "name": "microsoft_actions_tool",
                        "input": {"actions": "[]"}
                    }}
                ]
            })
        );
    }

    #[test]
    fn test_tool_result_shape() {
        let message = Message::tool_results(vec![ToolResultBlock::new("call_1", false, "bad")]);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "role": "user",
                "content": [{"toolResult": {
                    "toolUseId": "call_1",
                    "status": "error",
                    "content": [{"text": "bad"}]
                }}]
            })
        );
        assert!(message.has_tool_results());
    }

    #[test]
    fn test_text_joins_text_blocks_only() {
        let message = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text("a".to_string()),
                ContentBlock::ToolUse(ToolUseBlock {
                    tool_use_id: "x".to_string(),
                    name: "t".to_string(),
                    input: Value::Null,
                }),
                ContentBlock::Text("b".to_string()),
            ],
        };
        assert_eq!(message.text(), "ab");
        assert_eq!(message.tool_uses().count(), 1);
    }
}
