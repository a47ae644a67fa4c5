//! Tool registry for the redliner agent
//!
//! The registry always carries the built-in edit submission tool; MCP servers
//! contribute whatever tools they advertise at discovery time.

use async_trait::async_trait;
use serde_json::Value;
use shared_types::EditAction;
use std::sync::Arc;
use thiserror::Error;

use crate::models::ToolSpec;

pub mod mcp;

/// Name of the edit submission tool the client understands.
pub const EDIT_ACTIONS_TOOL: &str = "microsoft_actions_tool";

const EDIT_ACTIONS_ACK: &str = "Action submitted successfully. It is for the user to decide whether to accept or decline your proposed change. DO NOT RESPOND FURTHER.";

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique)
    fn name(&self) -> &str;

    /// Human-readable description for the model
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

/// Output from tool execution
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub content: String,
}

/// Tool execution error
#[derive(Debug, Error, Clone)]
#[error("Tool error: {message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

/// Ordered set of tools, unique by name
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the built-in tools only
    pub fn new() -> Self {
        Self {
            tools: vec![Arc::new(EditActionsTool) as Arc<dyn Tool>],
        }
    }

    /// Built-in tools plus everything the given MCP servers advertise.
    pub async fn with_servers(servers: &[Arc<mcp::McpServer>]) -> Self {
        let mut registry = Self::new();
        for tool in mcp::discover_tools(servers).await {
            registry.register(tool);
        }
        registry
    }

    /// Adds a tool; a name that is already taken is skipped.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.get(tool.name()).is_some() {
            tracing::warn!(tool = %tool.name(), "Duplicate tool name; keeping the first registration");
            return false;
        }
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        match self.get(name) {
            Some(tool) => tool.execute(args).await,
            None => Err(ToolError::new(format!("Tool '{}' not found", name))),
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn available_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Edit Actions
// ============================================================================

/// Result of reading the `actions` argument of an edit submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Vec<EditAction>),
    Malformed(String),
}

/// Accepts `actions` as a JSON-encoded string or as an inline array.
pub fn parse_edit_actions(input: &Value) -> ParseOutcome {
    let Some(actions) = input.get("actions") else {
        return ParseOutcome::Malformed("missing 'actions' argument".to_string());
    };

    let parsed = match actions {
        Value::String(raw) => serde_json::from_str::<Vec<EditAction>>(raw),
        Value::Array(_) => serde_json::from_value::<Vec<EditAction>>(actions.clone()),
        other => {
            return ParseOutcome::Malformed(format!(
                "'actions' must be a JSON string or array, got {}",
                json_kind(other)
            ))
        }
    };

    match parsed {
        Ok(actions) => ParseOutcome::Parsed(actions),
        Err(e) => ParseOutcome::Malformed(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Submits a batch of edit actions to the client
pub struct EditActionsTool;

#[async_trait]
impl Tool for EditActionsTool {
    fn name(&self) -> &str {
        EDIT_ACTIONS_TOOL
    }

    fn description(&self) -> &str {
        "Submit all document modifications for this turn as one JSON list of edit actions. Call at most once per turn."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "actions": {
                    "type": "string",
                    "description": "JSON array of edit actions, each with task, action, loc and optional new_text, withinPara, rowData, comment"
                }
            },
            "required": ["actions"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        match parse_edit_actions(&args) {
            ParseOutcome::Parsed(actions) => {
                tracing::info!(count = actions.len(), "Edit actions submitted");
                Ok(ToolOutput {
                    success: true,
                    content: EDIT_ACTIONS_ACK.to_string(),
                })
            }
            ParseOutcome::Malformed(reason) => {
                Err(ToolError::new(format!("Malformed actions: {reason}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::ActionKind;

    #[test]
    fn test_parse_string_encoded_actions() {
        let input = json!({"actions": "[{\"task\":\"t\",\"action\":\"delete\",\"loc\":\"p1\"}]"});
        match parse_edit_actions(&input) {
            ParseOutcome::Parsed(actions) => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].action, ActionKind::Delete);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_inline_array() {
        let input = json!({"actions": [{"task": "t", "action": "highlight", "loc": "t0.r0.c0.p0"}]});
        assert!(matches!(parse_edit_actions(&input), ParseOutcome::Parsed(a) if a.len() == 1));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_edit_actions(&json!({"actions": "[{not json"})),
            ParseOutcome::Malformed(_)
        ));
        assert!(matches!(
            parse_edit_actions(&json!({})),
            ParseOutcome::Malformed(_)
        ));
        assert!(matches!(
            parse_edit_actions(&json!({"actions": 7})),
            ParseOutcome::Malformed(reason) if reason.contains("number")
        ));
        assert!(matches!(
            parse_edit_actions(&Value::String("raw".to_string())),
            ParseOutcome::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_edit_tool_acknowledges() {
        let registry = ToolRegistry::new();
        let output = registry
            .execute(EDIT_ACTIONS_TOOL, json!({"actions": "[]"}))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.content.contains("DO NOT RESPOND FURTHER"));

        let err = registry
            .execute(EDIT_ACTIONS_TOOL, json!({"actions": "nope"}))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Malformed actions"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn test_duplicate_names_are_skipped() {
        let mut registry = ToolRegistry::new();
        assert!(!registry.register(Arc::new(EditActionsTool)));
        assert_eq!(registry.available_tools(), vec![EDIT_ACTIONS_TOOL]);
        assert_eq!(registry.specs()[0].name, EDIT_ACTIONS_TOOL);
    }
}
