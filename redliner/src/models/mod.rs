//! Model clients.
//!
//! Provider streams are normalized into [`ModelChunk`] as soon as they are read;
//! nothing above this module sees provider wire formats.

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::agent::message::Message;

pub mod catalog;
pub mod litellm;
pub mod mock;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    TextDelta(String),
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolCallDelta {
        index: usize,
        arguments: String,
    },
    Finish(StopReason),
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model stream interrupted: {0}")]
    Stream(String),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_id(&self) -> &str;

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError>;
}

/// Builds clients for a model id. Construction is local; no I/O happens here.
pub trait ModelFactory: Send + Sync {
    fn build(&self, model_id: &str) -> Arc<dyn ModelClient>;
}
