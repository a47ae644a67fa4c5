//! OpenAI-compatible streaming client for the LiteLLM proxy.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    ModelChunk, ModelClient, ModelError, ModelFactory, ModelRequest, ModelStream, StopReason,
};
use crate::agent::message::{ContentBlock, Message, Role};

#[derive(Clone)]
pub struct LiteLlmModelFactory {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl LiteLlmModelFactory {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, max_tokens: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            max_tokens,
        }
    }
}

impl ModelFactory for LiteLlmModelFactory {
    fn build(&self, model_id: &str) -> Arc<dyn ModelClient> {
        Arc::new(LiteLlmModel {
            model_id: model_id.to_string(),
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            max_tokens: self.max_tokens,
        })
    }
}

pub struct LiteLlmModel {
    model_id: String,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl LiteLlmModel {
    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        for message in &request.messages {
            messages.extend(to_openai_messages(message));
        }

        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
            "stream": true,
            "max_tokens": self.max_tokens,
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

#[async_trait]
impl ModelClient for LiteLlmModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.http.post(&url).json(&self.request_body(&request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response
            .bytes_stream()
            .scan(ChatCompletionParser::default(), |parser, bytes| {
                let items: Vec<Result<ModelChunk, ModelError>> = match bytes {
                    Ok(bytes) => parser.feed(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(ModelError::Stream(e.to_string()))],
                };
                futures_util::future::ready(Some(futures_util::stream::iter(items)))
            })
            .flatten();

        Ok(Box::pin(chunks))
    }
}

fn to_openai_messages(message: &Message) -> Vec<Value> {
    match message.role {
        Role::User if message.has_tool_results() => message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult(result) => Some(json!({
                    "role": "tool",
                    "tool_call_id": result.tool_use_id,
                    "content": result.text(),
                })),
                _ => None,
            })
            .collect(),
        Role::User => vec![json!({"role": "user", "content": message.text()})],
        Role::Assistant => {
            let text = message.text();
            let tool_calls: Vec<Value> = message
                .tool_uses()
                .map(|tool_use| {
                    json!({
                        "id": tool_use.tool_use_id,
                        "type": "function",
                        "function": {
                            "name": tool_use.name,
                            "arguments": tool_use.input.to_string(),
                        }
                    })
                })
                .collect();

            let content = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            let mut value = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                value["tool_calls"] = Value::Array(tool_calls);
            }
            vec![value]
        }
    }
}

/// Incremental parser for `chat.completion.chunk` SSE frames.
///
/// Bytes are buffered until a frame is complete so a character split across
/// network chunks is decoded whole.
#[derive(Debug, Default)]
pub struct ChatCompletionParser {
    buffer: Vec<u8>,
}

impl ChatCompletionParser {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ModelChunk> {
        // CR only ever appears in line endings; JSON escapes it inside strings.
        self.buffer
            .extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut chunks = Vec::new();

        while let Some(split) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).take(split).collect();
            let frame = match String::from_utf8(frame) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring completion frame that is not UTF-8");
                    continue;
                }
            };

            let Some(payload) = extract_data_payload(&frame) else {
                continue;
            };
            if payload == "[DONE]" {
                continue;
            }
            match serde_json::from_str::<Value>(&payload) {
                Ok(value) => chunks.extend(map_chunk(&value)),
                Err(e) => tracing::debug!(error = %e, "Ignoring undecodable completion frame"),
            }
        }

        chunks
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_chunk(value: &Value) -> Vec<ModelChunk> {
    let mut chunks = Vec::new();
    let Some(choice) = value
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        return chunks;
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                chunks.push(ModelChunk::TextDelta(text.to_string()));
            }
        }

        for call in delta
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
        {
            let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty());
            if let Some(name) = name {
                let id = call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("call_{index}"));
                chunks.push(ModelChunk::ToolCallStart {
                    index,
                    id,
                    name: name.to_string(),
                });
            }
            if let Some(arguments) = function
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            {
                chunks.push(ModelChunk::ToolCallDelta {
                    index,
                    arguments: arguments.to_string(),
                });
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
        let stop = match reason {
            "tool_calls" | "function_call" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        chunks.push(ModelChunk::Finish(stop));
    }

    chunks
}
