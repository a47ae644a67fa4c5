//! Offline models.
//!
//! [`MockModelFactory`] backs `MOCK=1`: it narrates, proposes one highlight on
//! `p0`, and ends the turn once the tool result comes back.
//! [`ScriptedModelFactory`] replays queued chunk scripts and records every
//! request it receives.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use super::{
    ModelChunk, ModelClient, ModelError, ModelFactory, ModelRequest, ModelStream, StopReason,
};
use crate::agent::message::Role;
use crate::tools::EDIT_ACTIONS_TOOL;

#[derive(Debug, Clone, Default)]
pub struct MockModelFactory;

impl ModelFactory for MockModelFactory {
    fn build(&self, model_id: &str) -> Arc<dyn ModelClient> {
        Arc::new(MockModel {
            model_id: model_id.to_string(),
        })
    }
}

pub struct MockModel {
    model_id: String,
}

impl MockModel {
    fn script(&self, request: &ModelRequest) -> Vec<ModelChunk> {
        let answering_tool = request
            .messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.has_tool_results());
        if answering_tool {
            return vec![ModelChunk::Finish(StopReason::EndTurn)];
        }

        let actions = json!([{
            "task": "Highlight opening paragraph",
            "action": "highlight",
            "loc": "p0",
        }]);
        let arguments = json!({ "actions": actions.to_string() }).to_string();

        vec![
            ModelChunk::TextDelta("[MOCK] ".to_string()),
            ModelChunk::TextDelta(format!("Responding with {}. ", self.model_id)),
            ModelChunk::TextDelta("I'll highlight the opening paragraph.".to_string()),
            ModelChunk::ToolCallStart {
                index: 0,
                id: format!("mock_{}", uuid::Uuid::new_v4().simple()),
                name: EDIT_ACTIONS_TOOL.to_string(),
            },
            ModelChunk::ToolCallDelta {
                index: 0,
                arguments,
            },
            ModelChunk::Finish(StopReason::ToolUse),
        ]
    }
}

#[async_trait]
impl ModelClient for MockModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let chunks = self.script(&request).into_iter().map(Ok);
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Chunks for one scripted model call.
pub type Script = Vec<Result<ModelChunk, ModelError>>;

struct ScriptedCall {
    script: Script,
    gate: Option<oneshot::Receiver<()>>,
    hang: bool,
}

#[derive(Default)]
struct ScriptState {
    calls: VecDeque<ScriptedCall>,
    requests: Vec<(String, ModelRequest)>,
    built: Vec<String>,
}

/// Shared queue of scripts; every client it builds draws from the same queue.
#[derive(Clone, Default)]
pub struct ScriptedModelFactory {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedModelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, call: ScriptedCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push_back(call);
        }
    }

    pub fn push(&self, chunks: Vec<ModelChunk>) {
        self.push_script(chunks.into_iter().map(Ok).collect());
    }

    pub fn push_script(&self, script: Script) {
        self.enqueue(ScriptedCall {
            script,
            gate: None,
            hang: false,
        });
    }

    /// The call is recorded at once but streams only after the returned
    /// sender fires or is dropped.
    pub fn push_gated(&self, chunks: Vec<ModelChunk>) -> oneshot::Sender<()> {
        let (open, gate) = oneshot::channel();
        self.enqueue(ScriptedCall {
            script: chunks.into_iter().map(Ok).collect(),
            gate: Some(gate),
            hang: false,
        });
        open
    }

    /// Streams `chunks` and then never finishes.
    pub fn push_hanging(&self, chunks: Vec<ModelChunk>) {
        self.enqueue(ScriptedCall {
            script: chunks.into_iter().map(Ok).collect(),
            gate: None,
            hang: true,
        });
    }

    /// `(model_id, request)` for every call made so far.
    pub fn requests(&self) -> Vec<(String, ModelRequest)> {
        self.state
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    /// Model ids passed to [`ModelFactory::build`], in order.
    pub fn built_models(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.built.clone())
            .unwrap_or_default()
    }
}

impl ModelFactory for ScriptedModelFactory {
    fn build(&self, model_id: &str) -> Arc<dyn ModelClient> {
        if let Ok(mut state) = self.state.lock() {
            state.built.push(model_id.to_string());
        }
        Arc::new(ScriptedModel {
            model_id: model_id.to_string(),
            state: self.state.clone(),
        })
    }
}

struct ScriptedModel {
    model_id: String,
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let call = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| ModelError::Request("script state poisoned".to_string()))?;
            state.requests.push((self.model_id.clone(), request));
            state.calls.pop_front()
        };
        // An exhausted queue ends the turn quietly.
        let Some(call) = call else {
            return Ok(Box::pin(stream::iter(vec![Ok(ModelChunk::Finish(
                StopReason::EndTurn,
            ))])));
        };

        if let Some(gate) = call.gate {
            let _ = gate.await;
        }
        let chunks = stream::iter(call.script);
        if call.hang {
            Ok(Box::pin(chunks.chain(stream::pending())))
        } else {
            Ok(Box::pin(chunks))
        }
    }
}
