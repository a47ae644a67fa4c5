//! Per-session agent: conversation state, bound model, and the tool-calling loop.

use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::models::{ModelChunk, ModelClient, ModelError, ModelRequest, StopReason};
use crate::persistence::{SessionStore, StoreError};
use crate::tools::ToolRegistry;

pub mod events;
pub mod message;
pub mod prompts;
pub mod registry;

pub use events::AgentEvent;
use message::{ContentBlock, Message, ToolResultBlock, ToolUseBlock};

/// Model cycles allowed per turn before the loop gives up on tool calls.
pub const MAX_MODEL_CYCLES: usize = 8;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Conversation history with write-through persistence.
pub struct Conversation {
    session_id: String,
    messages: Vec<Message>,
    store: SessionStore,
    restored: bool,
}

pub type ConversationRef = Arc<Mutex<Conversation>>;

impl Conversation {
    pub fn new(session_id: impl Into<String>, store: SessionStore) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            store,
            restored: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Loads persisted history once per handle.
    async fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        match self.store.load_messages(&self.session_id).await {
            Ok(stored) => {
                self.messages = stored.into_iter().map(|m| m.message).collect();
                if !self.messages.is_empty() {
                    tracing::info!(
                        session_id = %self.session_id,
                        count = self.messages.len(),
                        "Restored conversation history"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to restore conversation history; starting empty"
                );
            }
        }
    }

    async fn push(&mut self, message: Message) -> Result<(), StoreError> {
        self.store.append_message(&self.session_id, &message).await?;
        self.messages.push(message);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ModelBinding {
    pub model_id: String,
    pub client: Arc<dyn ModelClient>,
}

/// Live agent for one session. The conversation reference never changes for
/// the lifetime of the handle; only the model binding does.
pub struct AgentHandle {
    session_id: String,
    conversation: ConversationRef,
    model: ModelBinding,
    tools: Arc<ToolRegistry>,
}

impl AgentHandle {
    pub fn new(
        session_id: impl Into<String>,
        store: SessionStore,
        model: ModelBinding,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            conversation: Arc::new(Mutex::new(Conversation::new(session_id.clone(), store))),
            session_id,
            model,
            tools,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model_id(&self) -> &str {
        &self.model.model_id
    }

    pub fn conversation(&self) -> ConversationRef {
        self.conversation.clone()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Replaces the model binding, keeping the conversation.
    pub(crate) fn bind_model(&mut self, model: ModelBinding) {
        self.model = model;
    }

    /// Runs one user turn to completion, reporting progress on `events`.
    ///
    /// Every message is persisted as soon as it is complete. A closed
    /// `events` receiver does not stop the turn; dropping the future does.
    pub async fn run_turn(
        &self,
        user_message: String,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        let mut conversation = self.conversation.lock().await;
        conversation.restore().await;
        conversation.push(Message::user_text(user_message)).await?;
        emit(&events, AgentEvent::UserMessageStored).await;

        let tool_specs = self.tools.specs();
        for cycle in 0..MAX_MODEL_CYCLES {
            let request = ModelRequest {
                system: prompts::SYSTEM_PROMPT.to_string(),
                messages: conversation.messages.clone(),
                tools: tool_specs.clone(),
            };

            tracing::debug!(
                session_id = %self.session_id,
                model = %self.model.model_id,
                cycle,
                messages = request.messages.len(),
                "Calling model"
            );
            let mut stream = self.model.client.stream(request).await?;

            let mut assembler = MessageAssembler::default();
            let mut reported_stop = None;
            while let Some(chunk) = stream.next().await {
                match chunk? {
                    ModelChunk::TextDelta(text) => {
                        assembler.push_text(&text);
                        emit(&events, AgentEvent::TextFragment(text)).await;
                    }
                    ModelChunk::ToolCallStart { index, id, name } => {
                        assembler.start_tool_call(index, id, name.clone());
                        emit(&events, AgentEvent::ToolUseStarted { name }).await;
                    }
                    ModelChunk::ToolCallDelta { index, arguments } => {
                        assembler.push_arguments(index, &arguments);
                    }
                    ModelChunk::Finish(reason) => reported_stop = Some(reason),
                }
            }
            drop(stream);

            let message = assembler.finish();
            let has_tool_calls = message.tool_uses().next().is_some();
            let stop_reason = if has_tool_calls {
                StopReason::ToolUse
            } else {
                match reported_stop {
                    Some(StopReason::ToolUse) | None => StopReason::EndTurn,
                    Some(reason) => reason,
                }
            };

            conversation.push(message.clone()).await?;
            emit(&events, AgentEvent::MessageCompleted(message.clone())).await;
            emit(&events, AgentEvent::MessageStopped { stop_reason }).await;

            if stop_reason != StopReason::ToolUse {
                return Ok(());
            }

            let mut results = Vec::new();
            for tool_use in message.tool_uses() {
                results.push(self.execute_tool(tool_use).await);
            }
            conversation.push(Message::tool_results(results)).await?;
        }

        tracing::warn!(
            session_id = %self.session_id,
            max_cycles = MAX_MODEL_CYCLES,
            "Model cycle limit reached; ending turn"
        );
        Ok(())
    }

    async fn execute_tool(&self, tool_use: &ToolUseBlock) -> ToolResultBlock {
        match self
            .tools
            .execute(&tool_use.name, tool_use.input.clone())
            .await
        {
            Ok(output) => {
                tracing::info!(
                    session_id = %self.session_id,
                    tool = %tool_use.name,
                    success = output.success,
                    "Tool executed"
                );
                ToolResultBlock::new(&tool_use.tool_use_id, output.success, output.content)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    tool = %tool_use.name,
                    error = %e,
                    "Tool failed"
                );
                ToolResultBlock::new(&tool_use.tool_use_id, false, e.message)
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    // The receiver only goes away when the turn is being torn down.
    let _ = events.send(event).await;
}

/// Accumulates streamed chunks into one assistant message.
#[derive(Default)]
struct MessageAssembler {
    text: String,
    tool_calls: BTreeMap<usize, PendingToolCall>,
}

struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl MessageAssembler {
    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn start_tool_call(&mut self, index: usize, id: String, name: String) {
        self.tool_calls.insert(
            index,
            PendingToolCall {
                id,
                name,
                arguments: String::new(),
            },
        );
    }

    fn push_arguments(&mut self, index: usize, arguments: &str) {
        match self.tool_calls.get_mut(&index) {
            Some(call) => call.arguments.push_str(arguments),
            None => tracing::debug!(index, "Arguments for unknown tool call index"),
        }
    }

    fn finish(self) -> Message {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text(self.text));
        }
        for call in self.tool_calls.into_values() {
            let input = if call.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                    tracing::warn!(tool = %call.name, error = %e, "Tool arguments are not valid JSON");
                    Value::String(call.arguments.clone())
                })
            };
            content.push(ContentBlock::ToolUse(ToolUseBlock {
                tool_use_id: call.id,
                name: call.name,
                input,
            }));
        }
        Message {
            role: message::Role::Assistant,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::ScriptedModelFactory;
    use crate::models::ModelFactory;
    use crate::tools::EDIT_ACTIONS_TOOL;
    use message::Role;

    fn handle(factory: &ScriptedModelFactory, dir: &tempfile::TempDir) -> AgentHandle {
        AgentHandle::new(
            "s1",
            SessionStore::new(dir.path()),
            ModelBinding {
                model_id: "m1".to_string(),
                client: factory.build("m1"),
            },
            Arc::new(ToolRegistry::new()),
        )
    }

    async fn run(handle: &AgentHandle, text: &str) -> (Result<(), AgentError>, Vec<AgentEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = handle.run_turn(text.to_string(), tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn test_text_only_turn() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedModelFactory::new();
        factory.push(vec![
            ModelChunk::TextDelta("Hello".to_string()),
            ModelChunk::Finish(StopReason::EndTurn),
        ]);
        let agent = handle(&factory, &dir);

        let (result, events) = run(&agent, "hi").await;
        assert!(result.is_ok());
        assert_eq!(events[0], AgentEvent::UserMessageStored);
        assert_eq!(events[1], AgentEvent::TextFragment("Hello".to_string()));
        assert!(matches!(events[2], AgentEvent::MessageCompleted(_)));
        assert_eq!(
            events[3],
            AgentEvent::MessageStopped {
                stop_reason: StopReason::EndTurn
            }
        );

        let conversation = agent.conversation();
        let conversation = conversation.lock().await;
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_tool_cycle_runs_tool_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedModelFactory::new();
        factory.push(vec![
            ModelChunk::ToolCallStart {
                index: 0,
                id: "call_1".to_string(),
                name: EDIT_ACTIONS_TOOL.to_string(),
            },
            ModelChunk::ToolCallDelta {
                index: 0,
                arguments: "{\"actions\": \"[]\"}".to_string(),
            },
            ModelChunk::Finish(StopReason::ToolUse),
        ]);
        factory.push(vec![ModelChunk::Finish(StopReason::EndTurn)]);
        let agent = handle(&factory, &dir);

        let (result, events) = run(&agent, "edit").await;
        assert!(result.is_ok());
        let stops: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::MessageStopped { stop_reason } => Some(*stop_reason),
                _ => None,
            })
            .collect();
        assert_eq!(stops, vec![StopReason::ToolUse, StopReason::EndTurn]);

        let conversation = agent.conversation();
        let conversation = conversation.lock().await;
        // user, assistant(tool use), tool result, assistant
        assert_eq!(conversation.messages().len(), 4);
        assert!(conversation.messages()[2].has_tool_results());

        let requests = factory.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].1.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_history_restored_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedModelFactory::new();
        factory.push(vec![
            ModelChunk::TextDelta("first".to_string()),
            ModelChunk::Finish(StopReason::EndTurn),
        ]);
        let (result, _) = run(&handle(&factory, &dir), "one").await;
        assert!(result.is_ok());

        let fresh = handle(&factory, &dir);
        let (result, _) = run(&fresh, "two").await;
        assert!(result.is_ok());

        let requests = factory.requests();
        let last = &requests.last().unwrap().1;
        assert_eq!(last.messages.len(), 3);
        assert_eq!(last.messages[0].text(), "one");
        assert_eq!(last.messages[2].text(), "two");
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedModelFactory::new();
        factory.push_script(vec![
            Ok(ModelChunk::TextDelta("partial".to_string())),
            Err(ModelError::Stream("reset".to_string())),
        ]);
        let agent = handle(&factory, &dir);

        let (result, events) = run(&agent, "hi").await;
        assert!(matches!(result, Err(AgentError::Model(_))));
        assert_eq!(
            events,
            vec![
                AgentEvent::UserMessageStored,
                AgentEvent::TextFragment("partial".to_string())
            ]
        );
    }

    #[test]
    fn test_assembler_keeps_unparseable_arguments() {
        let mut assembler = MessageAssembler::default();
        assembler.push_text("ok");
        assembler.start_tool_call(0, "c".to_string(), "t".to_string());
        assembler.push_arguments(0, "{broken");
        let message = assembler.finish();
        let tool_use = message.tool_uses().next().unwrap();
        assert_eq!(tool_use.input, Value::String("{broken".to_string()));
        assert_eq!(message.text(), "ok");
    }
}
