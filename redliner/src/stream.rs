//! Stream translator - raw agent events to the four client wire events.
//!
//! Narration is batched ([`TEXT_BATCH_SIZE`] fragments per `content` event),
//! stripped of `<thinking>` spans and decoded from placeholders. Edit batches
//! are forwarded whole. Every turn ends with exactly one `end_turn`.

use shared_types::{EditAction, TurnRequest, WireEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::message::Role;
use crate::agent::{prompts, AgentEvent};
use crate::app_state::AppState;
use crate::models::StopReason;
use crate::placeholders;
use crate::tools::{parse_edit_actions, ParseOutcome, EDIT_ACTIONS_TOOL};

pub const TEXT_BATCH_SIZE: usize = 3;
pub const BLANK_TEXT_SENTINEL: &str = "[blank text]";

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";

/// Removes the first `<thinking>...</thinking>` span. Unclosed tags pass through.
pub fn strip_thinking(text: &str) -> String {
    let Some(start) = text.find(THINKING_OPEN) else {
        return text.to_string();
    };
    let Some(close) = text[start..].find(THINKING_CLOSE) else {
        return text.to_string();
    };
    let end = start + close + THINKING_CLOSE.len();
    format!("{}{}", &text[..start], &text[end..])
}

/// Per-turn counters, logged when the turn ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub content_events: usize,
    pub tool_badges: usize,
    pub edit_batches: usize,
    pub edit_actions: usize,
    pub malformed_batches: usize,
}

#[derive(Debug, Default)]
pub struct StreamTranslator {
    buffer: Vec<String>,
    finished: bool,
    summary: TurnSummary,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn summary(&self) -> &TurnSummary {
        &self.summary
    }

    pub fn translate(&mut self, event: AgentEvent) -> Vec<WireEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        match event {
            AgentEvent::UserMessageStored => {}
            AgentEvent::TextFragment(fragment) => {
                let text = placeholders::decode(&strip_thinking(&fragment));
                if text.is_empty() || text.trim() == BLANK_TEXT_SENTINEL {
                    return out;
                }
                self.buffer.push(text);
                if self.buffer.len() >= TEXT_BATCH_SIZE {
                    self.flush(&mut out);
                }
            }
            AgentEvent::ToolUseStarted { name } => {
                if name.is_empty() {
                    return out;
                }
                self.flush(&mut out);
                self.summary.tool_badges += 1;
                out.push(WireEvent::ToolUse {
                    tool_name: name,
                    input: None,
                });
            }
            AgentEvent::MessageStopped { stop_reason } => {
                if stop_reason == StopReason::EndTurn {
                    self.end_turn(&mut out);
                }
            }
            AgentEvent::MessageCompleted(message) => {
                self.flush(&mut out);
                if message.role != Role::Assistant {
                    return out;
                }
                for tool_use in message.tool_uses() {
                    if tool_use.name == EDIT_ACTIONS_TOOL {
                        self.edit_batch(&tool_use.input, &mut out);
                    } else {
                        self.summary.tool_badges += 1;
                        out.push(WireEvent::ToolUse {
                            tool_name: tool_use.name.clone(),
                            input: Some(tool_use.input.clone()),
                        });
                    }
                }
            }
        }
        out
    }

    /// Closes the turn if the agent never reported an end-of-turn stop.
    pub fn finish(&mut self) -> Vec<WireEvent> {
        let mut out = Vec::new();
        if !self.finished {
            self.end_turn(&mut out);
        }
        out
    }

    fn flush(&mut self, out: &mut Vec<WireEvent>) {
        if self.buffer.is_empty() {
            return;
        }
        let data = self.buffer.concat();
        self.buffer.clear();
        self.summary.content_events += 1;
        out.push(WireEvent::Content { data });
    }

    fn end_turn(&mut self, out: &mut Vec<WireEvent>) {
        self.flush(out);
        out.push(WireEvent::EndTurn);
        self.finished = true;
    }

    fn edit_batch(&mut self, input: &serde_json::Value, out: &mut Vec<WireEvent>) {
        match parse_edit_actions(input) {
            ParseOutcome::Parsed(mut actions) => {
                for action in &mut actions {
                    if let Some(text) = action.new_text.as_mut() {
                        *text = placeholders::decode(text);
                    }
                    if let Some(within) = action.within_para.as_mut() {
                        within.find = placeholders::decode(&within.find);
                    }
                }
                audit_batch(&actions);
                self.summary.edit_batches += 1;
                self.summary.edit_actions += actions.len();
                out.push(WireEvent::EditActions { actions });
            }
            ParseOutcome::Malformed(reason) => {
                self.summary.malformed_batches += 1;
                tracing::warn!(reason = %reason, "Dropping malformed edit batch");
            }
        }
    }
}

/// Logs batches that break the addressing contract. The batch is still forwarded.
fn audit_batch(actions: &[EditAction]) {
    let mut seen = HashSet::new();
    for action in actions {
        match action.location() {
            Ok(location) if !action.action.accepts(&location) => {
                tracing::warn!(
                    loc = %action.loc,
                    action = ?action.action,
                    "Edit action does not accept this location"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(loc = %action.loc, error = %e, "Edit action has an unparseable location");
            }
        }
        if !seen.insert(action.target_key()) {
            tracing::warn!(loc = %action.loc, "Edit batch targets the same location twice");
        }
    }
}

// ============================================================================
// Turn Driver
// ============================================================================

/// Runs one turn in the background and returns its wire events as they are produced.
pub fn stream_turn(
    state: Arc<AppState>,
    session_id: String,
    request: TurnRequest,
) -> ReceiverStream<WireEvent> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(drive_turn(state, session_id, request, tx));
    ReceiverStream::new(rx)
}

async fn drive_turn(
    state: Arc<AppState>,
    session_id: String,
    request: TurnRequest,
    out: mpsc::Sender<WireEvent>,
) {
    let resolved = state.catalog().resolve(request.model.as_deref()).await;
    tracing::info!(
        session_id = %session_id,
        model = %resolved.model_id,
        model_source = resolved.source.as_str(),
        prompt_len = request.prompt.len(),
        document_len = request.word_document.len(),
        "Starting turn"
    );

    let lease = tokio::select! {
        lease = state.registry().resolve(&session_id, &resolved.model_id) => lease,
        _ = out.closed() => {
            tracing::info!(session_id = %session_id, "Client left while waiting for session");
            return;
        }
    };

    let fingerprints = state.fingerprints();
    let current_hash = request.document_hash.as_deref();
    let send_full = fingerprints.should_send_full_document(&session_id, current_hash);
    if send_full {
        tracing::info!(session_id = %session_id, "Document changed or first message; sending full document");
    } else {
        tracing::info!(session_id = %session_id, "Document unchanged; skipping document content");
    }

    let user_message = prompts::compose_user_message(&request, send_full);
    let mut translator = StreamTranslator::new();
    let (agent_tx, mut agent_rx) = mpsc::channel::<AgentEvent>(64);
    let turn = lease.run_turn(user_message, agent_tx);
    tokio::pin!(turn);
    let mut turn_done = false;

    loop {
        tokio::select! {
            biased;
            _ = out.closed() => {
                tracing::info!(session_id = %session_id, "Client disconnected; abandoning turn");
                return;
            }
            event = agent_rx.recv() => match event {
                // The hash may only describe a document that is in history.
                Some(AgentEvent::UserMessageStored) => {
                    fingerprints.record_hash(&session_id, current_hash);
                }
                Some(event) => {
                    for wire in translator.translate(event) {
                        if out.send(wire).await.is_err() {
                            return;
                        }
                    }
                }
                None => break,
            },
            result = &mut turn, if !turn_done => {
                turn_done = true;
                if let Err(e) = result {
                    tracing::warn!(session_id = %session_id, error = %e, "Agent turn failed");
                }
            }
        }
    }

    for wire in translator.finish() {
        if out.send(wire).await.is_err() {
            return;
        }
    }

    let summary = translator.summary();
    tracing::info!(
        session_id = %session_id,
        content_events = summary.content_events,
        tool_badges = summary.tool_badges,
        edit_batches = summary.edit_batches,
        edit_actions = summary.edit_actions,
        malformed_batches = summary.malformed_batches,
        "Turn complete"
    );
}
