use crate::agent::message::Message;
use crate::models::StopReason;

/// Raw events produced while an agent runs one turn.
///
/// `UserMessageStored` comes first, once the turn's user message is
/// persisted. `MessageCompleted` always precedes the `MessageStopped` of the same model
/// cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    UserMessageStored,
    TextFragment(String),
    ToolUseStarted { name: String },
    MessageCompleted(Message),
    MessageStopped { stop_reason: StopReason },
}
