//! Shared types between the redliner backend and the document editor client
//!
//! These types describe:
//! - The turn request the editor posts to `/invoke`
//! - The four-tag wire protocol streamed back as server-sent events
//! - The edit command schema the editor applies to the document
//!
//! Serializable with serde for JSON over HTTP/SSE; exported to TypeScript with ts-rs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// Header carrying the session key.
pub const SESSION_HEADER: &str = "x-session-id";

/// Session key used when the client omits [`SESSION_HEADER`].
pub const DEFAULT_SESSION_ID: &str = "default";

// ============================================================================
// Turn Request
// ============================================================================

/// Body of `POST /invoke`
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct TurnRequest {
    #[serde(default)]
    pub prompt: String,

    /// Full document content, addressed per the location grammar
    #[serde(default)]
    pub word_document: String,

    #[serde(default)]
    #[ts(optional)]
    pub highlighted: Option<String>,

    /// Requested model id; unknown ids fall back to the server default
    #[serde(default)]
    #[ts(optional)]
    pub model: Option<String>,

    /// Opaque fingerprint of `word_document`
    #[serde(default)]
    #[ts(optional)]
    pub document_hash: Option<String>,
}

// ============================================================================
// Wire Protocol
// ============================================================================

/// One server-sent event of a turn.
///
/// Every turn ends with exactly one `EndTurn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Batched assistant narration
    Content { data: String },

    /// Tool badge; `input` is present once the call is fully materialized
    ToolUse {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[ts(optional, type = "unknown")]
        input: Option<serde_json::Value>,
    },

    /// The complete edit batch of one tool invocation
    EditActions { actions: Vec<EditAction> },

    EndTurn,
}

impl WireEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WireEvent::Content { .. } => "content",
            WireEvent::ToolUse { .. } => "tool_use",
            WireEvent::EditActions { .. } => "edit_actions",
            WireEvent::EndTurn => "end_turn",
        }
    }
}

// ============================================================================
// Edit Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Replace,
    Append,
    Prepend,
    Delete,
    Highlight,
    FormatBold,
    FormatItalic,
    Strikethrough,
    DeleteRow,
    InsertRow,
    CreateTable,
    DeleteTable,
}

impl ActionKind {
    /// Actions addressed by `t<T>.r<R>` rather than a paragraph.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            ActionKind::DeleteRow | ActionKind::InsertRow | ActionKind::DeleteTable
        )
    }

    /// Whether `location` is a valid target for this action.
    pub fn accepts(&self, location: &Location) -> bool {
        match (self, location) {
            (ActionKind::CreateTable, Location::Paragraph { .. }) => true,
            (ActionKind::CreateTable, _) => false,
            (kind, Location::TableRow { .. }) => kind.is_row_level(),
            (kind, _) => !kind.is_row_level(),
        }
    }
}

/// Selects the nth (zero-indexed) match of `find` inside the addressed paragraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct WithinPara {
    pub find: String,
    #[serde(default)]
    pub occurrence: u32,
}

/// A document mutation proposed by the assistant and applied by the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct EditAction {
    #[serde(default)]
    pub task: String,

    pub action: ActionKind,

    /// Location address; see [`Location`]
    pub loc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub new_text: Option<String>,

    #[serde(
        rename = "withinPara",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(optional)]
    pub within_para: Option<WithinPara>,

    #[serde(rename = "rowData", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub row_data: Option<Vec<Vec<String>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub comment: Option<String>,
}

impl EditAction {
    pub fn location(&self) -> Result<Location, LocationError> {
        self.loc.parse()
    }

    /// Key identifying the exact target of this action within a batch.
    pub fn target_key(&self) -> (String, Option<u32>) {
        (
            self.loc.clone(),
            self.within_para.as_ref().map(|w| w.occurrence),
        )
    }
}

// ============================================================================
// Location Grammar
// ============================================================================

/// Parsed `loc` value.
///
/// - `p<N>`: N-th paragraph by absolute document position
/// - `t<T>.r<R>.c<C>.p<P>`: P-th paragraph of the cell at row R, column C of table T
/// - `t<T>.r<R>`: a whole table row
///
/// A bare `t<T>` is never a valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Paragraph {
        index: u32,
    },
    TableCell {
        table: u32,
        row: u32,
        column: u32,
        paragraph: u32,
    },
    TableRow {
        table: u32,
        row: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    Empty,
    BareTable(String),
    Malformed(String),
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::Empty => write!(f, "empty location"),
            LocationError::BareTable(loc) => {
                write!(f, "bare table '{loc}' is not a valid target; address a row or cell")
            }
            LocationError::Malformed(loc) => write!(f, "malformed location '{loc}'"),
        }
    }
}

impl std::error::Error for LocationError {}

fn indexed(part: &str, prefix: char, whole: &str) -> Result<u32, LocationError> {
    part.strip_prefix(prefix)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| LocationError::Malformed(whole.to_string()))
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LocationError::Empty);
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        match parts.as_slice() {
            [p] if p.starts_with('p') => Ok(Location::Paragraph {
                index: indexed(p, 'p', trimmed)?,
            }),
            [t] if t.starts_with('t') => {
                indexed(t, 't', trimmed)?;
                Err(LocationError::BareTable(trimmed.to_string()))
            }
            [t, r] => Ok(Location::TableRow {
                table: indexed(t, 't', trimmed)?,
                row: indexed(r, 'r', trimmed)?,
            }),
            [t, r, c, p] => Ok(Location::TableCell {
                table: indexed(t, 't', trimmed)?,
                row: indexed(r, 'r', trimmed)?,
                column: indexed(c, 'c', trimmed)?,
                paragraph: indexed(p, 'p', trimmed)?,
            }),
            _ => Err(LocationError::Malformed(trimmed.to_string())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Paragraph { index } => write!(f, "p{index}"),
            Location::TableCell {
                table,
                row,
                column,
                paragraph,
            } => write!(f, "t{table}.r{row}.c{column}.p{paragraph}"),
            Location::TableRow { table, row } => write!(f, "t{table}.r{row}"),
        }
    }
}

// ============================================================================
// Sessions, Models, Tool Servers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of `DELETE /sessions/{id}`; a missing session is not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct DeleteSessionResponse {
    pub deleted: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct ModelOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct McpServerSummary {
    pub name: String,
    #[ts(optional)]
    pub command: Option<String>,
    pub args: Vec<String>,
    pub has_env: bool,
    pub enabled: bool,
}
