//! File-backed session storage.
//!
//! Layout under the sessions root:
//!
//! ```text
//! session_<id>/session.json
//! session_<id>/agents/agent_default/agent.json
//! session_<id>/agents/agent_default/messages/message_<n>.json
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::SessionSummary;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::agent::message::Message;

const AGENT_ID: &str = "default";
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Session ids become directory names; anything outside `[A-Za-z0-9._-]` is rejected.
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id != "."
        && session_id != ".."
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(session_id.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    session_id: String,
    session_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentRecord {
    agent_id: String,
    #[serde(default)]
    state: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: Message,
    pub message_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("session_{session_id}"))
    }

    fn agent_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id)
            .join("agents")
            .join(format!("agent_{AGENT_ID}"))
    }

    fn messages_dir(&self, session_id: &str) -> PathBuf {
        self.agent_dir(session_id).join("messages")
    }

    /// Creates the session skeleton if it does not exist yet.
    pub async fn ensure_session(&self, session_id: &str) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        let messages_dir = self.messages_dir(session_id);
        tokio::fs::create_dir_all(&messages_dir)
            .await
            .map_err(io_err(&messages_dir))?;

        let now = Utc::now();
        let session_file = self.session_dir(session_id).join("session.json");
        if !tokio::fs::try_exists(&session_file).await.unwrap_or(false) {
            let record = SessionRecord {
                session_id: session_id.to_string(),
                session_type: "AGENT".to_string(),
                created_at: now,
                updated_at: now,
            };
            write_json(&session_file, &record).await?;
        }

        let agent_file = self.agent_dir(session_id).join("agent.json");
        if !tokio::fs::try_exists(&agent_file).await.unwrap_or(false) {
            let record = AgentRecord {
                agent_id: AGENT_ID.to_string(),
                state: serde_json::json!({}),
                created_at: now,
                updated_at: now,
            };
            write_json(&agent_file, &record).await?;
        }
        Ok(())
    }

    /// Appends a message and returns its id.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<u64, StoreError> {
        self.ensure_session(session_id).await?;
        let message_id = self.next_message_id(session_id).await?;
        let now = Utc::now();
        let stored = StoredMessage {
            message: message.clone(),
            message_id,
            created_at: now,
            updated_at: now,
        };
        let path = self
            .messages_dir(session_id)
            .join(format!("message_{message_id}.json"));
        write_json(&path, &stored).await?;
        Ok(message_id)
    }

    async fn next_message_id(&self, session_id: &str) -> Result<u64, StoreError> {
        let ids = self.message_ids(session_id).await?;
        Ok(ids.into_iter().max().map(|id| id + 1).unwrap_or(0))
    }

    async fn message_ids(&self, session_id: &str) -> Result<Vec<u64>, StoreError> {
        let dir = self.messages_dir(session_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix("message_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Messages in ascending `message_id` order. Unknown sessions yield an empty list.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        validate_session_id(session_id)?;
        let dir = self.messages_dir(session_id);
        let mut messages = Vec::new();
        for id in self.message_ids(session_id).await? {
            let path = dir.join(format!("message_{id}.json"));
            match read_json::<StoredMessage>(&path).await {
                Ok(stored) => messages.push(stored),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable message file"
                    );
                }
            }
        }
        messages.sort_by_key(|m| m.message_id);
        Ok(messages)
    }

    /// Sessions newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root)(e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.root))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("session_") {
                continue;
            }
            let path = entry.path().join("session.json");
            match read_json::<SessionRecord>(&path).await {
                Ok(record) => sessions.push(SessionSummary {
                    session_id: record.session_id,
                    created_at: record.created_at,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session");
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Removes the session directory. Returns false when it did not exist.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await.map_err(io_err(path))
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
    let bytes = tokio::fs::read(path).await.map_err(io_err(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}
