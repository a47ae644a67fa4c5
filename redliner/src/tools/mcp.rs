//! MCP stdio tool servers.
//!
//! `mcp.json` declares servers as `{"mcpServers": {"<name>": {command, args, env, enabled}}}`.
//! Loading never fails as a whole: a missing file, malformed JSON, or a bad
//! entry is logged and the remaining entries still load. Child processes are
//! spawned on first use and spoken to with newline-delimited JSON-RPC 2.0.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared_types::McpServerSummary;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::{Tool, ToolError, ToolOutput};

const PROTOCOL_VERSION: &str = "2024-11-05";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum McpConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed its output")]
    Closed,
    #[error("timed out waiting for '{0}'")]
    Timeout(String),
    #[error("server returned error for '{method}': {message}")]
    Rpc { method: String, message: String },
    #[error("invalid response for '{0}'")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerEntry {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub enabled: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Raw config document, or `None` when the file does not exist.
pub async fn read_config(path: &Path) -> Result<Option<Value>, McpConfigError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(McpConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| McpConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn server_map(config: &Value) -> Option<&Map<String, Value>> {
    config.get("mcpServers").and_then(|v| v.as_object())
}

/// Listing for the config endpoint; reports entries as written, valid or not.
pub fn summarize(config: &Value) -> Vec<McpServerSummary> {
    let Some(servers) = server_map(config) else {
        return Vec::new();
    };
    servers
        .iter()
        .map(|(name, raw)| McpServerSummary {
            name: name.clone(),
            command: raw
                .get("command")
                .and_then(|v| v.as_str())
                .map(ToString::to_string),
            args: raw
                .get("args")
                .and_then(|v| v.as_array())
                .map(|args| {
                    args.iter()
                        .filter_map(|a| a.as_str().map(ToString::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            has_env: raw
                .get("env")
                .and_then(|v| v.as_object())
                .is_some_and(|env| !env.is_empty()),
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
        })
        .collect()
}

pub fn parse_entry(name: &str, raw: &Value) -> Result<McpServerEntry, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| "entry must be a JSON object".to_string())?;

    let command = match obj.get("command") {
        None => return Err("missing 'command'".to_string()),
        Some(Value::String(c)) if c.trim().is_empty() => return Err("'command' is empty".to_string()),
        Some(Value::String(c)) => c.clone(),
        Some(_) => return Err("'command' must be a string".to_string()),
    };

    let args = match obj.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|a| {
                a.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| "'args' must contain only strings".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err("'args' must be an array".to_string()),
    };

    let env = match obj.get("env") {
        None | Some(Value::Null) => HashMap::new(),
        Some(Value::Object(vars)) => vars
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|v| (k.clone(), v.to_string()))
                    .ok_or_else(|| format!("env var '{k}' must be a string"))
            })
            .collect::<Result<HashMap<_, _>, _>>()?,
        Some(_) => return Err("'env' must be an object".to_string()),
    };

    let enabled = match obj.get("enabled") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err("'enabled' must be a boolean".to_string()),
    };

    Ok(McpServerEntry {
        name: name.to_string(),
        command,
        args,
        env,
        enabled,
    })
}

/// Builds a handle for every enabled, well-formed entry in `path`.
pub async fn load_tool_servers(path: &Path) -> Vec<Arc<McpServer>> {
    tracing::info!(path = %path.display(), "Loading MCP servers");

    let config = match read_config(path).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::warn!(path = %path.display(), "No MCP config found; skipping MCP servers");
            return Vec::new();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load MCP config");
            return Vec::new();
        }
    };

    let Some(entries) = server_map(&config).filter(|m| !m.is_empty()) else {
        tracing::info!("No MCP servers configured");
        return Vec::new();
    };
    tracing::info!(count = entries.len(), "Found MCP server entries");

    let mut servers = Vec::new();
    for (name, raw) in entries {
        if raw.get("enabled").and_then(|v| v.as_bool()) == Some(false) {
            tracing::info!(server = %name, "Skipping disabled MCP server");
            continue;
        }
        match parse_entry(name, raw) {
            Ok(entry) => {
                tracing::info!(server = %name, command = %entry.command, "Loaded MCP server");
                servers.push(Arc::new(McpServer::new(entry)));
            }
            Err(reason) => {
                tracing::error!(server = %name, reason = %reason, "Failed to load MCP server");
            }
        }
    }

    tracing::info!(count = servers.len(), "MCP servers loaded");
    servers
}

/// Runs discovery on every server; a server that fails is logged and skipped.
pub async fn discover_tools(servers: &[Arc<McpServer>]) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for server in servers {
        match server.list_tools().await {
            Ok(infos) => {
                tracing::info!(server = %server.name(), count = infos.len(), "Discovered MCP tools");
                for info in infos {
                    tools.push(Arc::new(McpTool {
                        server: server.clone(),
                        info,
                    }));
                }
            }
            Err(e) => {
                tracing::error!(server = %server.name(), error = %e, "MCP tool discovery failed");
            }
        }
    }
    tools
}

// ============================================================================
// Server Connection
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub struct McpServer {
    entry: McpServerEntry,
    connection: Mutex<Option<McpConnection>>,
}

struct McpConnection {
    // Held so the child is killed when the connection drops.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl McpConnection {
    async fn spawn(entry: &McpServerEntry) -> Result<Self, McpError> {
        let mut child = Command::new(&entry.command)
            .args(&entry.args)
            .envs(&entry.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: entry.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(McpError::Closed)?;
        let stdout = child.stdout.take().ok_or(McpError::Closed)?;

        let mut connection = Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
        };

        connection
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "redliner", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await?;
        connection
            .notify("notifications/initialized", json!({}))
            .await?;
        Ok(connection)
    }

    async fn write_message(&mut self, message: &Value) -> Result<(), McpError> {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_message(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        self.write_message(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;

        tokio::time::timeout(REQUEST_TIMEOUT, self.read_response(id, method))
            .await
            .map_err(|_| McpError::Timeout(method.to_string()))?
    }

    async fn read_response(&mut self, id: u64, method: &str) -> Result<Value, McpError> {
        loop {
            let line = self.stdout.next_line().await?.ok_or(McpError::Closed)?;
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                tracing::debug!(line = %line, "Ignoring non-JSON MCP output");
                continue;
            };
            // Notifications and server-initiated requests are not ours.
            if message.get("id").and_then(|v| v.as_u64()) != Some(id)
                || message.get("method").is_some()
            {
                continue;
            }
            if let Some(error) = message.get("error") {
                return Err(McpError::Rpc {
                    method: method.to_string(),
                    message: error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

impl McpServer {
    pub fn new(entry: McpServerEntry) -> Self {
        Self {
            entry,
            connection: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn entry(&self) -> &McpServerEntry {
        &self.entry
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(McpConnection::spawn(&self.entry).await?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(McpError::Closed);
        };

        let result = connection.request(method, params).await;
        if result.is_err() {
            // Respawn on next use.
            *guard = None;
        }
        result
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .ok_or_else(|| McpError::InvalidResponse("tools/list".to_string()))?;

        Ok(tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name")?.as_str()?.to_string();
                Some(McpToolInfo {
                    name,
                    description: tool
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                })
            })
            .collect())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, McpError> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        let content = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(ToolOutput {
            success: !is_error,
            content,
        })
    }
}

/// One tool advertised by an MCP server
pub struct McpTool {
    server: Arc<McpServer>,
    info: McpToolInfo,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        self.server
            .call_tool(&self.info.name, args)
            .await
            .map_err(|e| ToolError::new(format!("{}: {e}", self.server.name())))
    }
}
