use std::sync::{Arc, RwLock};

use crate::agent::registry::SessionAgentRegistry;
use crate::config::{Config, DEFAULT_PROXY_URL};
use crate::fingerprint::DocumentFingerprintCache;
use crate::models::catalog::ModelCatalog;
use crate::models::litellm::LiteLlmModelFactory;
use crate::models::mock::MockModelFactory;
use crate::models::ModelFactory;
use crate::persistence::{SessionStore, StoreError};
use crate::tools::mcp::{self, McpServer};
use crate::tools::ToolRegistry;

/// Outcome of reloading MCP servers.
#[derive(Debug, Clone)]
pub struct ToolReload {
    pub servers: usize,
    pub tools: Vec<String>,
    pub evicted_sessions: usize,
}

pub struct AppState {
    config: Config,
    store: SessionStore,
    registry: SessionAgentRegistry,
    fingerprints: DocumentFingerprintCache,
    catalog: ModelCatalog,
    tool_servers: RwLock<Vec<Arc<McpServer>>>,
}

impl AppState {
    pub fn new(config: Config, factory: Arc<dyn ModelFactory>, tools: Arc<ToolRegistry>) -> Self {
        let store = SessionStore::new(config.sessions_dir.clone());
        Self {
            catalog: ModelCatalog::from_config(&config),
            registry: SessionAgentRegistry::new(factory, store.clone(), tools),
            fingerprints: DocumentFingerprintCache::new(),
            tool_servers: RwLock::new(Vec::new()),
            store,
            config,
        }
    }

    /// Production wiring: model factory per `MOCK`, MCP servers from disk.
    pub async fn bootstrap(config: Config) -> Self {
        let factory: Arc<dyn ModelFactory> = if config.mock {
            tracing::info!("MOCK mode enabled; using scripted mock model");
            Arc::new(MockModelFactory)
        } else {
            let base_url = config.proxy_url.clone().unwrap_or_else(|| {
                tracing::warn!(
                    default = DEFAULT_PROXY_URL,
                    "LITELLM_PROXY_URL is empty; model calls use the default proxy address"
                );
                DEFAULT_PROXY_URL.to_string()
            });
            Arc::new(LiteLlmModelFactory::new(
                base_url,
                config.proxy_api_key.clone(),
                config.max_tokens,
            ))
        };

        let servers = mcp::load_tool_servers(&config.mcp_config_path).await;
        let tools = Arc::new(ToolRegistry::with_servers(&servers).await);
        tracing::info!(tools = ?tools.available_tools(), "Tool registry ready");

        let state = Self::new(config, factory, tools);
        state.set_tool_servers(servers);
        state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn registry(&self) -> &SessionAgentRegistry {
        &self.registry
    }

    pub fn fingerprints(&self) -> &DocumentFingerprintCache {
        &self.fingerprints
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn set_tool_servers(&self, servers: Vec<Arc<McpServer>>) {
        match self.tool_servers.write() {
            Ok(mut guard) => *guard = servers,
            Err(poisoned) => *poisoned.into_inner() = servers,
        }
    }

    pub fn tool_server_count(&self) -> usize {
        match self.tool_servers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Re-reads the MCP config, rebuilds the tool registry and drops every
    /// cached agent so the next turn picks up the new tools. Waits for turns
    /// already running. History stays on disk.
    pub async fn reload_tools(&self) -> ToolReload {
        let servers = mcp::load_tool_servers(&self.config.mcp_config_path).await;
        let tools = Arc::new(ToolRegistry::with_servers(&servers).await);
        let tool_names = tools.available_tools();
        let server_count = servers.len();

        self.registry.set_tools(tools);
        // Old servers' children are killed once their last handle drops.
        self.set_tool_servers(servers);

        let evicted = self.registry.evict_all().await;
        self.fingerprints.clear();

        tracing::info!(
            servers = server_count,
            tools = ?tool_names,
            evicted_sessions = evicted.len(),
            "MCP servers reloaded"
        );
        ToolReload {
            servers: server_count,
            tools: tool_names,
            evicted_sessions: evicted.len(),
        }
    }

    /// Evicts the agent (after any in-flight turn), forgets the fingerprint and
    /// removes persisted history. False when nothing was stored.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        // Held until the files are gone so no turn can reload the old history.
        let eviction = self.registry.evict(session_id).await;
        self.fingerprints.forget(session_id);
        let deleted = self.store.delete_session(session_id).await;
        drop(eviction);
        deleted
    }
}
