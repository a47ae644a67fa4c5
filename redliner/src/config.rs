use std::path::PathBuf;

pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:4000";
pub const DEFAULT_MODEL_ID: &str = "anthropic/claude-haiku-4-5";
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "anthropic/claude-haiku-4-5",
    "anthropic/claude-sonnet-4-5",
    "anthropic/claude-opus-4-5",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the API listens on
    pub port: u16,
    /// Base URL of the LiteLLM proxy. `None` disables catalog lookups.
    pub proxy_url: Option<String>,
    /// Bearer token sent to the proxy
    pub proxy_api_key: Option<String>,
    /// Model used when a request omits or names an unknown model
    pub default_model_id: String,
    /// Allow-list used when the proxy catalog is unreachable
    pub fallback_models: Vec<String>,
    /// Completion budget per model call
    pub max_tokens: u32,
    /// Scripted mock model instead of the proxy
    pub mock: bool,
    /// Root directory for persisted sessions
    pub sessions_dir: PathBuf,
    /// MCP server declarations
    pub mcp_config_path: PathBuf,
    /// CORS origins
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let proxy_url = env_str("LITELLM_PROXY_URL", DEFAULT_PROXY_URL);
        let proxy_url = Some(proxy_url.trim_end_matches('/').to_string()).filter(|s| !s.is_empty());

        Ok(Self {
            port: env_parse("REDLINER_PORT", 8000)?,
            proxy_url,
            proxy_api_key: std::env::var("LITELLM_MASTER_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            default_model_id: env_str("DEFAULT_MODEL_ID", DEFAULT_MODEL_ID),
            fallback_models: env_csv("REDLINER_FALLBACK_MODELS", DEFAULT_FALLBACK_MODELS),
            max_tokens: env_parse("REDLINER_MAX_TOKENS", 8192)?,
            mock: env_flag("MOCK"),
            sessions_dir: PathBuf::from(env_str("REDLINER_SESSIONS_DIR", "sessions")),
            mcp_config_path: PathBuf::from(env_str("REDLINER_MCP_CONFIG", "config/mcp.json")),
            allowed_origins: env_csv("REDLINER_ALLOWED_ORIGINS", &["https://localhost:3000"]),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            proxy_url: Some(DEFAULT_PROXY_URL.to_string()),
            proxy_api_key: None,
            default_model_id: DEFAULT_MODEL_ID.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_tokens: 8192,
            mock: false,
            sessions_dir: PathBuf::from("sessions"),
            mcp_config_path: PathBuf::from("config/mcp.json"),
            allowed_origins: vec!["https://localhost:3000".to_string()],
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
