//! Model allow-list and resolution.
//!
//! The proxy's `/model/info` is authoritative when reachable; otherwise the
//! configured fallback list is used. Unknown request models resolve to the
//! default with a warning.

use serde_json::Value;
use shared_types::ModelOption;
use std::time::Duration;

use crate::config::Config;

const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelResolutionSource {
    Request,
    Default,
    Fallback,
}

impl ModelResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Default => "default",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub model_id: String,
    pub source: ModelResolutionSource,
}

#[derive(Clone)]
pub struct ModelCatalog {
    http: reqwest::Client,
    proxy_url: Option<String>,
    api_key: Option<String>,
    default_model: String,
    fallback_models: Vec<String>,
}

impl ModelCatalog {
    pub fn new(
        proxy_url: Option<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        fallback_models: Vec<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            proxy_url,
            api_key,
            default_model: default_model.into(),
            fallback_models,
        }
    }

    /// Catalog for `config`. Mock mode never consults the proxy.
    pub fn from_config(config: &Config) -> Self {
        let proxy_url = if config.mock {
            None
        } else {
            config.proxy_url.clone()
        };
        Self::new(
            proxy_url,
            config.proxy_api_key.clone(),
            config.default_model_id.clone(),
            config.fallback_models.clone(),
        )
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn fetch_model_info(&self) -> Option<Vec<Value>> {
        let base = self.proxy_url.as_ref()?;
        let mut request = self
            .http
            .get(format!("{base}/model/info"))
            .timeout(CATALOG_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let result = async {
            let response = request.send().await?.error_for_status()?;
            response.json::<Value>().await
        }
        .await;

        match result {
            Ok(body) => {
                let entries = body
                    .get("data")
                    .and_then(|d| d.as_array())
                    .cloned()
                    .unwrap_or_default();
                tracing::info!(count = entries.len(), "Fetched model catalog from proxy");
                Some(entries)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch models from proxy; using fallback list");
                None
            }
        }
    }

    /// Model ids accepted on `/invoke`.
    pub async fn allowed_models(&self) -> Vec<String> {
        match self.fetch_model_info().await {
            Some(entries) => {
                let mut ids = Vec::new();
                for entry in &entries {
                    for id in [proxy_model_id(entry), proxy_model_name(entry)]
                        .into_iter()
                        .flatten()
                    {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                ids
            }
            None => self.fallback_models.clone(),
        }
    }

    /// Picker entries for the client.
    pub async fn list_models(&self) -> Vec<ModelOption> {
        match self.fetch_model_info().await {
            Some(entries) => entries
                .iter()
                .filter_map(|entry| proxy_model_id(entry).or_else(|| proxy_model_name(entry)))
                .map(|id| ModelOption {
                    label: id.clone(),
                    id,
                })
                .collect(),
            None => self
                .fallback_models
                .iter()
                .map(|id| ModelOption {
                    id: id.clone(),
                    label: fallback_label(id),
                })
                .collect(),
        }
    }

    pub async fn resolve(&self, requested: Option<&str>) -> ResolvedModel {
        let Some(requested) = requested.map(str::trim).filter(|m| !m.is_empty()) else {
            return ResolvedModel {
                model_id: self.default_model.clone(),
                source: ModelResolutionSource::Default,
            };
        };

        if requested == self.default_model {
            return ResolvedModel {
                model_id: requested.to_string(),
                source: ModelResolutionSource::Request,
            };
        }

        let allowed = self.allowed_models().await;
        if allowed.iter().any(|id| id == requested) {
            ResolvedModel {
                model_id: requested.to_string(),
                source: ModelResolutionSource::Request,
            }
        } else {
            tracing::warn!(
                requested = %requested,
                fallback = %self.default_model,
                "Invalid model id; falling back to default"
            );
            ResolvedModel {
                model_id: self.default_model.clone(),
                source: ModelResolutionSource::Fallback,
            }
        }
    }
}

fn proxy_model_id(entry: &Value) -> Option<String> {
    entry
        .get("litellm_params")
        .and_then(|p| p.get("model"))
        .and_then(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn proxy_model_name(entry: &Value) -> Option<String> {
    entry
        .get("model_name")
        .and_then(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// `anthropic/claude-sonnet-4-5` -> `Claude Sonnet 4.5`
fn fallback_label(model_id: &str) -> String {
    let name = model_id.rsplit('/').next().unwrap_or(model_id);
    let mut words: Vec<String> = Vec::new();
    let mut version: Vec<&str> = Vec::new();
    for part in name.split('-') {
        if part.chars().all(|c| c.is_ascii_digit()) {
            version.push(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                words.push(first.to_uppercase().chain(chars).collect());
            }
        }
    }
    if !version.is_empty() {
        words.push(version.join("."));
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MODEL_ID;

    fn offline_catalog() -> ModelCatalog {
        ModelCatalog::new(
            None,
            None,
            DEFAULT_MODEL_ID,
            vec![
                "anthropic/claude-haiku-4-5".to_string(),
                "anthropic/claude-sonnet-4-5".to_string(),
            ],
        )
    }

    #[tokio::test]
    async fn test_resolve_known_model() {
        let resolved = offline_catalog()
            .resolve(Some("anthropic/claude-sonnet-4-5"))
            .await;
        assert_eq!(resolved.model_id, "anthropic/claude-sonnet-4-5");
        assert_eq!(resolved.source, ModelResolutionSource::Request);
    }

    #[tokio::test]
    async fn test_resolve_unknown_model_falls_back() {
        let resolved = offline_catalog().resolve(Some("gpt-nonexistent")).await;
        assert_eq!(resolved.model_id, DEFAULT_MODEL_ID);
        assert_eq!(resolved.source, ModelResolutionSource::Fallback);
    }

    #[tokio::test]
    async fn test_resolve_missing_model_uses_default() {
        let resolved = offline_catalog().resolve(None).await;
        assert_eq!(resolved.source, ModelResolutionSource::Default);
        assert_eq!(resolved.source.as_str(), "default");
    }

    #[tokio::test]
    async fn test_fallback_listing_has_labels() {
        let models = offline_catalog().list_models().await;
        assert_eq!(models[0].label, "Claude Haiku 4.5");
        assert_eq!(models[1].id, "anthropic/claude-sonnet-4-5");
    }

    #[test]
    fn test_proxy_entry_ids() {
        let entry = serde_json::json!({
            "model_name": "haiku",
            "litellm_params": {"model": "anthropic/claude-haiku-4-5"}
        });
        assert_eq!(
            proxy_model_id(&entry).as_deref(),
            Some("anthropic/claude-haiku-4-5")
        );
        assert_eq!(proxy_model_name(&entry).as_deref(), Some("haiku"));
    }

    #[test]
    fn test_fallback_label() {
        assert_eq!(fallback_label("anthropic/claude-opus-4-5"), "Claude Opus 4.5");
        assert_eq!(fallback_label("gpt-4o"), "Gpt 4o");
    }
}
