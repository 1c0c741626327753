//! Run configuration.
//!
//! An [`AnalysisConfig`] is built once (defaults, then an optional JSON
//! file, then environment variables, then CLI flags) and passed by
//! reference to every stage. Nothing reads process-wide settings after that.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregate::AggregationOptions;
use crate::insight::RetryPolicy;
use crate::loader::ColumnMapping;
use crate::preprocess::PreprocessOptions;

pub const DEFAULT_BASE_URL: &str = "https://router.huggingface.co/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.1-8B-Instruct";
pub const DEFAULT_MODEL_KEY: &str = "llama-3.1-8b";

/// Where the API key goes on each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiKeyPlacement {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// A provider-specific header, e.g. `api-key`.
    Header { name: String },
    /// A URL query parameter, e.g. `?key=`.
    QueryParam { name: String },
}

/// Settings for the chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_key_placement: ApiKeyPlacement,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_key_placement: ApiKeyPlacement::Bearer,
            max_tokens: 2000,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    fn preset(model: &str, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            ..Default::default()
        }
    }
}

/// Built-in model presets, keyed by the name used on the command line.
pub fn default_models() -> BTreeMap<String, ModelConfig> {
    [
        (DEFAULT_MODEL_KEY, ModelConfig::preset(DEFAULT_MODEL, 2000)),
        (
            "llama-3.1-70b",
            ModelConfig::preset("meta-llama/Llama-3.1-70B-Instruct", 2000),
        ),
        (
            "mistral-7b",
            ModelConfig::preset("mistralai/Mistral-7B-Instruct-v0.3", 1000),
        ),
    ]
    .into_iter()
    .map(|(key, model)| (key.to_string(), model))
    .collect()
}

/// Everything a pipeline run needs besides its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub model: ModelConfig,
    pub columns: ColumnMapping,
    pub preprocess: PreprocessOptions,
    pub retry: RetryPolicy,
    pub aggregation: AggregationOptions,
    /// Maximum number of provider calls in flight.
    pub concurrency: usize,
    /// Also grade each feedback text's quality with a second model call.
    pub evaluate_quality: bool,
    /// Named presets selectable with [`select_model`](Self::select_model).
    pub models: BTreeMap<String, ModelConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            columns: ColumnMapping::default(),
            preprocess: PreprocessOptions::default(),
            retry: RetryPolicy::default(),
            aggregation: AggregationOptions::default(),
            concurrency: 4,
            evaluate_quality: false,
            models: default_models(),
        }
    }
}

impl AnalysisConfig {
    /// Loads the config from a JSON file at `path`. Missing fields keep their defaults.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: AnalysisConfig = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file '{path}'"))?;
        Ok(config)
    }

    /// Replaces the model settings with the preset named `key`. An API key
    /// already configured is kept unless the preset carries its own.
    pub fn select_model(&mut self, key: &str) -> Result<()> {
        let Some(preset) = self.models.get(key).cloned() else {
            let available = self.models.keys().cloned().collect::<Vec<_>>().join(", ");
            anyhow::bail!("unknown model '{key}' (available: {available})");
        };

        let api_key = self.model.api_key.take();
        self.model = preset;
        if self.model.api_key.is_none() {
            self.model.api_key = api_key;
        }
        Ok(())
    }

    /// Applies `LLM_API_KEY` (or `HUGGINGFACE_TOKEN`), `LLM_BASE_URL` and
    /// `MODEL_NAME` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an injectable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("LLM_API_KEY").or_else(|| non_empty("HUGGINGFACE_TOKEN")) {
            self.model.api_key = Some(key);
        }
        if let Some(url) = non_empty("LLM_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = non_empty("MODEL_NAME") {
            self.model.model = model;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{ "concurrency": 9, "model": { "temperature": 0.1 } }"#)
                .unwrap();

        assert_eq!(config.concurrency, 9);
        assert_eq!(config.model.temperature, 0.1);
        assert_eq!(config.model.model, DEFAULT_MODEL);
        assert_eq!(config.columns.text, "feedback");
    }

    #[test]
    fn api_key_placement_is_tagged() {
        let config: ModelConfig =
            serde_json::from_str(r#"{ "api_key_placement": { "kind": "query_param", "name": "key" } }"#)
                .unwrap();

        assert_eq!(
            config.api_key_placement,
            ApiKeyPlacement::QueryParam { name: "key".into() }
        );
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut config = ModelConfig::default();
        config.api_key = Some("secret".into());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn env_overrides_fall_back_to_huggingface_token() {
        let env: HashMap<&str, &str> = [("HUGGINGFACE_TOKEN", "hf_123"), ("MODEL_NAME", "m")]
            .into_iter()
            .collect();

        let config = AnalysisConfig::default()
            .with_overrides_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("hf_123"));
        assert_eq!(config.model.model, "m");
        assert_eq!(config.model.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn select_model_switches_preset_and_keeps_key() {
        let mut config = AnalysisConfig::default();
        config.model.api_key = Some("hf_123".into());

        config.select_model("mistral-7b").unwrap();

        assert_eq!(config.model.model, "mistralai/Mistral-7B-Instruct-v0.3");
        assert_eq!(config.model.max_tokens, 1000);
        assert_eq!(config.model.api_key.as_deref(), Some("hf_123"));
    }

    #[test]
    fn unknown_model_key_lists_available() {
        let mut config = AnalysisConfig::default();
        let err = config.select_model("gpt-9").unwrap_err().to_string();

        assert!(err.contains("gpt-9"));
        assert!(err.contains(DEFAULT_MODEL_KEY));
        assert_eq!(config.model.model, DEFAULT_MODEL);
    }

    #[test]
    fn presets_can_come_from_file() {
        let mut config: AnalysisConfig = serde_json::from_str(
            r#"{ "models": { "local": { "base_url": "http://localhost:8080/v1", "model": "qwen" } } }"#,
        )
        .unwrap();

        config.select_model("local").unwrap();
        assert_eq!(config.model.base_url, "http://localhost:8080/v1");
        assert!(!config.evaluate_quality);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = AnalysisConfig::default().with_overrides_from(|name| {
            (name == "LLM_API_KEY").then(|| "  ".to_string())
        });

        assert_eq!(config.model.api_key, None);
    }
}
