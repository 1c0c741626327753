use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::prompt::{self, snippet};
use super::evaluation::{self, QualityEvaluation};
use super::{InsightProvider, InsightResponse};
use crate::config::{ApiKeyPlacement, ModelConfig};
use crate::error::ProviderError;
use crate::fetch::auth::{ApiKey, UrlParam};
use crate::fetch::{BasicClient, HttpClient, post_json};

/// [`InsightProvider`] backed by an OpenAI-compatible
/// `POST {base_url}/chat/completions` endpoint.
pub struct ChatCompletionsProvider {
    client: Box<dyn HttpClient>,
    endpoint: Url,
}

impl ChatCompletionsProvider {
    /// Builds an authenticated client from `model`.
    pub fn new(model: &ModelConfig) -> Result<Self> {
        let base = BasicClient::with_timeout(Duration::from_secs(model.timeout_secs))?;

        let client: Box<dyn HttpClient> = match (&model.api_key, &model.api_key_placement) {
            (None, _) => {
                warn!(base_url = %model.base_url, "No API key configured, requests are unauthenticated");
                Box::new(base)
            }
            (Some(key), ApiKeyPlacement::Bearer) => Box::new(ApiKey::bearer(base, key)?),
            (Some(key), ApiKeyPlacement::Header { name }) => {
                Box::new(ApiKey::header(base, name, key)?)
            }
            (Some(key), ApiKeyPlacement::QueryParam { name }) => {
                Box::new(UrlParam::new(base, name.as_str(), key.as_str()))
            }
        };

        Self::with_client(client, &model.base_url)
    }

    /// Uses a caller-supplied client, e.g. one with extra decorators.
    pub fn with_client(client: Box<dyn HttpClient>, base_url: &str) -> Result<Self> {
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid model base URL '{base_url}'"))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ChatCompletionsProvider {
    /// Posts one request and returns the assistant message content.
    async fn complete(&self, body: &Value) -> Result<String, ProviderError> {
        let response = post_json(&self.client, &self.endpoint, body)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{e:#}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("failed to read response body: {e}")))?;

        classify_status(status, &bytes)?;

        let json: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Response(format!("response is not JSON: {e}")))?;
        let content = message_content(&json)?;
        debug!(chars = content.len(), "Model response received");

        Ok(content.to_string())
    }
}

#[async_trait]
impl InsightProvider for ChatCompletionsProvider {
    async fn analyze(
        &self,
        text: &str,
        model: &ModelConfig,
    ) -> Result<InsightResponse, ProviderError> {
        let content = self.complete(&prompt::request_body(text, model)).await?;
        prompt::parse_insight(&content)
    }

    async fn evaluate(
        &self,
        text: &str,
        model: &ModelConfig,
    ) -> Result<QualityEvaluation, ProviderError> {
        let content = self
            .complete(&evaluation::evaluation_request_body(text, model))
            .await?;
        evaluation::parse_evaluation(&content)
    }
}

/// Rate limits and server errors are transient; any other failure status is not.
fn classify_status(status: StatusCode, body: &[u8]) -> Result<(), ProviderError> {
    if status.is_success() {
        return Ok(());
    }

    let message = format!(
        "status {status}: {}",
        snippet(&String::from_utf8_lossy(body))
    );
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(ProviderError::Unavailable(message))
    } else {
        Err(ProviderError::Response(message))
    }
}

/// `choices[0].message.content` of a chat-completions response.
fn message_content(json: &Value) -> Result<&str, ProviderError> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::Response(format!(
                "no message content in: {}",
                snippet(&json.to_string())
            ))
        })
}
