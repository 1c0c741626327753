//! Prompt contract with the model.
//!
//! The model is asked for a single JSON object:
//!
//! ```json
//! { "sentiment": "Positive|Negative|Neutral|Mixed", "summary": "...", "score": 0-100 }
//! ```
//!
//! Parsing tolerates code fences and prose around the object.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{InsightResponse, SentimentLabel};
use crate::config::ModelConfig;
use crate::error::ProviderError;

pub const SYSTEM_PROMPT: &str = "You are an expert educational analyst. \
You read one piece of student feedback and classify it. \
Respond with a single JSON object and nothing else, with exactly these keys: \
\"sentiment\" (one of \"Positive\", \"Negative\", \"Neutral\", \"Mixed\"), \
\"summary\" (one sentence describing the main point of the feedback), \
\"score\" (a number from 0 for strongly negative to 100 for strongly positive).";

/// Builds the chat-completions request body for one feedback text.
pub fn request_body(text: &str, model: &ModelConfig) -> Value {
    json!({
        "model": model.model,
        "max_tokens": model.max_tokens,
        "temperature": model.temperature,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": format!("Feedback: {text}") },
        ],
    })
}

#[derive(Deserialize)]
struct RawInsight {
    #[serde(alias = "sentiment_label", alias = "label")]
    sentiment: Option<String>,
    #[serde(alias = "summary_text")]
    summary: Option<String>,
    score: Option<Value>,
}

/// Parses the model's message content into an [`InsightResponse`].
pub fn parse_insight(content: &str) -> Result<InsightResponse, ProviderError> {
    let object = extract_json_object(content)
        .ok_or_else(|| ProviderError::Response(format!("no JSON object in: {}", snippet(content))))?;

    let raw: RawInsight = serde_json::from_str(object)
        .map_err(|e| ProviderError::Response(format!("invalid insight JSON: {e}")))?;

    let sentiment: SentimentLabel = raw
        .sentiment
        .ok_or_else(|| ProviderError::Response("missing sentiment".into()))?
        .parse()
        .map_err(|e: super::UnknownLabel| ProviderError::Response(e.to_string()))?;

    let summary = raw.summary.unwrap_or_default().trim().to_string();
    if summary.is_empty() {
        return Err(ProviderError::Response("missing summary".into()));
    }

    let score = raw
        .score
        .as_ref()
        .and_then(score_value)
        .ok_or_else(|| ProviderError::Response("missing or non-numeric score".into()))?;
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(ProviderError::Response(format!("score {score} outside 0-100")));
    }

    Ok(InsightResponse {
        sentiment,
        summary,
        score,
    })
}

pub(crate) fn score_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The first complete JSON object in `content`. Braces in surrounding prose
/// that do not start a valid object are skipped.
pub(crate) fn extract_json_object(content: &str) -> Option<&str> {
    content.match_indices('{').find_map(|(start, _)| {
        let rest = &content[start..];
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(_))) => Some(&rest[..stream.byte_offset()]),
            _ => None,
        }
    })
}

pub(crate) fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
