//! LLM adapter boundary.
//!
//! [`InsightProvider`] turns one cleaned feedback text into an
//! [`InsightResponse`]. [`ChatCompletionsProvider`] implements it against an
//! OpenAI-compatible endpoint, and [`generate_insights`] fans calls out over
//! a batch of records with bounded concurrency and retries. The same seam
//! carries the optional quality evaluation ([`evaluate_quality`]).

mod chat;
pub mod evaluation;
mod generator;
pub mod prompt;

pub use chat::ChatCompletionsProvider;
pub use evaluation::{EvaluationComparison, QualityEvaluation, RecordEvaluation};
pub use generator::{
    FlaggedRecord, InsightBatch, QualityBatch, RetryPolicy, evaluate_quality, generate_insights,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ModelConfig;
use crate::error::ProviderError;
use crate::record::CleanedRecord;

/// Closed set of sentiment labels a provider may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl SentimentLabel {
    pub const ALL: [SentimentLabel; 4] = [
        SentimentLabel::Positive,
        SentimentLabel::Negative,
        SentimentLabel::Neutral,
        SentimentLabel::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Mixed => "Mixed",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sentiment label '{0}'")]
pub struct UnknownLabel(pub String);

impl FromStr for SentimentLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SentimentLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownLabel(wanted.to_string()))
    }
}

/// What a provider returns for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightResponse {
    pub sentiment: SentimentLabel,
    pub summary: String,
    /// 0 (strongly negative) to 100 (strongly positive).
    pub score: f64,
}

/// LLM-derived insight for one feedback record.
///
/// Carries the identifiers of its record so aggregation needs no lookup,
/// and the cleaned text so quotes come from the student, not the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub record_id: u64,
    pub class_id: String,
    pub group_id: String,
    pub student_id: String,
    pub sentiment: SentimentLabel,
    pub score: f64,
    pub summary: String,
    pub text: String,
    /// Overall quality score, when quality evaluation ran for this record.
    #[serde(default)]
    pub quality_score: Option<f64>,
}

impl Insight {
    pub fn from_response(record: &CleanedRecord, response: InsightResponse) -> Self {
        Self {
            record_id: record.record.record_id,
            class_id: record.record.class_id.clone(),
            group_id: record.record.group_id.clone(),
            student_id: record.record.student_id.clone(),
            sentiment: response.sentiment,
            score: response.score,
            summary: response.summary,
            text: record.normalized_text.clone(),
            quality_score: None,
        }
    }
}

/// Something that can analyse a single feedback text.
///
/// Output is not expected to be deterministic for identical input.
#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        model: &ModelConfig,
    ) -> Result<InsightResponse, ProviderError>;

    /// Grades the quality of one feedback text. Providers that cannot do
    /// this report every call as a malformed response.
    async fn evaluate(
        &self,
        _text: &str,
        _model: &ModelConfig,
    ) -> Result<QualityEvaluation, ProviderError> {
        Err(ProviderError::Response(
            "quality evaluation is not supported by this provider".into(),
        ))
    }
}
