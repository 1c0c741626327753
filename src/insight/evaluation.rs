//! Quality evaluation of feedback texts.
//!
//! A second, optional model call grades how useful a comment is as feedback
//! (specific, constructive, actionable, aligned, evidence-based), each on a
//! 0-100 scale:
//!
//! ```json
//! { "score": 0-100, "justification": "...",
//!   "criterion_scores": { "specificity": 0-100, "constructiveness": 0-100,
//!     "actionability": 0-100, "alignment": 0-100, "evidence": 0-100 } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

use super::prompt::{extract_json_object, score_value, snippet};
use crate::aggregate::utility::mean;
use crate::config::ModelConfig;
use crate::error::ProviderError;

pub const EVALUATION_PROMPT: &str = "You are an expert educational evaluator. \
You assess the quality of one piece of feedback on five criteria: \
specificity and clarity, constructive nature, actionability, \
alignment with learning objectives, and evidence-based observations. \
Respond with a single JSON object and nothing else, with exactly these keys: \
\"score\" (overall quality from 0 to 100), \
\"justification\" (one or two sentences), \
\"criterion_scores\" (an object with numeric 0-100 values for \"specificity\", \
\"constructiveness\", \"actionability\", \"alignment\" and \"evidence\").";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CriterionScores {
    pub specificity: f64,
    pub constructiveness: f64,
    pub actionability: f64,
    pub alignment: f64,
    pub evidence: f64,
}

impl CriterionScores {
    const NAMES: [&'static str; 5] = [
        "specificity",
        "constructiveness",
        "actionability",
        "alignment",
        "evidence",
    ];

    fn values(&self) -> [f64; 5] {
        [
            self.specificity,
            self.constructiveness,
            self.actionability,
            self.alignment,
            self.evidence,
        ]
    }

    fn from_values(v: [f64; 5]) -> Self {
        Self {
            specificity: v[0],
            constructiveness: v[1],
            actionability: v[2],
            alignment: v[3],
            evidence: v[4],
        }
    }
}

/// Model-assessed quality of one feedback text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    pub score: f64,
    pub justification: String,
    pub criterion_scores: CriterionScores,
}

/// A [`QualityEvaluation`] tied back to its record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvaluation {
    pub record_id: u64,
    pub student_id: String,
    pub evaluation: QualityEvaluation,
}

/// Side-by-side view of several evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationComparison {
    pub evaluated: usize,
    /// Overall scores in input order.
    pub scores: Vec<f64>,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub mean_criterion_scores: CriterionScores,
}

/// Compares evaluations; `None` when there is nothing to compare.
pub fn compare_evaluations<'a, I>(evaluations: I) -> Option<EvaluationComparison>
where
    I: IntoIterator<Item = &'a QualityEvaluation>,
{
    let evaluations: Vec<&QualityEvaluation> = evaluations.into_iter().collect();
    let scores: Vec<f64> = evaluations.iter().map(|e| e.score).collect();
    let mean_score = mean(&scores)?;

    let mut criteria = [0.0; 5];
    for (i, slot) in criteria.iter_mut().enumerate() {
        let column: Vec<f64> = evaluations
            .iter()
            .map(|e| e.criterion_scores.values()[i])
            .collect();
        *slot = mean(&column).unwrap_or_default();
    }

    Some(EvaluationComparison {
        evaluated: evaluations.len(),
        min_score: scores.iter().copied().fold(f64::INFINITY, f64::min),
        max_score: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        scores,
        mean_score,
        mean_criterion_scores: CriterionScores::from_values(criteria),
    })
}

/// Builds the chat-completions request body for evaluating one text.
pub fn evaluation_request_body(text: &str, model: &ModelConfig) -> Value {
    json!({
        "model": model.model,
        "max_tokens": model.max_tokens,
        "temperature": model.temperature,
        "messages": [
            { "role": "system", "content": EVALUATION_PROMPT },
            { "role": "user", "content": format!("Feedback: {text}") },
        ],
    })
}

#[derive(Deserialize)]
struct RawEvaluation {
    #[serde(alias = "overall_score", alias = "quality_score")]
    score: Option<Value>,
    #[serde(alias = "reason", alias = "rationale")]
    justification: Option<String>,
    #[serde(alias = "criteria")]
    criterion_scores: Option<HashMap<String, Value>>,
}

/// Parses the model's message content into a [`QualityEvaluation`].
pub fn parse_evaluation(content: &str) -> Result<QualityEvaluation, ProviderError> {
    let object = extract_json_object(content)
        .ok_or_else(|| ProviderError::Response(format!("no JSON object in: {}", snippet(content))))?;

    let raw: RawEvaluation = serde_json::from_str(object)
        .map_err(|e| ProviderError::Response(format!("invalid evaluation JSON: {e}")))?;

    let score = bounded_score("score", raw.score.as_ref())?;

    let criteria = raw
        .criterion_scores
        .ok_or_else(|| ProviderError::Response("missing criterion_scores".into()))?;
    let criteria: HashMap<String, Value> = criteria
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect();

    let mut values = [0.0; 5];
    for (slot, name) in values.iter_mut().zip(CriterionScores::NAMES) {
        *slot = bounded_score(name, criteria.get(name))?;
    }

    Ok(QualityEvaluation {
        score,
        justification: raw.justification.unwrap_or_default().trim().to_string(),
        criterion_scores: CriterionScores::from_values(values),
    })
}

fn bounded_score(name: &str, value: Option<&Value>) -> Result<f64, ProviderError> {
    let score = value
        .and_then(score_value)
        .ok_or_else(|| ProviderError::Response(format!("missing or non-numeric {name}")))?;
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(ProviderError::Response(format!("{name} {score} outside 0-100")));
    }
    Ok(score)
}
