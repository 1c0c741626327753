//! Run report: what was produced and what was skipped.
//!
//! The report is plain data. [`output`] persists it (and the per-record
//! insights) locally, [`s3`] publishes it to a bucket.

pub mod output;
pub mod s3;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::LevelSummaries;
use crate::insight::evaluation::compare_evaluations;
use crate::insight::{EvaluationComparison, FlaggedRecord, QualityBatch, RecordEvaluation};

pub const SCHEMA_VERSION: u8 = 1;

/// Per-stage record counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub rows_read: usize,
    pub records_loaded: usize,
    pub load_skipped: usize,
    pub preprocess_dropped: usize,
    pub insights: usize,
    pub provider_flagged: usize,
    pub provider_unavailable: usize,
    pub cancelled: usize,
}

impl RunCounts {
    /// Rows that did not end up as an insight, for any reason.
    pub fn skipped_total(&self) -> usize {
        self.load_skipped
            + self.preprocess_dropped
            + self.provider_flagged
            + self.provider_unavailable
            + self.cancelled
    }
}

/// Results of the optional quality evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub evaluations: Vec<RecordEvaluation>,
    /// Insights whose evaluation failed; they still count as insights.
    pub failed: Vec<FlaggedRecord>,
    pub cancelled: usize,
    pub comparison: Option<EvaluationComparison>,
}

impl From<QualityBatch> for QualityReport {
    fn from(batch: QualityBatch) -> Self {
        let comparison = compare_evaluations(batch.evaluations.iter().map(|e| &e.evaluation));
        Self {
            evaluations: batch.evaluations,
            failed: batch.failed,
            cancelled: batch.cancelled,
            comparison,
        }
    }
}

/// Everything a presentation layer needs from one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub schema_version: u8,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub counts: RunCounts,
    /// Records whose model output could not be parsed.
    pub flagged: Vec<FlaggedRecord>,
    /// Records the provider never answered.
    pub unavailable: Vec<FlaggedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    #[serde(flatten)]
    pub summaries: LevelSummaries,
}

impl AnalysisReport {
    pub fn new(model: impl Into<String>, counts: RunCounts, summaries: LevelSummaries) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            model: model.into(),
            counts,
            flagged: Vec::new(),
            unavailable: Vec::new(),
            quality: None,
            summaries,
        }
    }

    /// True when the run was interrupted before every record was tried.
    pub fn is_partial(&self) -> bool {
        self.counts.cancelled > 0
    }
}
