//! End-to-end run: load, clean, analyse, optionally grade quality, aggregate.
//!
//! Each stage consumes the previous stage's collection and produces a new
//! one. Only loading can fail the run; everything after it degrades to
//! skipped-record counts in the [`AnalysisReport`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::aggregate::aggregate;
use crate::cancel::CancellationToken;
use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::insight::{Insight, InsightProvider, evaluate_quality, generate_insights};
use crate::loader::{LoadedFeedback, load_files};
use crate::preprocess::preprocess;
use crate::report::{AnalysisReport, QualityReport, RunCounts};

/// Report plus the per-record insights it was built from.
#[derive(Debug)]
pub struct PipelineOutput {
    pub report: AnalysisReport,
    pub insights: Vec<Insight>,
}

/// Loads `paths` and analyses every usable record.
///
/// # Errors
///
/// Only structural input failures: unreadable files, missing required
/// columns, or no usable rows.
pub async fn run<P>(
    paths: &[PathBuf],
    config: &AnalysisConfig,
    provider: Arc<P>,
    cancel: &CancellationToken,
) -> Result<PipelineOutput, PipelineError>
where
    P: InsightProvider + ?Sized + 'static,
{
    let loaded = load_files(paths, &config.columns)?;
    Ok(analyze_loaded(loaded, config, provider, cancel).await)
}

/// Runs every stage after loading.
pub async fn analyze_loaded<P>(
    loaded: LoadedFeedback,
    config: &AnalysisConfig,
    provider: Arc<P>,
    cancel: &CancellationToken,
) -> PipelineOutput
where
    P: InsightProvider + ?Sized + 'static,
{
    let cleaned = preprocess(&loaded.records, &config.preprocess);

    let mut batch = generate_insights(
        provider.clone(),
        &cleaned.records,
        &config.model,
        &config.retry,
        config.concurrency,
        cancel,
    )
    .await;

    let quality = if config.evaluate_quality && !batch.insights.is_empty() {
        let quality = evaluate_quality(
            provider,
            &batch.insights,
            &config.model,
            &config.retry,
            config.concurrency,
            cancel,
        )
        .await;

        let scores: HashMap<u64, f64> = quality
            .evaluations
            .iter()
            .map(|e| (e.record_id, e.evaluation.score))
            .collect();
        for insight in &mut batch.insights {
            insight.quality_score = scores.get(&insight.record_id).copied();
        }
        Some(QualityReport::from(quality))
    } else {
        None
    };

    let counts = RunCounts {
        rows_read: loaded.rows_read,
        records_loaded: loaded.records.len(),
        load_skipped: loaded.skipped,
        preprocess_dropped: cleaned.dropped,
        insights: batch.insights.len(),
        provider_flagged: batch.flagged.len(),
        provider_unavailable: batch.unavailable.len(),
        cancelled: batch.cancelled,
    };

    let mut report = AnalysisReport::new(
        config.model.model.clone(),
        counts,
        aggregate(&batch.insights, &config.aggregation),
    );
    report.flagged = batch.flagged;
    report.unavailable = batch.unavailable;
    report.quality = quality;

    info!(
        insights = counts.insights,
        skipped = counts.skipped_total(),
        partial = report.is_partial(),
        "Analysis complete"
    );

    PipelineOutput {
        report,
        insights: batch.insights,
    }
}

/// Rebuilds a report from saved insights without calling the provider.
pub fn summarize_insights(
    insights: &[Insight],
    config: &AnalysisConfig,
    model: impl Into<String>,
) -> AnalysisReport {
    let counts = RunCounts {
        rows_read: insights.len(),
        records_loaded: insights.len(),
        insights: insights.len(),
        ..Default::default()
    };
    AnalysisReport::new(model, counts, aggregate(insights, &config.aggregation))
}
