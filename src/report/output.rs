//! Local persistence for reports, insights and cleaned records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::aggregate::Level;
use crate::insight::Insight;
use crate::record::CleanedRecord;
use crate::report::AnalysisReport;

/// Logs the run counts and every entity that needs attention.
pub fn log_report(report: &AnalysisReport) {
    let counts = &report.counts;
    info!(
        rows_read = counts.rows_read,
        insights = counts.insights,
        load_skipped = counts.load_skipped,
        preprocess_dropped = counts.preprocess_dropped,
        provider_flagged = counts.provider_flagged,
        provider_unavailable = counts.provider_unavailable,
        cancelled = counts.cancelled,
        "Run summary"
    );

    let totals = &report.summaries.totals;
    info!(
        classes = totals.classes,
        groups = totals.groups,
        students = totals.students,
        feedback = totals.feedback,
        average_feedback_per_student = totals.average_feedback_per_student,
        "Totals"
    );

    if let Some(quality) = &report.quality {
        info!(
            evaluated = quality.evaluations.len(),
            failed = quality.failed.len(),
            mean_score = quality.comparison.as_ref().map(|c| c.mean_score),
            "Quality evaluation"
        );
    }

    for level in Level::ALL {
        let summaries = report.summaries.level(level);
        info!(level = %level, entities = summaries.len(), "Level summaries");

        for summary in summaries.iter().filter(|s| s.needs_attention) {
            warn!(
                level = %level,
                entity_id = %summary.entity_id,
                negative = summary.sentiment_distribution.negative,
                insights = summary.insight_count,
                mean_score = summary.mean_score,
                "Entity needs attention"
            );
        }
    }

    debug!("{:#?}", report.summaries);
}

/// Writes the report as pretty JSON. With `gzip`, the file is compressed
/// and `.gz` is appended to the path if missing. Returns the path written.
pub fn write_report(path: &Path, report: &AnalysisReport, gzip: bool) -> Result<PathBuf> {
    let path = if gzip {
        gz_path(path)
    } else {
        path.to_path_buf()
    };
    create_parent_dir(&path)?;

    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;

    if gzip {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer_pretty(&mut encoder, report)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.flush()?;
    }

    info!(path = %path.display(), gzip, "Report written");
    Ok(path)
}

/// Writes one CSV row per insight, replacing any existing file.
pub fn write_insights(path: &Path, insights: &[Insight]) -> Result<()> {
    create_parent_dir(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    for insight in insights {
        writer.serialize(insight)?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = insights.len(), "Insights written");
    Ok(())
}

/// Reads insights previously written by [`write_insights`].
pub fn read_insights(path: &Path) -> Result<Vec<Insight>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut insights = Vec::new();
    for (row, result) in rdr.deserialize().enumerate() {
        let insight: Insight =
            result.with_context(|| format!("{}: invalid insight on row {}", path.display(), row + 2))?;
        insights.push(insight);
    }

    Ok(insights)
}

#[derive(Serialize)]
struct CleanedRow<'a> {
    record_id: u64,
    class_id: &'a str,
    group_id: &'a str,
    student_id: &'a str,
    timestamp: Option<DateTime<Utc>>,
    normalized_text: &'a str,
}

/// Writes cleaned records as CSV, replacing any existing file.
pub fn write_cleaned(path: &Path, records: &[CleanedRecord]) -> Result<()> {
    create_parent_dir(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    for cleaned in records {
        writer.serialize(CleanedRow {
            record_id: cleaned.record.record_id,
            class_id: &cleaned.record.class_id,
            group_id: &cleaned.record.group_id,
            student_id: &cleaned.record.student_id,
            timestamp: cleaned.record.timestamp,
            normalized_text: &cleaned.normalized_text,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn gz_path(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
