use async_trait::async_trait;
use feedback_insights::aggregate::Level;
use feedback_insights::cancel::CancellationToken;
use feedback_insights::config::{AnalysisConfig, ModelConfig};
use feedback_insights::error::{PipelineError, ProviderError};
use feedback_insights::insight::{InsightProvider, InsightResponse, SentimentLabel};
use feedback_insights::pipeline::{self, summarize_insights};
use feedback_insights::report::output::{read_insights, write_insights};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Deterministic provider: "great" is positive, "lost" negative, anything
/// else neutral.
struct StubProvider;

#[async_trait]
impl InsightProvider for StubProvider {
    async fn analyze(
        &self,
        text: &str,
        _model: &ModelConfig,
    ) -> Result<InsightResponse, ProviderError> {
        let lower = text.to_lowercase();
        let (sentiment, score) = if lower.contains("great") {
            (SentimentLabel::Positive, 85.0)
        } else if lower.contains("lost") {
            (SentimentLabel::Negative, 20.0)
        } else {
            (SentimentLabel::Neutral, 50.0)
        };
        Ok(InsightResponse {
            sentiment,
            summary: format!("Student said: {text}"),
            score,
        })
    }
}

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/feedback_sample.csv")
}

async fn run(paths: &[PathBuf]) -> Result<pipeline::PipelineOutput, PipelineError> {
    pipeline::run(
        paths,
        &AnalysisConfig::default(),
        Arc::new(StubProvider),
        &CancellationToken::new(),
    )
    .await
}

#[tokio::test]
async fn test_full_pipeline() {
    let output = run(&[fixture()]).await.expect("pipeline failed");
    let counts = output.report.counts;

    assert_eq!(counts.rows_read, 7);
    assert_eq!(counts.load_skipped, 1);
    assert_eq!(counts.preprocess_dropped, 1);
    assert_eq!(counts.insights, 5);
    assert_eq!(counts.skipped_total() + counts.insights, counts.rows_read);

    let classes: Vec<_> = output
        .report
        .summaries
        .classes
        .iter()
        .map(|s| s.entity_id.as_str())
        .collect();
    assert_eq!(classes, ["C1", "C2"]);

    let c1 = output.report.summaries.find(Level::Class, "C1").unwrap();
    assert_eq!(c1.insight_count, 3);
    assert_eq!(c1.student_count, 3);
    assert_eq!(c1.sentiment_distribution.positive, 2);
    assert_eq!(c1.sentiment_distribution.negative, 1);

    let group_c = output.report.summaries.find(Level::Group, "C").unwrap();
    assert_eq!(group_c.insight_count, 2);
    assert!(group_c.needs_attention);

    assert_eq!(output.report.summaries.students.len(), 5);

    let totals = output.report.summaries.totals;
    assert_eq!((totals.classes, totals.groups, totals.students), (2, 3, 5));
    assert_eq!(totals.feedback, 5);
    assert_eq!(totals.average_feedback_per_student, 1.0);
}

#[tokio::test]
async fn test_corrupt_gzip_input_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feedback.csv.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&fs::read(fixture()).unwrap()).unwrap();
    let mut bytes = encoder.finish().unwrap();
    // Damage the gzip trailer checksum.
    let crc = bytes.len() - 8;
    bytes[crc] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let err = run(&[path]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Io { .. }), "{err}");
}

#[tokio::test]
async fn test_empty_feedback_is_skipped_but_others_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class.csv");
    fs::write(&path, "student,group,feedback\n1,A,great job\n2,A,\n").unwrap();

    let output = run(&[path]).await.unwrap();

    assert_eq!(output.insights.len(), 1);
    let group_a = output.report.summaries.find(Level::Group, "A").unwrap();
    assert_eq!(group_a.insight_count, 1);
    assert_eq!(group_a.sentiment_distribution.positive, 1);
    assert_eq!(output.report.summaries.classes[0].entity_id, "class");
}

#[tokio::test]
async fn test_missing_text_column_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no_text.csv");
    fs::write(&path, "student,group,comment\n1,A,hello\n").unwrap();

    let err = run(&[path]).await.unwrap_err();
    assert!(matches!(err, PipelineError::MalformedInput { .. }), "{err}");
}

#[tokio::test]
async fn test_header_only_file_is_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.csv");
    fs::write(&path, "student,group,feedback\n").unwrap();

    let err = run(&[path]).await.unwrap_err();
    assert!(matches!(err, PipelineError::EmptyInput(_)), "{err}");
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let err = run(&[PathBuf::from("does/not/exist.csv")]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Io { .. }));
}

#[tokio::test]
async fn test_saved_insights_rebuild_the_same_summaries() {
    let output = run(&[fixture()]).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("insights.csv");

    write_insights(&path, &output.insights).unwrap();
    let saved = read_insights(&path).unwrap();
    let rebuilt = summarize_insights(&saved, &AnalysisConfig::default(), "saved");

    assert_eq!(rebuilt.summaries, output.report.summaries);
}

#[tokio::test]
async fn test_cancelled_run_reports_partial() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let output = pipeline::run(
        &[fixture()],
        &AnalysisConfig::default(),
        Arc::new(StubProvider),
        &cancel,
    )
    .await
    .unwrap();

    assert!(output.report.is_partial());
    assert!(output.insights.is_empty());
    assert_eq!(output.report.counts.cancelled, 5);
}
