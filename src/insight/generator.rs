use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use super::evaluation::RecordEvaluation;
use super::{Insight, InsightProvider};
use crate::cancel::CancellationToken;
use crate::config::ModelConfig;
use crate::error::ProviderError;
use crate::record::CleanedRecord;

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// A record the provider could not turn into an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedRecord {
    pub record_id: u64,
    pub student_id: String,
    pub reason: String,
}

impl FlaggedRecord {
    fn new(record: &CleanedRecord, reason: impl Into<String>) -> Self {
        Self {
            record_id: record.record.record_id,
            student_id: record.record.student_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Result of a batch run. Every input record ends up in exactly one bucket.
#[derive(Debug, Default)]
pub struct InsightBatch {
    /// Ordered by `record_id`.
    pub insights: Vec<Insight>,
    /// Malformed model output; skipped.
    pub flagged: Vec<FlaggedRecord>,
    /// Still unavailable after the last retry; skipped.
    pub unavailable: Vec<FlaggedRecord>,
    /// Not started because the run was cancelled.
    pub cancelled: usize,
}

/// Quality evaluations for a batch of insights.
#[derive(Debug, Default)]
pub struct QualityBatch {
    /// Ordered by `record_id`.
    pub evaluations: Vec<RecordEvaluation>,
    /// Malformed or unavailable evaluations; the insight itself is kept.
    pub failed: Vec<FlaggedRecord>,
    pub cancelled: usize,
}

/// One unit of provider work.
struct Job {
    record_id: u64,
    student_id: String,
    text: String,
}

enum Outcome<T> {
    Done(T),
    Flagged(String),
    Unavailable(String),
    Cancelled,
}

/// Analyses every record with at most `concurrency` provider calls in flight.
///
/// Provider failures never abort the batch: transient ones are retried per
/// `retry`, malformed responses are flagged. Cancelling `cancel` stops new
/// calls; insights already produced are returned.
#[tracing::instrument(skip_all, fields(records = records.len(), concurrency = concurrency))]
pub async fn generate_insights<P>(
    provider: Arc<P>,
    records: &[CleanedRecord],
    model: &ModelConfig,
    retry: &RetryPolicy,
    concurrency: usize,
    cancel: &CancellationToken,
) -> InsightBatch
where
    P: InsightProvider + ?Sized + 'static,
{
    let jobs = records
        .iter()
        .map(|r| Job {
            record_id: r.record.record_id,
            student_id: r.record.student_id.clone(),
            text: r.normalized_text.clone(),
        })
        .collect();

    let model = Arc::new(model.clone());
    let outcomes = fan_out(jobs, retry, concurrency, cancel, move |text: String| {
        let provider = provider.clone();
        let model = model.clone();
        async move { provider.analyze(&text, &model).await }
    })
    .await;

    let mut batch = InsightBatch::default();
    for (record, outcome) in records.iter().zip(outcomes) {
        match outcome {
            Outcome::Done(response) => batch.insights.push(Insight::from_response(record, response)),
            Outcome::Flagged(reason) => batch.flagged.push(FlaggedRecord::new(record, reason)),
            Outcome::Unavailable(reason) => {
                batch.unavailable.push(FlaggedRecord::new(record, reason))
            }
            Outcome::Cancelled => batch.cancelled += 1,
        }
    }

    batch.insights.sort_by_key(|i| i.record_id);

    info!(
        insights = batch.insights.len(),
        flagged = batch.flagged.len(),
        unavailable = batch.unavailable.len(),
        cancelled = batch.cancelled,
        "Insight generation complete"
    );
    batch
}

/// Asks the provider to grade the feedback text behind each insight.
///
/// Same concurrency, retry and cancellation rules as [`generate_insights`].
/// A failed evaluation never removes the insight.
#[tracing::instrument(skip_all, fields(insights = insights.len(), concurrency = concurrency))]
pub async fn evaluate_quality<P>(
    provider: Arc<P>,
    insights: &[Insight],
    model: &ModelConfig,
    retry: &RetryPolicy,
    concurrency: usize,
    cancel: &CancellationToken,
) -> QualityBatch
where
    P: InsightProvider + ?Sized + 'static,
{
    let jobs = insights
        .iter()
        .map(|i| Job {
            record_id: i.record_id,
            student_id: i.student_id.clone(),
            text: i.text.clone(),
        })
        .collect();

    let model = Arc::new(model.clone());
    let outcomes = fan_out(jobs, retry, concurrency, cancel, move |text: String| {
        let provider = provider.clone();
        let model = model.clone();
        async move { provider.evaluate(&text, &model).await }
    })
    .await;

    let mut batch = QualityBatch::default();
    for (insight, outcome) in insights.iter().zip(outcomes) {
        let failed = |reason: String| FlaggedRecord {
            record_id: insight.record_id,
            student_id: insight.student_id.clone(),
            reason,
        };
        match outcome {
            Outcome::Done(evaluation) => batch.evaluations.push(RecordEvaluation {
                record_id: insight.record_id,
                student_id: insight.student_id.clone(),
                evaluation,
            }),
            Outcome::Flagged(reason) | Outcome::Unavailable(reason) => {
                batch.failed.push(failed(reason))
            }
            Outcome::Cancelled => batch.cancelled += 1,
        }
    }

    batch.evaluations.sort_by_key(|e| e.record_id);

    info!(
        evaluated = batch.evaluations.len(),
        failed = batch.failed.len(),
        cancelled = batch.cancelled,
        "Quality evaluation complete"
    );
    batch
}

/// Runs `call` once per job with bounded concurrency. Outcomes come back in
/// job order.
async fn fan_out<T, F, Fut>(
    jobs: Vec<Job>,
    retry: &RetryPolicy,
    concurrency: usize,
    cancel: &CancellationToken,
    call: F,
) -> Vec<Outcome<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ProviderError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let call = Arc::new(call);

    let mut tasks = Vec::with_capacity(jobs.len());

    for job in jobs {
        let sem = semaphore.clone();
        let call = call.clone();
        let retry = retry.clone();
        let cancel = cancel.clone();
        let record_id = job.record_id;

        let span = tracing::info_span!(
            "provider_call",
            record_id = job.record_id,
            student_id = %job.student_id,
        );

        let task = tokio::spawn(
            async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Outcome::Cancelled;
                };
                call_with_retry(call.as_ref(), &job.text, &retry, &cancel).await
            }
            .instrument(span),
        );

        tasks.push((record_id, task));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (record_id, task) in tasks {
        outcomes.push(match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(record_id, error = %e, "Provider task failed");
                Outcome::Unavailable(format!("task failed: {e}"))
            }
        });
    }
    outcomes
}

async fn call_with_retry<T, F, Fut>(
    call: &F,
    text: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Outcome<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        attempt += 1;

        match call(text.to_string()).await {
            Ok(value) => {
                debug!(attempt, "Provider call succeeded");
                return Outcome::Done(value);
            }
            Err(ProviderError::Response(reason)) => {
                warn!(reason = %reason, "Flagging record with malformed model response");
                return Outcome::Flagged(reason);
            }
            Err(ProviderError::Unavailable(reason)) if attempt < max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Provider unavailable, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        debug!(attempt, "Cancelled during backoff");
                        return Outcome::Cancelled;
                    }
                }
            }
            Err(ProviderError::Unavailable(reason)) => {
                error!(attempt, reason = %reason, "Provider unavailable, giving up on record");
                return Outcome::Unavailable(reason);
            }
        }
    }
}
