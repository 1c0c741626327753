//! CLI entry point for the feedback insights tool.
//!
//! Provides subcommands for analyzing feedback CSVs with an LLM, cleaning
//! them without any model calls, and rebuilding a report from saved insights.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use feedback_insights::{
    cancel::CancellationToken,
    config::AnalysisConfig,
    insight::ChatCompletionsProvider,
    loader::load_files,
    pipeline,
    preprocess::preprocess,
    report::output::{log_report, read_insights, write_cleaned, write_insights, write_report},
    report::s3::{client_from_env, report_key, write_json_to_s3},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "feedback_insights")]
#[command(about = "Analyze student feedback CSVs with an LLM", long_about = None)]
struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Column-name overrides shared by the commands that read raw CSVs.
#[derive(Args)]
struct ColumnArgs {
    /// Student identifier column
    #[arg(long)]
    student_col: Option<String>,

    /// Group identifier column
    #[arg(long)]
    group_col: Option<String>,

    /// Class identifier column (optional in the input)
    #[arg(long)]
    class_col: Option<String>,

    /// Free-text feedback column
    #[arg(long)]
    text_col: Option<String>,

    /// Timestamp column (optional in the input)
    #[arg(long)]
    date_col: Option<String>,

    /// Class id for rows without one (defaults to the file name)
    #[arg(long)]
    default_class: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze feedback CSVs and write an aggregated report
    Analyze {
        /// CSV files (.csv or .csv.gz)
        #[arg(value_name = "CSV", required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        columns: ColumnArgs,

        /// Named model preset (see `models`)
        #[arg(long)]
        model_key: Option<String>,

        /// Model name, overriding config, preset and MODEL_NAME
        #[arg(short, long)]
        model: Option<String>,

        /// Also grade each comment's feedback quality (one extra call per record)
        #[arg(long, default_value_t = false)]
        evaluate_quality: bool,

        /// Maximum number of concurrent model requests
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Report JSON file
        #[arg(short, long, default_value = "output/report.json")]
        output: PathBuf,

        /// Also write per-record insights to this CSV
        #[arg(long)]
        insights_csv: Option<PathBuf>,

        /// Gzip compress the report
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Optional: S3 bucket to upload the report to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Key prefix for the uploaded report
        #[arg(long, default_value = "reports")]
        s3_prefix: String,
    },
    /// Load and clean feedback CSVs without calling the model
    Preprocess {
        /// CSV files (.csv or .csv.gz)
        #[arg(value_name = "CSV", required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        columns: ColumnArgs,

        /// Cleaned records CSV
        #[arg(short, long, default_value = "output/cleaned.csv")]
        output: PathBuf,
    },
    /// List the configured model presets
    Models,
    /// Rebuild a report from an insights CSV written by `analyze`
    Summarize {
        /// Insights CSV
        #[arg(value_name = "INSIGHTS_CSV")]
        insights: PathBuf,

        /// Report JSON file
        #[arg(short, long, default_value = "output/report.json")]
        output: PathBuf,

        /// Gzip compress the report
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/feedback_insights.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("feedback_insights.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let base_config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            files,
            columns,
            model_key,
            model,
            evaluate_quality,
            concurrency,
            output,
            insights_csv,
            gzip,
            s3_bucket,
            s3_prefix,
        } => {
            let mut config = base_config;
            columns.apply(&mut config);
            if let Some(key) = model_key {
                config.select_model(&key)?;
            }
            if let Some(model) = model {
                config.model.model = model;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            config.evaluate_quality |= evaluate_quality;

            analyze(&files, &config, &output, insights_csv.as_deref(), gzip, s3_bucket, &s3_prefix)
                .await?;
        }
        Commands::Preprocess {
            files,
            columns,
            output,
        } => {
            let mut config = base_config;
            columns.apply(&mut config);

            let loaded = load_files(&files, &config.columns)?;
            let cleaned = preprocess(&loaded.records, &config.preprocess);
            write_cleaned(&output, &cleaned.records)?;

            info!(
                rows_read = loaded.rows_read,
                load_skipped = loaded.skipped,
                kept = cleaned.records.len(),
                dropped = cleaned.dropped,
                output = %output.display(),
                "Cleaned records written"
            );
        }
        Commands::Models => {
            for (key, model) in &base_config.models {
                info!(
                    key = %key,
                    model = %model.model,
                    base_url = %model.base_url,
                    max_tokens = model.max_tokens,
                    temperature = model.temperature,
                    "Model preset"
                );
            }
        }
        Commands::Summarize {
            insights,
            output,
            gzip,
        } => {
            let saved = read_insights(&insights)?;
            if saved.is_empty() {
                warn!(path = %insights.display(), "Insights file has no rows");
            }
            let report = pipeline::summarize_insights(&saved, &base_config, base_config.model.model.clone());
            log_report(&report);
            write_report(&output, &report, gzip)?;
        }
    }

    Ok(())
}

impl ColumnArgs {
    fn apply(self, config: &mut AnalysisConfig) {
        let columns = &mut config.columns;
        if let Some(v) = self.student_col {
            columns.student = v;
        }
        if let Some(v) = self.group_col {
            columns.group = v;
        }
        if let Some(v) = self.class_col {
            columns.class = v;
        }
        if let Some(v) = self.text_col {
            columns.text = v;
        }
        if let Some(v) = self.date_col {
            columns.timestamp = v;
        }
        if self.default_class.is_some() {
            columns.default_class = self.default_class;
        }
    }
}

/// Defaults, then the optional config file, then environment variables.
fn load_config(path: Option<&str>) -> Result<AnalysisConfig> {
    let config = match path {
        Some(path) => {
            info!(path, "Loading config file");
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    Ok(config.with_env_overrides())
}

/// Runs the full pipeline and persists its results.
#[tracing::instrument(skip(files, config, s3_bucket), fields(files = files.len(), model = %config.model.model))]
async fn analyze(
    files: &[PathBuf],
    config: &AnalysisConfig,
    output: &Path,
    insights_csv: Option<&Path>,
    gzip: bool,
    s3_bucket: Option<String>,
    s3_prefix: &str,
) -> Result<()> {
    let provider = Arc::new(ChatCompletionsProvider::new(&config.model)?);
    info!(endpoint = %provider.endpoint(), concurrency = config.concurrency, "Starting analysis");

    let cancel = CancellationToken::new();
    let signal = cancel.cancel_on_ctrl_c();

    let result = pipeline::run(files, config, provider, &cancel).await;
    signal.abort();
    let result = result?;

    log_report(&result.report);
    if result.report.is_partial() {
        warn!(
            cancelled = result.report.counts.cancelled,
            "Run was interrupted, report is partial"
        );
    }

    write_report(output, &result.report, gzip)?;

    if let Some(path) = insights_csv {
        write_insights(path, &result.insights)?;
        info!(path = %path.display(), rows = result.insights.len(), "Insights written");
    }

    if let Some(bucket) = s3_bucket {
        let s3 = client_from_env().await;
        let stem = result.report.generated_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
        let key = report_key(s3_prefix, &stem);
        info!(bucket = %bucket, key = %key, gzip, "S3 upload enabled");
        write_json_to_s3(&s3, &bucket, &key, &result.report, gzip).await?;
    }

    Ok(())
}
