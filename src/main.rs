use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use model_forge::config::ValidationPolicy;
use model_forge::dataset::{Table, ensure_dir};
use model_forge::manifest::{compute_sha256, write_sha256};
use model_forge::observability::{MetricsSnapshot, log_snapshot};
use model_forge::scaffold::write_scaffold;
use model_forge::{
    BlobStore, FsBlobStore, ModelPublisher, PipelineConfig, RunOutcome, StorageConnection,
    TrainingPipeline,
};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

const LOG_FILE_PREFIX: &str = "model-forge.log";

fn main() -> Result<()> {
    let Cli {
        command,
        log_dir,
        otlp_endpoint,
    } = Cli::parse();

    let _log_guard = configure_tracing(log_dir.as_deref(), otlp_endpoint.as_deref())?;

    let command_result = match command {
        Commands::Run {
            config,
            on_invalid,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        } => run_pipeline(
            &config,
            on_invalid,
            MetricsOutputs {
                print: print_metrics,
                json: metrics_json,
                prometheus: metrics_prometheus,
            },
        ),
        Commands::Check { config } => check_config(&config),
        Commands::Predict {
            config,
            input,
            output,
        } => predict(&config, &input, output.as_deref()),
        Commands::Init { output, force } => init_project(&output, force),
        Commands::Digest { path, output } => digest(&path, output.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "model-forge", &mut io::stdout());
            Ok(())
        }
    };

    #[cfg(feature = "otel")]
    if otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    command_result
}

/// Console output goes to stderr so command output on stdout stays clean.
/// With `log_dir`, a daily rolling file receives the same events.
fn configure_tracing(
    log_dir: Option<&Path>,
    otlp_endpoint: Option<&str>,
) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            ensure_dir(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(file_layer);

    #[cfg(feature = "otel")]
    {
        let otel_layer = match otlp_endpoint {
            Some(endpoint) => {
                let tracer = opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                        vec![KeyValue::new("service.name", "model-forge")],
                    )))
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint),
                    )
                    .install_simple()?;
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };
        registry
            .with(otel_layer)
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    #[cfg(not(feature = "otel"))]
    {
        if let Some(endpoint) = otlp_endpoint {
            eprintln!(
                "warning: --otlp-endpoint '{endpoint}' requested but OpenTelemetry support is \
                 not enabled. Rebuild with --features otel."
            );
        }
        registry
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    Ok(guard)
}

struct MetricsOutputs {
    print: bool,
    json: Option<PathBuf>,
    prometheus: Option<PathBuf>,
}

fn load_checked_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path)?;
    let report = config.check();
    for warning in &report.warnings {
        warn!(file = %path.display(), "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %path.display(), "{error_msg}");
        }
        return Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ));
    }
    Ok(config)
}

fn connect_store(config: &PipelineConfig) -> Result<Arc<dyn BlobStore>> {
    let connection = StorageConnection::from_env(&config.storage)?;
    Ok(Arc::new(FsBlobStore::new(connection)))
}

fn run_pipeline(
    config_path: &Path,
    on_invalid: Option<ValidationPolicy>,
    outputs: MetricsOutputs,
) -> Result<()> {
    let mut config = load_checked_config(config_path)?;
    if let Some(policy) = on_invalid {
        config.policy.on_invalid = policy;
    }

    let store = connect_store(&config)?;
    let digest = compute_sha256(config_path)?;
    let mut pipeline = TrainingPipeline::new(config, store)?.with_config_digest(digest);
    let metrics = pipeline.metrics();

    let result = pipeline.run();
    write_metrics(&metrics.snapshot(), &outputs)?;
    let report = result?;

    match &report.outcome {
        RunOutcome::Published(model) => info!(
            bucket = %model.bucket,
            key = %model.key,
            f1 = report.evaluation.trained_f1,
            artifacts = %report.artifact_dir.display(),
            "Model published"
        ),
        RunOutcome::Rejected => info!(
            trained_f1 = report.evaluation.trained_f1,
            baseline_f1 = ?report.evaluation.baseline_f1,
            artifacts = %report.artifact_dir.display(),
            "Model not published; baseline kept"
        ),
    }
    Ok(())
}

fn write_metrics(snapshot: &MetricsSnapshot, outputs: &MetricsOutputs) -> Result<()> {
    if outputs.print {
        log_snapshot(snapshot);
    }
    if let Some(path) = &outputs.json {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = &outputs.prometheus {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        std::fs::write(path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    load_checked_config(path)?;
    info!(file = %path.display(), "Config validation passed");
    Ok(())
}

fn predict(config_path: &Path, input: &Path, output: Option<&Path>) -> Result<()> {
    let config = PipelineConfig::load(config_path)?;
    let publisher = ModelPublisher::new(
        connect_store(&config)?,
        config.publisher.bucket.clone(),
        config.publisher.key.clone(),
    );
    let table = Table::read_csv(input)?;
    let predictions = publisher.predict(&table)?;

    let rows = predictions
        .iter()
        .map(|label| vec![format!("{}", *label as u8)])
        .collect();
    let result = Table::new(vec!["prediction".to_string()], rows);
    match output {
        Some(path) => {
            result.write_csv(path)?;
            info!(
                rows = result.row_count(),
                output = %path.display(),
                "Predictions written"
            );
        }
        None => print!("{}", result.to_csv_string()),
    }
    Ok(())
}

fn init_project(directory: &Path, force: bool) -> Result<()> {
    let scaffold = write_scaffold(directory, force)?;
    info!(
        config = %scaffold.config.display(),
        schema = %scaffold.schema.display(),
        "Starter project written"
    );
    Ok(())
}

fn digest(path: &Path, output: Option<&Path>) -> Result<()> {
    if let Some(out_path) = output {
        let digest = write_sha256(path, out_path)?;
        println!("{}  {}", digest, path.display());
        info!(
            file = %path.display(),
            digest_output = %out_path.display(),
            "SHA256 digest written"
        );
    } else {
        let digest = compute_sha256(path)?;
        println!("{}  {}", digest, path.display());
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "model-forge",
    version,
    about = "Train, gate and publish tabular classifiers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Also write logs to a daily rolling file in this directory.
    #[arg(long = "log-dir", global = true, value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,
    #[arg(long = "otlp-endpoint", global = true)]
    otlp_endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full training pipeline.
    Run {
        config: PathBuf,
        /// Overrides `policy.on_invalid` from the config file.
        #[arg(long = "on-invalid", value_enum)]
        on_invalid: Option<ValidationPolicy>,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
    },
    /// Validate a pipeline config and its schema without running anything.
    Check { config: PathBuf },
    /// Score a CSV file with the published model.
    Predict {
        config: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a starter pipeline.yaml and schema.yaml.
    Init {
        #[arg(long, default_value = ".")]
        output: PathBuf,
        #[arg(long)]
        force: bool,
    },
    Digest {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
