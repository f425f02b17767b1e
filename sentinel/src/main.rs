//! RCA-Sentinel Main Binary
//!
//! Orchestrates the components of the RCA pipeline:
//! - Training: discretization, curation and causal structure learning
//! - Replay: archive replay of stored test data with ground truth
//! - Serve: online RCA over observations read from stdin
//! - Evaluate: offline KPIs over replay records

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rca_sentinel_benchmarks::{run_and_save_evaluation, EvaluationIO, DEFAULT_OUTPUT_DIR};
use rca_sentinel_core::config::Config;
use rca_sentinel_core::frame::{MetricFrame, Observation};
use rca_sentinel_core::sla::SlaMap;
use rca_sentinel_detection::rca::{actual_faults, RcaEngine, ServeStep};
use rca_sentinel_detection::training::{dataset_tag, split_dataset, TrainedModel, TrainingPipeline};
use rca_sentinel_storage::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// RCA-Sentinel CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "sentinel", version, about = "Causal root-cause analysis for microservice deployments")]
struct Cli {
    /// Configuration file path
    #[clap(short, long, default_value = "config/sentinel.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "SENTINEL_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[clap(long, env = "SENTINEL_LOG_JSON", global = true)]
    log_json: bool,

    /// Dry run mode (validate configuration and exit)
    #[clap(long, global = true)]
    dry_run: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Train a model on the configured training data and store it
    Train {
        /// Retrain even when a model is stored for the dataset
        #[clap(long)]
        force: bool,
    },
    /// Replay stored test data through the trained model, recording ground truth
    Replay {
        /// SLA file (JSON or YAML)
        #[clap(long)]
        sla: PathBuf,

        /// Drop observation columns unknown to the training matrix
        #[clap(long)]
        prune_unknown_columns: bool,
    },
    /// Analyse JSON observations read line by line from stdin
    Serve {
        /// SLA file (JSON or YAML)
        #[clap(long)]
        sla: PathBuf,

        /// Append incident reports to this JSON-lines file
        #[clap(long)]
        incident_log: Option<PathBuf>,
    },
    /// Compute KPIs over replay records
    Evaluate {
        /// Folder holding replay records (defaults to storage.output_folder)
        #[clap(long)]
        results: Option<PathBuf>,

        /// Output directory for the evaluation and its summary
        #[clap(long, default_value = DEFAULT_OUTPUT_DIR)]
        output: PathBuf,

        /// Seed for sampling normal rows
        #[clap(long, default_value_t = 42)]
        seed: u64,

        /// Output the evaluation as JSON to stdout
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli)?;

    info!("Starting RCA-Sentinel v{}", env!("CARGO_PKG_VERSION"));

    info!("Loading configuration from: {:?}", cli.config);
    let config = Config::from_file(&cli.config).context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    if cli.dry_run {
        info!("Dry run mode - configuration validated, exiting");
        return Ok(());
    }

    match cli.command {
        Commands::Train { force } => run_train_command(config, force).await,
        Commands::Replay {
            sla,
            prune_unknown_columns,
        } => run_replay_command(config, &sla, prune_unknown_columns).await,
        Commands::Serve { sla, incident_log } => {
            run_serve_command(config, &sla, incident_log).await
        }
        Commands::Evaluate {
            results,
            output,
            seed,
            json,
        } => {
            let results = results.unwrap_or_else(|| config.storage.output_folder.clone());
            run_evaluate_command(&results, &output, seed, json)
        }
    }
}

/// Train from the configured files, reusing a cached structure when the
/// discretized matrix is unchanged
fn train_model(config: &Config, store: &ArtifactStore) -> Result<TrainedModel> {
    if config.data.training_data.is_empty() {
        bail!("data.training_data lists no files");
    }
    let frame = MetricFrame::from_csv_paths(&config.data.training_data)
        .context("Failed to read training data")?;
    let (training, _) = split_dataset(&frame, &config.data);
    let tag = dataset_tag(&config.data.training_data);

    let pipeline = TrainingPipeline::new(config, store);
    let model = pipeline
        .train(training, &tag)
        .with_context(|| format!("Training failed for dataset {}", tag))?;
    store.save_model(&model).context("Failed to store trained model")?;
    Ok(model)
}

/// Stored model for the configured training files, training one if absent
async fn load_or_train(config: &Config, store: &ArtifactStore) -> Result<TrainedModel> {
    let tag = dataset_tag(&config.data.training_data);
    if let Some(model) = store.load_model(&tag).context("Failed to load stored model")? {
        return Ok(model);
    }
    info!(dataset = %tag, "No stored model, training");
    retrain(config, store).await
}

/// Run training off the async runtime
async fn retrain(config: &Config, store: &ArtifactStore) -> Result<TrainedModel> {
    let config = config.clone();
    let store = store.clone();
    tokio::task::spawn_blocking(move || train_model(&config, &store))
        .await
        .context("Training task panicked")?
}

/// Run the train subcommand
async fn run_train_command(config: Config, force: bool) -> Result<()> {
    let store = ArtifactStore::new(&config.storage);
    let tag = dataset_tag(&config.data.training_data);

    if !force {
        if let Some(model) = store.load_model(&tag)? {
            info!(
                dataset = %tag,
                trained_at = %model.trained_at,
                "Model already stored, use --force to retrain"
            );
            return Ok(());
        }
    }

    let model = retrain(&config, &store).await?;
    info!(
        dataset = %model.dataset_tag,
        model_type = model.model.model_type().as_str(),
        columns = model.training_data.n_cols(),
        rows = model.training_data.n_rows(),
        independent_nodes = model.independent_nodes().len(),
        training_seconds = model.training_seconds,
        path = %store.model_path(&model.dataset_tag).display(),
        "Training complete"
    );
    Ok(())
}

/// Run the replay subcommand
async fn run_replay_command(config: Config, sla_path: &Path, prune_unknown_columns: bool) -> Result<()> {
    let sla = SlaMap::from_path(sla_path)
        .with_context(|| format!("Failed to load SLA from {:?}", sla_path))?;
    let store = ArtifactStore::new(&config.storage);
    let model = load_or_train(&config, &store).await?;

    let test_files = if config.data.test_data.is_empty() {
        &config.data.training_data
    } else {
        &config.data.test_data
    };
    let frame = MetricFrame::from_csv_paths(test_files).context("Failed to read test data")?;
    let (_, test) = split_dataset(&frame, &config.data);

    let results = ResultStore::for_dataset(&config.storage.output_folder, &model.dataset_tag);
    let mut record = results.load_or_default().await?;
    if record.training_completion_time.is_none() {
        record.training_completion_time = Some(model.training_seconds);
    }
    let resume_from = record.test_results.len();

    let mut serving = config.serving.clone();
    serving.prune_unknown_columns |= prune_unknown_columns;
    let mut engine = RcaEngine::new(model, serving);

    info!(
        rows = test.n_rows(),
        resume_from,
        path = %results.path().display(),
        "Starting archive replay"
    );

    for observation in test.rows().skip(resume_from) {
        let actual = actual_faults(&observation, engine.classifier());
        match engine.serve_one(&observation, &sla) {
            ServeStep::Checked(mut result) => {
                result.actual_results = actual;
                record.test_results.push(result);
                results.save(&record).await?;
            }
            ServeStep::Skipped(e) => {
                warn!(error = %e, timestamp = ?observation.timestamp, "Skipping row");
            }
            ServeStep::Invalidated(metric) => {
                bail!(
                    "Model invalidated by unseen metric {}; retrain on data that includes it",
                    metric
                );
            }
        }
    }

    info!(
        rows = record.test_results.len(),
        incidents = record.test_results.iter().filter(|r| r.incident.is_some()).count(),
        "Archive replay complete"
    );
    Ok(())
}

/// Run the serve subcommand
async fn run_serve_command(
    config: Config,
    sla_path: &Path,
    incident_log: Option<PathBuf>,
) -> Result<()> {
    let sla = SlaMap::from_path(sla_path)
        .with_context(|| format!("Failed to load SLA from {:?}", sla_path))?;
    let store = ArtifactStore::new(&config.storage);
    let model = load_or_train(&config, &store).await?;
    let mut engine = RcaEngine::new(model, config.serving.clone());

    let reporter: Arc<dyn IncidentReporter> = match incident_log {
        Some(path) => Arc::new(JsonLinesReporter::new(
            path,
            config.serving.reporting_identifier.clone(),
        )),
        None => Arc::new(NoopReporter::new()),
    };
    reporter
        .health_check()
        .await
        .context("Incident reporter unavailable")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("Serving observations from stdin");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
                break;
            }
        };
        let Some(line) = line else {
            info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let observation: Observation = match serde_json::from_str(&line) {
            Ok(observation) => observation,
            Err(e) => {
                warn!(error = %e, "Skipping malformed observation");
                continue;
            }
        };

        let mut step = engine.serve_one(&observation, &sla);
        // Each accepted retrain covers one more metric of this row, so the
        // loop ends once the row is served or a retrain falls short.
        while let ServeStep::Invalidated(metric) = &step {
            warn!(metric = %metric, "Model invalidated, retraining");
            let model = retrain_with_backoff(&config, &store).await?;
            engine.install_retrained(model).with_context(|| {
                format!(
                    "Retrained model still lacks metric {}; add data containing it to data.training_data",
                    metric
                )
            })?;
            step = engine.serve_one(&observation, &sla);
        }

        if let ServeStep::Checked(result) = step {
            if let Some(incident) = &result.incident {
                if let Err(e) = reporter.report(incident).await {
                    error!(error = %e, incident_id = %incident.incident_id, "Failed to report incident");
                }
            }
            let mut json = serde_json::to_vec(&result)?;
            json.push(b'\n');
            stdout.write_all(&json).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

/// Retrain under the configured retry policy
async fn retrain_with_backoff(config: &Config, store: &ArtifactStore) -> Result<TrainedModel> {
    let policy = &config.serving.retrain;
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.backoff(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        ::metrics::counter!("sentinel_retrain_attempts_total").increment(1);

        match retrain(config, store).await {
            Ok(model) => {
                info!(attempt, dataset = %model.dataset_tag, "Retrained model");
                return Ok(model);
            }
            Err(e) => {
                error!(attempt, max_attempts = policy.max_attempts, error = %format!("{:#}", e), "Retrain failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e.context(format!("Retrain failed after {} attempts", policy.max_attempts))),
        None => bail!("Retry policy allows no attempts"),
    }
}

/// Run the evaluate subcommand
fn run_evaluate_command(results: &Path, output: &Path, seed: u64, json_output: bool) -> Result<()> {
    info!("Evaluating replay records in {:?}", results);

    let io = EvaluationIO::new(results, output);
    let (evaluation, summary_path) = run_and_save_evaluation(&io, seed)?;

    if json_output {
        println!("{}", evaluation.to_json()?);
    } else {
        println!("{}", evaluation);
    }

    info!("Evaluation written to: {:?}", output);
    info!("Summary written to: {:?}", summary_path);
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down..."); },
        _ = terminate => { info!("Received SIGTERM, shutting down..."); },
    }
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("Invalid log level")?;

    if cli.log_json {
        // JSON structured logging
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .with(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(log_level.into()),
            )
            .init();
    } else {
        // Human-readable logging; stdout carries serve results
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .with(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(log_level.into()),
            )
            .init();
    }

    info!("Logging initialized at level: {}", log_level);

    Ok(())
}
