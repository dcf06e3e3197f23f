//! Evolver - self-play / train / evaluate loop
//!
//! A long-running process that:
//! 1. Runs a self-play engine until `<data_dir>/play_data/` holds enough game records
//! 2. Streams those records through a bounded window into the trainer
//! 3. Saves the result under `<data_dir>/model/` and archives consumed records
//! 4. Optionally runs an evaluator that may promote the candidate to best

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use engine_core::{
    create_environment, list_record_files, list_registered_environments, PolicyValueNet,
};
use model_store::{short, CheckpointStore, Role};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

mod arbiter;
mod cancel;
mod config;
mod controller;
mod evaluation;
mod metrics;
mod monitor;
mod net;
mod pipeline;
mod process;
mod selfplay;

use crate::cancel::CancelToken;
use crate::config::{Config, ARCHIVE_DIR, CENTRAL_CONFIG, MODEL_DIR, PLAY_DATA_DIR};
use crate::controller::EvolutionController;
use crate::evaluation::CommandEvaluator;
use crate::monitor::SelfPlayMonitor;
use crate::net::LinearPolicyValueNet;
use crate::pipeline::{LearningRateSchedule, TrainingPipeline};
use crate::process::CommandLine;
use crate::selfplay::CommandSelfPlay;

/// Learning rate for a fresh model when the schedule has no entry yet.
const DEFAULT_LEARNING_RATE: f64 = 0.01;

#[derive(Parser, Debug)]
#[command(name = "evolver")]
#[command(about = "Self-play / train / evaluate loop for game-playing agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the evolution loop
    Run(Config),
    /// Replace the best checkpoint with the candidate
    Promote(StoreArgs),
    /// Show checkpoints and record counts
    Status(StoreArgs),
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[arg(long, default_value_t = CENTRAL_CONFIG.common.data_dir.clone())]
    data_dir: String,

    #[arg(long, default_value_t = CENTRAL_CONFIG.common.log_level.clone())]
    log_level: String,
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Resolves once SIGINT (or SIGTERM on unix) arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
}

fn create_dirs(dirs: &[PathBuf]) -> Result<()> {
    for dir in dirs {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let config = config.with_central_fallbacks();
    config.validate()?;

    init_tracing(&config.log_level)?;
    info!("Configuration validated successfully");
    metrics::init_metrics();
    info!(
        data_dir = %config.data_dir,
        env_id = %config.env_id,
        log_level = %config.log_level,
        "Evolver starting"
    );

    create_dirs(&[
        config.play_data_dir(),
        config.archive_dir(),
        config.model_dir(),
    ])?;

    games_tictactoe::register_tictactoe();
    let env = create_environment(&config.env_id).ok_or_else(|| {
        anyhow!(
            "Unknown environment '{}'; registered: {:?}",
            config.env_id,
            list_registered_environments()
        )
    })?;

    let store = CheckpointStore::new(config.model_dir())?;
    let pipeline_config = config.pipeline_config()?;
    let learning_rate = LearningRateSchedule::new(pipeline_config.lr_schedule.clone())
        .rate_at(config.start_total_steps)
        .unwrap_or(DEFAULT_LEARNING_RATE);
    let net: Box<dyn PolicyValueNet> = Box::new(LinearPolicyValueNet::new(
        env.observation_size(),
        env.action_labels().len(),
        learning_rate,
    ));
    let pipeline = TrainingPipeline::new(pipeline_config, env, store.clone(), net);

    let self_play = CommandLine::parse(&config.expand_command(&config.self_play_command))
        .context("Invalid self-play command")?;
    let monitor = SelfPlayMonitor::new(
        config.play_data_dir(),
        Arc::new(CommandSelfPlay::new(self_play)),
        config.poll_interval(),
        config.self_play_timeout(),
        config.shutdown_grace(),
    );

    let stop = CancelToken::new();
    let mut controller = EvolutionController::new(
        monitor,
        pipeline,
        store.clone(),
        config.arbiter_config(),
        stop.clone(),
    )
    .with_metrics_path(config.metrics_path());

    if !config.skip_evaluation {
        let command = CommandLine::parse(&config.expand_command(&config.evaluation_command))
            .context("Invalid evaluation command")?;
        controller = controller.with_evaluator(Arc::new(CommandEvaluator::new(command, store)));
    }

    // Setup graceful shutdown
    let shutdown_stop = stop.clone();
    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping after the current step...");
        shutdown_stop.cancel();
    });

    let summary = controller
        .run(config.max_iterations, config.skip_evaluation)
        .await;
    shutdown_handle.abort();

    summary.log();
    if let Err(e) = metrics::write_snapshot(&config.metrics_path()) {
        warn!("Failed to write final metrics snapshot: {:#}", e);
    }
    Ok(())
}

fn promote(args: StoreArgs) -> Result<()> {
    init_tracing(&args.log_level)?;
    let store = CheckpointStore::new(Path::new(&args.data_dir).join(MODEL_DIR))?;
    let digest = store.promote()?;
    println!("best = {}", digest);
    Ok(())
}

fn describe(store: &CheckpointStore, role: Role) -> Result<String> {
    let Some(digest) = store.digest(role)? else {
        return Ok("missing".to_string());
    };
    let age = store
        .modified(role)
        .and_then(|m| m.elapsed().ok())
        .map(|d| format!(", saved {}s ago", d.as_secs()))
        .unwrap_or_default();
    Ok(format!("{}{}", short(&digest), age))
}

fn count_records(dir: &Path) -> Result<usize> {
    Ok(list_record_files(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .len())
}

fn status(args: StoreArgs) -> Result<()> {
    init_tracing(&args.log_level)?;
    let data_dir = PathBuf::from(&args.data_dir);
    let store = CheckpointStore::new(data_dir.join(MODEL_DIR))?;

    println!("best:      {}", describe(&store, Role::Best)?);
    println!("candidate: {}", describe(&store, Role::Candidate)?);
    println!("active:    {}", count_records(&data_dir.join(PLAY_DATA_DIR))?);
    println!("archived:  {}", count_records(&data_dir.join(ARCHIVE_DIR))?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(config) => run(config).await,
        Command::Promote(args) => promote(args),
        Command::Status(args) => status(args),
    }
}
