//! Prometheus metrics for the evolution loop.
//!
//! There is no scrape endpoint; the registry is written as a text-exposition
//! snapshot to `<data_dir>/metrics.prom` at every cooldown.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use crate::pipeline::RoundReport;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== Iterations ==========

    /// Iterations started
    pub static ref ITERATIONS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_iterations_total", "Total number of iterations started")
    ).unwrap();

    pub static ref ROUNDS_COMPLETED: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_rounds_completed_total", "Iterations that finished every phase")
    ).unwrap();

    pub static ref ROUNDS_INTERRUPTED: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_rounds_interrupted_total", "Iterations cut short by a stop request")
    ).unwrap();

    /// Aborted rounds, labelled by the phase that failed
    pub static ref ROUND_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("evolver_round_failures_total", "Rounds aborted by a phase failure"),
        &["phase"]
    ).unwrap();

    pub static ref EVALUATION_FAILURES: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_evaluation_failures_total", "Evaluations that failed (non-fatal)")
    ).unwrap();

    pub static ref PROMOTIONS: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_promotions_total", "Candidates promoted to best")
    ).unwrap();

    // ========== Data Pipeline ==========

    pub static ref FILES_LOADED: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_files_loaded_total", "Game records merged into the window")
    ).unwrap();

    pub static ref FILES_CORRUPT: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_files_corrupt_total", "Corrupt game records deleted")
    ).unwrap();

    pub static ref FILES_ARCHIVED: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_files_archived_total", "Game records moved to the archive")
    ).unwrap();

    pub static ref ARCHIVE_FAILURES: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_archive_failures_total", "Game records that could not be archived")
    ).unwrap();

    pub static ref WINDOW_EXAMPLES: IntGauge = IntGauge::with_opts(
        Opts::new("evolver_window_examples", "Examples handed to the trainer in the last round")
    ).unwrap();

    pub static ref ACTIVE_FILES: IntGauge = IntGauge::with_opts(
        Opts::new("evolver_active_files", "Unconsumed game records on disk")
    ).unwrap();

    pub static ref ARCHIVED_FILES: IntGauge = IntGauge::with_opts(
        Opts::new("evolver_archived_files", "Game records in the archive directory")
    ).unwrap();

    // ========== Training ==========

    pub static ref TRAINING_STEPS: IntCounter = IntCounter::with_opts(
        Opts::new("evolver_training_steps_total", "Optimizer steps taken by this process")
    ).unwrap();

    /// Global step counter, including the configured starting offset
    pub static ref TOTAL_STEPS: IntGauge = IntGauge::with_opts(
        Opts::new("evolver_total_steps", "Global training step counter")
    ).unwrap();

    pub static ref LEARNING_RATE: Gauge = Gauge::with_opts(
        Opts::new("evolver_learning_rate", "Learning rate in force")
    ).unwrap();

    // ========== Phases ==========

    pub static ref PHASE_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("evolver_phase_duration_seconds", "Wall time spent per phase")
            .buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]),
        &["phase"]
    ).unwrap();
}

static INIT: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(ITERATIONS_TOTAL.clone())).unwrap();
        REGISTRY.register(Box::new(ROUNDS_COMPLETED.clone())).unwrap();
        REGISTRY
            .register(Box::new(ROUNDS_INTERRUPTED.clone()))
            .unwrap();
        REGISTRY.register(Box::new(ROUND_FAILURES.clone())).unwrap();
        REGISTRY
            .register(Box::new(EVALUATION_FAILURES.clone()))
            .unwrap();
        REGISTRY.register(Box::new(PROMOTIONS.clone())).unwrap();
        REGISTRY.register(Box::new(FILES_LOADED.clone())).unwrap();
        REGISTRY.register(Box::new(FILES_CORRUPT.clone())).unwrap();
        REGISTRY.register(Box::new(FILES_ARCHIVED.clone())).unwrap();
        REGISTRY.register(Box::new(ARCHIVE_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(WINDOW_EXAMPLES.clone())).unwrap();
        REGISTRY.register(Box::new(ACTIVE_FILES.clone())).unwrap();
        REGISTRY.register(Box::new(ARCHIVED_FILES.clone())).unwrap();
        REGISTRY.register(Box::new(TRAINING_STEPS.clone())).unwrap();
        REGISTRY.register(Box::new(TOTAL_STEPS.clone())).unwrap();
        REGISTRY.register(Box::new(LEARNING_RATE.clone())).unwrap();
        REGISTRY.register(Box::new(PHASE_DURATION.clone())).unwrap();
    });
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Write the current snapshot to `path` (temp file, then rename).
pub fn write_snapshot(path: &Path) -> Result<()> {
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, encode_metrics())
        .with_context(|| format!("writing metrics to {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming metrics to {}", path.display()))?;
    Ok(())
}

pub fn record_round(report: &RoundReport) {
    FILES_LOADED.inc_by(report.files_loaded as u64);
    FILES_CORRUPT.inc_by(report.corrupt_files as u64);
    FILES_ARCHIVED.inc_by(report.archived as u64);
    ARCHIVE_FAILURES.inc_by(report.archive_failures as u64);
    TRAINING_STEPS.inc_by(report.steps);
    WINDOW_EXAMPLES.set(report.examples as i64);
    TOTAL_STEPS.set(report.total_steps as i64);
    if let Some(rate) = report.learning_rate {
        LEARNING_RATE.set(rate);
    }
}

pub fn record_phase(phase: &str, elapsed: Duration) {
    PHASE_DURATION
        .with_label_values(&[phase])
        .observe(elapsed.as_secs_f64());
}

pub fn record_failure(phase: &str) {
    ROUND_FAILURES.with_label_values(&[phase]).inc();
}
