//! Self-play monitor: run the self-play job until enough game records exist.
//!
//! The play-data directory is the only signal between the evolver and the
//! self-play job. It is re-counted on a fixed poll tick and, when a notify
//! watcher can be created, also whenever a record appears. Filesystem events
//! only shorten latency; correctness rests on polling.

use anyhow::{Context, Result};
use engine_core::{is_record_file, list_record_files, ResourceAssignment};
use indicatif::{ProgressBar, ProgressStyle};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::selfplay::SelfPlayEngine;

/// Why the monitor stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The file count reached the target
    Reached,
    /// The job exited cleanly before the target
    Exhausted,
    /// The timeout elapsed first
    TimedOut,
    /// A stop was requested
    Interrupted,
    /// The job failed to start or exited with an error
    Failed(String),
}

impl fmt::Display for MonitorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorOutcome::Reached => f.write_str("reached"),
            MonitorOutcome::Exhausted => f.write_str("exhausted"),
            MonitorOutcome::TimedOut => f.write_str("timed out"),
            MonitorOutcome::Interrupted => f.write_str("interrupted"),
            MonitorOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub outcome: MonitorOutcome,
    /// Active record count when the monitor stopped waiting
    pub files: usize,
    /// Whether the self-play job was started this round
    pub launched: bool,
    pub elapsed: Duration,
}

pub struct SelfPlayMonitor {
    play_data_dir: PathBuf,
    engine: Arc<dyn SelfPlayEngine>,
    poll_interval: Duration,
    timeout: Duration,
    shutdown_grace: Duration,
}

impl SelfPlayMonitor {
    pub fn new(
        play_data_dir: impl Into<PathBuf>,
        engine: Arc<dyn SelfPlayEngine>,
        poll_interval: Duration,
        timeout: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            play_data_dir: play_data_dir.into(),
            engine,
            poll_interval,
            timeout,
            shutdown_grace,
        }
    }

    pub fn count_files(&self) -> Result<usize> {
        let files = list_record_files(&self.play_data_dir)
            .with_context(|| format!("listing {}", self.play_data_dir.display()))?;
        Ok(files.len())
    }

    /// Make sure at least `target` active records exist, running self-play
    /// on `device` if they do not.
    pub async fn ensure_enough_data(
        &self,
        target: usize,
        device: ResourceAssignment,
        stop: &CancelToken,
    ) -> Result<MonitorReport> {
        let started = Instant::now();
        let current = self.count_files()?;

        if current >= target {
            info!(current, target, "Enough game records already present");
            return Ok(MonitorReport {
                outcome: MonitorOutcome::Reached,
                files: current,
                launched: false,
                elapsed: started.elapsed(),
            });
        }
        if stop.is_cancelled() {
            return Ok(MonitorReport {
                outcome: MonitorOutcome::Interrupted,
                files: current,
                launched: false,
                elapsed: started.elapsed(),
            });
        }

        info!(
            current,
            target,
            needed = target - current,
            device = %device,
            "Starting self-play"
        );

        let round = stop.child();
        let job_token = round.clone();
        let engine = Arc::clone(&self.engine);
        let mut job = tokio::spawn(async move { engine.run(device, job_token).await });

        let (event_tx, mut events) = mpsc::channel(16);
        let _watcher = watch_records(&self.play_data_dir, event_tx);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let progress = progress_bar(target, current);
        let mut files = current;
        let mut job_finished = false;

        let outcome = loop {
            match self.count_files() {
                Ok(count) => {
                    if count != files {
                        debug!(count, target, "Game record count changed");
                    }
                    files = count;
                }
                Err(e) => warn!("Failed to count game records: {:#}", e),
            }
            if let Some(pb) = &progress {
                pb.set_position(files.min(target) as u64);
            }

            if files >= target {
                break MonitorOutcome::Reached;
            }
            if stop.is_cancelled() {
                break MonitorOutcome::Interrupted;
            }
            if job.is_finished() {
                job_finished = true;
                break match (&mut job).await {
                    Ok(Ok(())) => MonitorOutcome::Exhausted,
                    Ok(Err(e)) => MonitorOutcome::Failed(format!("{e:#}")),
                    Err(e) => MonitorOutcome::Failed(e.to_string()),
                };
            }
            if started.elapsed() > self.timeout {
                break MonitorOutcome::TimedOut;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = events.recv() => {}
                _ = stop.cancelled() => {}
            }
        };

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        round.cancel();
        if !job_finished {
            match timeout(self.shutdown_grace, &mut job).await {
                Ok(Ok(Ok(()))) => debug!("Self-play job stopped"),
                Ok(Ok(Err(e))) => warn!("Self-play job ended with error after cancel: {:#}", e),
                Ok(Err(e)) => warn!("Self-play task panicked: {}", e),
                Err(_) => {
                    warn!(
                        grace_secs = self.shutdown_grace.as_secs(),
                        "Self-play job did not stop within grace period, abandoning it"
                    );
                    job.abort();
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            outcome = %outcome,
            files,
            target,
            elapsed_secs = %format!("{:.1}", elapsed.as_secs_f64()),
            "Self-play finished"
        );

        Ok(MonitorReport {
            outcome,
            files,
            launched: true,
            elapsed,
        })
    }
}

/// Start a watcher that nudges `tx` when a record appears in `dir`.
///
/// Returns `None` (polling only) when the platform watcher is unavailable.
fn watch_records(dir: &Path, tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let handler = move |res: Result<Event, notify::Error>| match res {
        Ok(event) => {
            let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                && event.paths.iter().any(|p| is_record_file(p));
            if relevant {
                // A full channel already has a pending nudge.
                let _ = tx.try_send(());
            }
        }
        Err(e) => warn!("File watcher error: {}", e),
    };

    let mut watcher = match recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!("Failed to create file watcher, polling only: {}", e);
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {}, polling only: {}", dir.display(), e);
        return None;
    }
    Some(watcher)
}

fn progress_bar(target: usize, current: usize) -> Option<ProgressBar> {
    if !std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        return None;
    }
    let pb = ProgressBar::new(target as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} game records ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_position(current.min(target) as u64);
    Some(pb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use engine_core::{record_file_name, GameRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn write_records(dir: &Path, n: usize) {
        for _ in 0..n {
            GameRecord::new("s")
                .write_atomic(&dir.join(record_file_name()))
                .unwrap();
        }
    }

    /// Writes `per_tick` records every 10ms until cancelled or `limit` is hit.
    struct Writer {
        dir: PathBuf,
        per_tick: usize,
        limit: Option<usize>,
        launches: AtomicUsize,
    }

    impl Writer {
        fn new(dir: &Path, per_tick: usize, limit: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                dir: dir.to_path_buf(),
                per_tick,
                limit,
                launches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SelfPlayEngine for Writer {
        async fn run(&self, _device: ResourceAssignment, cancel: CancelToken) -> Result<()> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let mut written = 0;
            while !cancel.is_cancelled() {
                if self.limit.is_some_and(|limit| written >= limit) {
                    return Ok(());
                }
                write_records(&self.dir, self.per_tick);
                written += self.per_tick;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl SelfPlayEngine for Broken {
        async fn run(&self, _device: ResourceAssignment, _cancel: CancelToken) -> Result<()> {
            Err(anyhow!("engine crashed"))
        }
    }

    /// Ignores cancellation entirely.
    struct Stubborn;

    #[async_trait]
    impl SelfPlayEngine for Stubborn {
        async fn run(&self, _device: ResourceAssignment, _cancel: CancelToken) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn monitor(dir: &Path, engine: Arc<dyn SelfPlayEngine>, timeout: Duration) -> SelfPlayMonitor {
        SelfPlayMonitor::new(
            dir,
            engine,
            Duration::from_millis(20),
            timeout,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_target_already_met_launches_nothing() {
        let dir = tempdir().unwrap();
        write_records(dir.path(), 100);
        let writer = Writer::new(dir.path(), 1, None);

        let report = monitor(dir.path(), writer.clone(), Duration::from_secs(5))
            .ensure_enough_data(100, ResourceAssignment::Accelerated, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, MonitorOutcome::Reached);
        assert!(!report.launched);
        assert_eq!(report.files, 100);
        assert_eq!(writer.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_runs_until_target_reached() {
        let dir = tempdir().unwrap();
        write_records(dir.path(), 3);
        let writer = Writer::new(dir.path(), 2, None);

        let report = monitor(dir.path(), writer.clone(), Duration::from_secs(10))
            .ensure_enough_data(20, ResourceAssignment::Accelerated, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, MonitorOutcome::Reached);
        assert!(report.launched);
        assert!(report.files >= 20);
        assert_eq!(writer.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_exiting_early_is_exhausted() {
        let dir = tempdir().unwrap();
        let writer = Writer::new(dir.path(), 1, Some(3));

        let report = monitor(dir.path(), writer, Duration::from_secs(10))
            .ensure_enough_data(50, ResourceAssignment::General, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, MonitorOutcome::Exhausted);
        assert_eq!(report.files, 3);
    }

    #[tokio::test]
    async fn test_job_failure_is_reported() {
        let dir = tempdir().unwrap();

        let report = monitor(dir.path(), Arc::new(Broken), Duration::from_secs(10))
            .ensure_enough_data(5, ResourceAssignment::General, &CancelToken::new())
            .await
            .unwrap();

        assert!(matches!(report.outcome, MonitorOutcome::Failed(ref e) if e.contains("crashed")));
    }

    #[tokio::test]
    async fn test_timeout_abandons_stubborn_job() {
        let dir = tempdir().unwrap();
        let started = Instant::now();

        let report = monitor(dir.path(), Arc::new(Stubborn), Duration::from_millis(100))
            .ensure_enough_data(5, ResourceAssignment::General, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, MonitorOutcome::TimedOut);
        // Timeout plus grace, never the job's own hour
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_request_interrupts() {
        let dir = tempdir().unwrap();
        let stop = CancelToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let writer = Writer::new(dir.path(), 1, None);
        let report = monitor(dir.path(), writer, Duration::from_secs(30))
            .ensure_enough_data(1_000_000, ResourceAssignment::General, &stop)
            .await
            .unwrap();

        assert_eq!(report.outcome, MonitorOutcome::Interrupted);
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_round_cancel_does_not_stop_process() {
        let dir = tempdir().unwrap();
        let stop = CancelToken::new();
        let writer = Writer::new(dir.path(), 5, None);

        monitor(dir.path(), writer, Duration::from_secs(10))
            .ensure_enough_data(10, ResourceAssignment::General, &stop)
            .await
            .unwrap();

        assert!(!stop.is_cancelled());
    }
}
