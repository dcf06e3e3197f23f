//! Loading game records into the training window.
//!
//! Each file is read, parsed and replayed on the blocking pool. At most
//! `workers` loads are in flight; results are merged in dispatch order and
//! every merge dispatches the next file. Corrupt files are deleted at merge
//! time, so files whose results are dropped stay untouched.

use engine_core::{require_action_index, EnvError, Environment, GameRecord, RecordError};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::window::{DatasetWindow, TrainingExample};

/// Result of loading one file.
#[derive(Debug)]
pub enum FileLoad {
    Loaded(Vec<TrainingExample>),
    /// Unreadable, unparseable or not replayable
    Corrupt(String),
    /// Disappeared before it could be read
    Missing,
}

/// Replay `record` from its initial position, one example per ply.
pub fn replay_record(
    env: &dyn Environment,
    record: &GameRecord,
) -> Result<Vec<TrainingExample>, EnvError> {
    let num_actions = env.action_labels().len();
    let mut state = record.initial_state.clone();
    let mut examples = Vec::with_capacity(record.steps.len());

    for (action, value) in &record.steps {
        let index = require_action_index(env, action)?;
        let mut policy = vec![0.0; num_actions];
        policy[index] = 1.0;

        examples.push(TrainingExample {
            state: env.encode(&state)?,
            policy,
            value: *value,
        });
        state = env.step(&state, action)?;
    }

    Ok(examples)
}

/// Read and replay a single game-record file.
pub fn load_file(env: &dyn Environment, path: &Path) -> FileLoad {
    let record = match GameRecord::read(path) {
        Ok(record) => record,
        Err(RecordError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            return FileLoad::Missing;
        }
        Err(e) => return FileLoad::Corrupt(e.to_string()),
    };

    match replay_record(env, &record) {
        Ok(examples) => FileLoad::Loaded(examples),
        Err(e) => FileLoad::Corrupt(format!("replay failed: {e}")),
    }
}

/// What one fill pass did.
#[derive(Debug, Default)]
pub struct FillReport {
    /// Files whose examples were merged, in merge order
    pub merged: Vec<PathBuf>,
    pub corrupt: usize,
    pub missing: usize,
    /// Examples merged (including any later evicted)
    pub examples: usize,
    /// In-flight loads discarded because the window filled
    pub discarded: usize,
}

fn dispatch(
    env: &Arc<dyn Environment>,
    queue: &mut impl Iterator<Item = PathBuf>,
    in_flight: &mut VecDeque<(PathBuf, JoinHandle<FileLoad>)>,
) {
    if let Some(path) = queue.next() {
        let env = Arc::clone(env);
        let task_path = path.clone();
        let handle = tokio::task::spawn_blocking(move || load_file(env.as_ref(), &task_path));
        in_flight.push_back((path, handle));
    }
}

/// Load files from `queue` into `window` until it is full or the queue runs
/// out, with at most `workers` loads in flight.
pub async fn fill_window(
    env: Arc<dyn Environment>,
    queue: Vec<PathBuf>,
    window: &mut DatasetWindow,
    workers: usize,
) -> FillReport {
    let mut report = FillReport::default();
    let mut queue = queue.into_iter();
    let mut in_flight = VecDeque::with_capacity(workers);

    for _ in 0..workers.max(1) {
        dispatch(&env, &mut queue, &mut in_flight);
    }

    while let Some((path, handle)) = in_flight.pop_front() {
        match handle.await {
            Ok(FileLoad::Loaded(examples)) => {
                report.examples += examples.len();
                window.extend(examples);
                report.merged.push(path);
            }
            Ok(FileLoad::Corrupt(reason)) => {
                warn!(path = %path.display(), reason = %reason, "Deleting corrupt game record");
                report.corrupt += 1;
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), "Failed to delete corrupt game record: {}", e);
                }
            }
            Ok(FileLoad::Missing) => {
                debug!(path = %path.display(), "Game record vanished before loading");
                report.missing += 1;
            }
            Err(e) => warn!(path = %path.display(), "Load task failed: {}", e),
        }

        if window.is_full() {
            break;
        }
        dispatch(&env, &mut queue, &mut in_flight);
    }

    // Loads still running when the window filled: wait, then drop their data.
    for (path, handle) in in_flight {
        let _ = handle.await;
        debug!(path = %path.display(), "Discarding load, window full");
        report.discarded += 1;
    }

    report
}
