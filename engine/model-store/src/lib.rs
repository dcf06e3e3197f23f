//! Checkpoint store for the evolver's `best` and `candidate` models.
//!
//! Each role lives in its own directory under the model directory:
//!
//! ```text
//! model/
//!   best/       config.json + weights.json
//!   candidate/  config.json + weights.json
//! ```
//!
//! Saves go through a staging directory that replaces the role directory by
//! renames, so a reader either sees the old complete pair, the new complete
//! pair, or (for an instant) no pair at all. A partial pair is reported as
//! missing rather than loaded. If a swap is cut short after the old pair was
//! retired, the next read moves the retired pair back into place.
//!
//! The digest of a checkpoint is the SHA-256 of its weights file. Other
//! processes (an external evaluator, the `promote` command) may replace
//! `best` at any time; [`CheckpointStore::needs_reload`] detects that by
//! comparing digests.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use engine_core::{NetError, PolicyValueNet};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File holding the network configuration inside a role directory
pub const CONFIG_FILE: &str = "config.json";

/// File holding the network weights inside a role directory
pub const WEIGHTS_FILE: &str = "weights.json";

/// Which checkpoint slot a model occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Feeds self-play and default training initialisation
    Best,
    /// Produced by training, awaiting an evaluator's decision
    Candidate,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Best => "best",
            Role::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("no {0} checkpoint present")]
    Missing(Role),
}

/// A complete (config, weights) pair read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub role: Role,
    pub config: Vec<u8>,
    pub weights: Vec<u8>,
    pub digest: String,
}

/// Hex SHA-256 of `bytes`.
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads `path`, mapping a missing file to `None`.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// Persists and loads model checkpoints by role.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    model_dir: PathBuf,
}

impl CheckpointStore {
    /// Open the store, creating the model directory if needed.
    pub fn new(model_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let model_dir = model_dir.as_ref().to_path_buf();
        fs::create_dir_all(&model_dir).map_err(io_err(&model_dir))?;
        Ok(Self { model_dir })
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn role_dir(&self, role: Role) -> PathBuf {
        self.model_dir.join(role.as_str())
    }

    pub fn config_path(&self, role: Role) -> PathBuf {
        self.role_dir(role).join(CONFIG_FILE)
    }

    pub fn weights_path(&self, role: Role) -> PathBuf {
        self.role_dir(role).join(WEIGHTS_FILE)
    }

    fn staging_dir(&self, role: Role) -> PathBuf {
        self.model_dir.join(format!(".{}.staging", role.as_str()))
    }

    fn retired_dir(&self, role: Role) -> PathBuf {
        self.model_dir.join(format!(".{}.old", role.as_str()))
    }

    /// Whether both files of `role` are present.
    pub fn exists(&self, role: Role) -> bool {
        self.config_path(role).is_file() && self.weights_path(role).is_file()
    }

    /// Save `net` under `role` and return the new weights digest.
    pub fn save(&self, role: Role, net: &dyn PolicyValueNet) -> Result<String, StoreError> {
        let staging = self.staging_dir(role);
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging).map_err(io_err(&staging))?;

        net.save(&staging.join(CONFIG_FILE), &staging.join(WEIGHTS_FILE))?;

        let weights_path = staging.join(WEIGHTS_FILE);
        let weights = fs::read(&weights_path).map_err(io_err(&weights_path))?;
        let digest = digest_bytes(&weights);

        self.replace_role_dir(&staging, role)?;
        info!(role = %role, digest = %short(&digest), "Checkpoint saved");
        Ok(digest)
    }

    /// Put back a retired pair left behind by an interrupted swap.
    fn recover(&self, role: Role) -> Result<(), StoreError> {
        let target = self.role_dir(role);
        let retired = self.retired_dir(role);
        if target.exists() || !retired.is_dir() {
            return Ok(());
        }

        fs::rename(&retired, &target).map_err(io_err(&retired))?;
        warn!(role = %role, "Restored checkpoint retired by an interrupted swap");
        Ok(())
    }

    /// Swap `source` in as the directory of `role`.
    fn replace_role_dir(&self, source: &Path, role: Role) -> Result<(), StoreError> {
        let target = self.role_dir(role);
        let retired = self.retired_dir(role);

        self.recover(role)?;
        remove_dir_if_exists(&retired)?;
        if target.exists() {
            fs::rename(&target, &retired).map_err(io_err(&target))?;
        }
        fs::rename(source, &target).map_err(io_err(&target))?;

        if let Err(e) = remove_dir_if_exists(&retired) {
            warn!(role = %role, error = %e, "Failed to remove retired checkpoint");
        }
        Ok(())
    }

    /// Read the pair stored under `role`; `None` unless both files exist.
    pub fn load(&self, role: Role) -> Result<Option<Checkpoint>, StoreError> {
        self.recover(role)?;
        let Some(config) = read_optional(&self.config_path(role))? else {
            debug!(role = %role, "No checkpoint config on disk");
            return Ok(None);
        };
        let Some(weights) = read_optional(&self.weights_path(role))? else {
            debug!(role = %role, "Checkpoint config present without weights");
            return Ok(None);
        };

        let digest = digest_bytes(&weights);
        Ok(Some(Checkpoint {
            role,
            config,
            weights,
            digest,
        }))
    }

    /// Load `role` into `net`. Returns the loaded digest, or `None` if absent.
    pub fn load_into(
        &self,
        role: Role,
        net: &mut dyn PolicyValueNet,
    ) -> Result<Option<String>, StoreError> {
        let Some(digest) = self.digest(role)? else {
            return Ok(None);
        };
        if !net.load(&self.config_path(role), &self.weights_path(role))? {
            return Ok(None);
        }

        // Another process may have replaced the pair between hashing and
        // loading; report what is on disk now.
        let digest = self.digest(role)?.unwrap_or(digest);
        info!(role = %role, digest = %short(&digest), "Checkpoint loaded");
        Ok(Some(digest))
    }

    /// Digest of the weights stored under `role`, if a complete pair exists.
    pub fn digest(&self, role: Role) -> Result<Option<String>, StoreError> {
        self.recover(role)?;
        if !self.config_path(role).is_file() {
            return Ok(None);
        }
        Ok(read_optional(&self.weights_path(role))?.map(|w| digest_bytes(&w)))
    }

    /// Whether the on-disk `best` differs from the digest held in memory.
    pub fn needs_reload(&self, current: Option<&str>) -> Result<bool, StoreError> {
        let Some(current) = current else {
            return Ok(true);
        };
        Ok(self.digest(Role::Best)?.as_deref() != Some(current))
    }

    /// Replace `best` with `candidate`. Returns the new `best` digest.
    pub fn promote(&self) -> Result<String, StoreError> {
        let Some(digest) = self.digest(Role::Candidate)? else {
            return Err(StoreError::Missing(Role::Candidate));
        };

        self.replace_role_dir(&self.role_dir(Role::Candidate), Role::Best)?;
        info!(digest = %short(&digest), "Candidate promoted to best");
        Ok(digest)
    }

    /// Modification time of the weights stored under `role`.
    pub fn modified(&self, role: Role) -> Option<SystemTime> {
        self.weights_path(role)
            .metadata()
            .and_then(|m| m.modified())
            .ok()
    }
}

/// First 12 hex characters of a digest, for log lines.
pub fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
