//! Game-record files written by self-play and consumed by training.
//!
//! A record is a JSON object:
//!
//! ```json
//! {"initial_state": "---------", "steps": [["4", 1.0], ["0", -1.0]]}
//! ```
//!
//! Active records live in the play-data directory as `play_<stamp>.json`,
//! where the stamp sorts lexicographically in production order. Writers make
//! a record visible only by renaming a `.tmp` sibling into place, so a reader
//! never observes a half-written file under the final name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File-name prefix of an active record
pub const RECORD_PREFIX: &str = "play_";

/// File extension of an active record
pub const RECORD_EXTENSION: &str = "json";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed game record {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One self-play game: a starting position and the moves played from it.
///
/// Each step carries the value target for the position *before* the move,
/// from the perspective of the player to move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub initial_state: String,
    pub steps: Vec<(String, f32)>,
}

impl GameRecord {
    pub fn new(initial_state: impl Into<String>) -> Self {
        Self {
            initial_state: initial_state.into(),
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, action: impl Into<String>, value: f32) {
        self.steps.push((action.into(), value));
    }

    pub fn read(path: &Path) -> Result<Self, RecordError> {
        let bytes = fs::read(path).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| RecordError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the record as `path` via a `.tmp` sibling and a rename.
    pub fn write_atomic(&self, path: &Path) -> Result<(), RecordError> {
        let io_err = |source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec(self).map_err(|source| RecordError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

/// A fresh, unique record file name: `play_<nanos>_<pid>_<seq>.json`.
pub fn record_file_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{RECORD_PREFIX}{nanos:020}_{:06}_{seq:06}.{RECORD_EXTENSION}",
        std::process::id()
    )
}

/// Whether `path` names an active record (temp files and strays are ignored).
pub fn is_record_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(RECORD_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
}

/// Active records in `dir`, oldest first. A missing directory has none.
pub fn list_record_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if is_record_file(&path) && entry.file_type()?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(record_file_name());

        let mut record = GameRecord::new("---------");
        record.push("4", 1.0);
        record.push("0", -1.0);
        record.write_atomic(&path).unwrap();

        assert_eq!(GameRecord::read(&path).unwrap(), record);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{"initial_state": "s0", "steps": [["a", 0.5], ["b", -0.5]]}"#;
        let record: GameRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.initial_state, "s0");
        assert_eq!(record.steps, vec![("a".into(), 0.5), ("b".into(), -0.5)]);
    }

    #[test]
    fn test_read_malformed_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("play_bad.json");
        fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            GameRecord::read(&path),
            Err(RecordError::Parse { .. })
        ));
    }

    #[test]
    fn test_list_ignores_tmp_and_strays() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("play_002.json"), b"{}").unwrap();
        fs::write(dir.path().join("play_001.json"), b"{}").unwrap();
        fs::write(dir.path().join("play_003.tmp"), b"{}").unwrap();
        fs::write(dir.path().join("notes.json"), b"{}").unwrap();
        fs::create_dir(dir.path().join("play_dir.json")).unwrap();

        let files = list_record_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["play_001.json", "play_002.json"]);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let files = list_record_files(&dir.path().join("absent")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_record_names_are_unique_and_ordered() {
        let a = record_file_name();
        let b = record_file_name();
        assert_ne!(a, b);
        assert!(is_record_file(Path::new(&a)));
    }
}
