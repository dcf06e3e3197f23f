//! Moving consumed game records into the archive directory.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archived: usize,
    pub failures: usize,
}

/// Move each of `files` into `archive_dir`, keeping its name.
///
/// Best effort: a file that cannot be moved is counted and left in place.
/// An archived record with the same name is never overwritten.
pub fn archive_files(files: &[PathBuf], archive_dir: &Path) -> ArchiveReport {
    let mut report = ArchiveReport::default();
    if files.is_empty() {
        return report;
    }

    if let Err(e) = fs::create_dir_all(archive_dir) {
        warn!(dir = %archive_dir.display(), "Failed to create archive directory: {}", e);
        report.failures = files.len();
        return report;
    }

    for path in files {
        let Some(name) = path.file_name() else {
            report.failures += 1;
            continue;
        };
        let target = archive_dir.join(name);
        if target.symlink_metadata().is_ok() {
            warn!(
                path = %path.display(),
                target = %target.display(),
                "Game record already archived under this name, leaving it active"
            );
            report.failures += 1;
            continue;
        }
        match fs::rename(path, &target) {
            Ok(()) => report.archived += 1,
            Err(e) => {
                warn!(path = %path.display(), "Failed to archive game record: {}", e);
                report.failures += 1;
            }
        }
    }

    info!(
        archived = report.archived,
        failures = report.failures,
        "Archived consumed game records"
    );
    report
}
