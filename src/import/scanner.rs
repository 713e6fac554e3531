//! Recursive scan of the comics directory and staleness checks for stored issues.

use crate::archive::modification_time;
use crate::db::DbIssue;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const MAX_RECURSION_DEPTH: usize = 32;

/// A file discovered during the scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Why a stored issue is dropped before importing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// The file no longer exists
    Missing,
    /// The file is not under the configured comics directory
    OutsideLibrary,
    /// The file's modification time changed since import
    Modified,
}

/// Check if a file is noise (.DS_Store, Thumbs.db, etc.)
fn is_noise_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name == ".DS_Store" || name == "Thumbs.db" || name == "desktop.ini")
        .unwrap_or(false)
}

/// Every regular file under `root`, oldest modification first
///
/// Ties are broken by path so the order is stable. An unreadable root is an
/// error; unreadable subdirectories are logged and skipped.
pub fn scan_comic_files(root: &Path) -> Result<Vec<ScannedFile>, std::io::Error> {
    info!("Scanning for comics in: {:?}", root);

    let entries = fs::read_dir(root)?;
    let mut files = Vec::new();
    collect_files(entries, 0, &mut files);

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

    info!("Found {} file(s)", files.len());
    Ok(files)
}

fn collect_files(entries: fs::ReadDir, depth: usize, files: &mut Vec<ScannedFile>) {
    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_file() {
            if is_noise_file(&path) {
                continue;
            }
            match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => files.push(ScannedFile { path, modified }),
                Err(e) => warn!("Failed to read metadata for {:?}: {}", path, e),
            }
        } else if path.is_dir() {
            if depth >= MAX_RECURSION_DEPTH {
                warn!(
                    "Max recursion depth {} reached at {:?}, not descending",
                    MAX_RECURSION_DEPTH, path
                );
                continue;
            }
            match fs::read_dir(&path) {
                Ok(sub_entries) => collect_files(sub_entries, depth + 1, files),
                Err(e) => warn!("Failed to read dir {:?}: {}", path, e),
            }
        }
    }
}

/// First reason, if any, that a stored issue no longer matches the disk
///
/// Checked in order: the file is gone, it lives outside `root`, or its
/// modification time differs from the one recorded at import.
pub fn check_removed_or_modified(issue: &DbIssue, root: &Path) -> Option<RemovalReason> {
    let path = Path::new(&issue.file);

    if !path.exists() {
        return Some(RemovalReason::Missing);
    }
    if !path.starts_with(root) {
        return Some(RemovalReason::OutsideLibrary);
    }
    match modification_time(path) {
        Some(current) if current == issue.mod_ts => None,
        current => {
            debug!(
                "{} modified: stored {}, on disk {:?}",
                issue.file, issue.mod_ts, current
            );
            Some(RemovalReason::Modified)
        }
    }
}
