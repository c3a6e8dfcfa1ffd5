//! Bounded concurrent archive search
//!
//! Locates the data file for a calibration reference run whose cycle, and
//! therefore directory, is not known ahead of time. Every cycle-named
//! directory under the instrument root is scanned by a fixed-size pool of
//! blocking workers; the first worker to find a match raises a shared
//! cancellation flag, and the remaining scans return early. Cancellation is
//! cooperative: the flag is checked between directory entries, never
//! mid-entry.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const MAX_WORKERS: usize = 32;

/// Result of one search, including how many directory scans actually ran
/// (bounded by cancellation, not by the number of cycle directories).
#[derive(Debug)]
pub struct SearchOutcome {
    pub path: Option<PathBuf>,
    pub directories_scanned: usize,
}

/// Searches cycle directories for a run's data file.
pub struct RunFileFinder {
    root: PathBuf,
    workers: usize,
}

impl RunFileFinder {
    /// `workers = 0` derives the pool size from the core count.
    pub fn new(root: impl Into<PathBuf>, workers: usize) -> Self {
        let workers = if workers == 0 {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            (cores * 4).min(MAX_WORKERS)
        } else {
            workers.min(MAX_WORKERS)
        };
        Self {
            root: root.into(),
            workers,
        }
    }

    /// Find the `.nxs` file for `run` under any cycle directory.
    ///
    /// The filename must end with the run digits (optionally zero-padded) not
    /// preceded by another digit, so run 1234 never matches `foo991234.nxs`.
    /// A miss is not an error; scan failures on individual directories are
    /// logged and treated as empty.
    pub async fn find(&self, run: u32) -> SearchOutcome {
        // `(^|[^0-9])` is the non-digit boundary in front of the padding
        let pattern = format!(r"(?i)(^|[^0-9])0*{run}\.nxs$");
        let file_regex = match Regex::new(&pattern) {
            Ok(re) => Arc::new(re),
            Err(e) => {
                warn!("Could not build search pattern for run {run}: {e}");
                return SearchOutcome {
                    path: None,
                    directories_scanned: 0,
                };
            }
        };

        let directories = self.cycle_directories();
        debug!(
            "Searching {} cycle directories for run {run} with {} workers",
            directories.len(),
            self.workers
        );

        let cancelled = Arc::new(AtomicBool::new(false));
        let scanned = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(directories.len());

        for directory in directories {
            if cancelled.load(Ordering::SeqCst) {
                // not-yet-started scans observe the flag without error
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let file_regex = Arc::clone(&file_regex);
            let cancelled = Arc::clone(&cancelled);
            let scanned = Arc::clone(&scanned);
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }
                scanned.fetch_add(1, Ordering::SeqCst);
                let found = scan_directory(&directory, &file_regex, &cancelled);
                if found.is_some() {
                    cancelled.store(true, Ordering::SeqCst);
                }
                found
            }));
        }

        let mut path = None;
        for handle in handles {
            if let Ok(Some(found)) = handle.await {
                path.get_or_insert(found);
            }
        }

        SearchOutcome {
            path,
            directories_scanned: scanned.load(Ordering::SeqCst),
        }
    }

    /// Cycle directories under the root, newest cycle first.
    fn cycle_directories(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list archive root {}: {e}", self.root.display());
                return Vec::new();
            }
        };

        let mut directories: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_name().to_string_lossy().starts_with("cycle_")
                    && entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
            })
            .map(|entry| entry.path())
            .collect();
        directories.sort();
        directories.reverse();
        directories
    }
}

fn scan_directory(directory: &Path, file_regex: &Regex, cancelled: &AtomicBool) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not scan {}: {e}", directory.display());
            return None;
        }
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        if cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let name = entry.file_name();
        if file_regex.is_match(&name.to_string_lossy()) {
            return Some(directory.join(name));
        }
    }
    None
}
