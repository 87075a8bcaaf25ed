//! Output cleanup
//!
//! Removes stale `junit-*` run directories before a run. Each target is
//! walked contents-first, deleting files and then the directories emptied by
//! them. Entries that vanish underneath the sweep are not errors.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{HarnessError, HarnessResult};
use crate::results::{list_run_directories, RUN_DIR_PREFIX};

/// Counts of what a sweep removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Target roots removed
    pub targets_removed: usize,
    pub files_removed: usize,
    /// Directories removed below the target roots
    pub dirs_removed: usize,
}

impl SweepStats {
    fn add(&mut self, other: SweepStats) {
        self.targets_removed += other.targets_removed;
        self.files_removed += other.files_removed;
        self.dirs_removed += other.dirs_removed;
    }
}

/// Cleanup sweeper
#[derive(Clone, Debug)]
pub struct CleanupSweeper {
    output_root: PathBuf,
}

impl CleanupSweeper {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Run directories currently present under the output root
    pub fn discover(&self) -> HarnessResult<Vec<PathBuf>> {
        let targets = list_run_directories(&self.output_root)
            .map_err(|e| match e {
                HarnessError::Io { path, source } => HarnessError::Cleanup { path, source },
                other => other,
            })?
            .into_iter()
            .map(|d| d.path)
            .collect();
        Ok(targets)
    }

    /// Discover and remove every run directory
    pub fn sweep(&self) -> HarnessResult<SweepStats> {
        let targets = self.discover()?;
        let stats = self.sweep_targets(&targets)?;
        info!(
            "Cleaned {} {}* directories ({} files, {} subdirectories)",
            stats.targets_removed, RUN_DIR_PREFIX, stats.files_removed, stats.dirs_removed
        );
        Ok(stats)
    }

    /// Remove the given targets. Already-missing targets are skipped.
    pub fn sweep_targets(&self, targets: &[PathBuf]) -> HarnessResult<SweepStats> {
        let mut stats = SweepStats::default();
        for target in targets {
            stats.add(sweep_target(target)?);
        }
        Ok(stats)
    }
}

fn sweep_target(target: &Path) -> HarnessResult<SweepStats> {
    let mut stats = SweepStats::default();

    for entry in WalkDir::new(target).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(target).to_path_buf();
                match e.into_io_error() {
                    Some(io) if io.kind() == ErrorKind::NotFound => {
                        debug!("{} vanished during cleanup", path.display());
                        continue;
                    }
                    Some(io) => return Err(HarnessError::Cleanup { path, source: io }),
                    None => {
                        return Err(HarnessError::Cleanup {
                            path,
                            source: io::Error::new(ErrorKind::Other, "filesystem loop"),
                        })
                    }
                }
            }
        };

        let path = entry.path();
        let is_dir = entry.file_type().is_dir();
        let removed = if is_dir {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };

        match removed {
            Ok(()) if entry.depth() == 0 => stats.targets_removed += 1,
            Ok(()) if is_dir => stats.dirs_removed += 1,
            Ok(()) => stats.files_removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} vanished during cleanup", path.display());
            }
            Err(source) => {
                return Err(HarnessError::Cleanup {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    Ok(stats)
}
