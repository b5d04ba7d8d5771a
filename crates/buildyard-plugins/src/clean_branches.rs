//! Removes untracked files and directories before a branch is built,
//! the equivalent of `git clean -d -f`.

use std::fs;
use std::io;
use std::path::Path;

use buildyard_core::{BranchInfo, BuildPlugin};
use git2::{Repository, Status, StatusOptions};
use tracing::{debug, error, info};

pub const NAME: &str = "clean-branches";

#[derive(Debug, Default)]
pub struct CleanBranches;

impl CleanBranches {
    pub fn new() -> Self {
        Self
    }
}

/// Delete every untracked, non-ignored entry of the working copy.
/// Returns the number of removed entries.
pub fn clean_untracked(workdir: &Path) -> Result<usize, CleanError> {
    let repo = Repository::open(workdir)?;
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(false)
        .include_ignored(false);

    let untracked: Vec<String> = repo
        .statuses(Some(&mut options))?
        .iter()
        .filter(|entry| entry.status().contains(Status::WT_NEW))
        .filter_map(|entry| entry.path().map(str::to_string))
        .collect();

    for relative in &untracked {
        let path = workdir.join(relative.trim_end_matches('/'));
        debug!("Removing untracked {}", path.display());
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(untracked.len())
}

/// Failures while cleaning; logged by the hook, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl BuildPlugin for CleanBranches {
    fn name(&self) -> &str {
        NAME
    }

    fn pre_branch(&self, info: &BranchInfo<'_>) {
        match clean_untracked(info.workdir) {
            Ok(0) => {}
            Ok(removed) => {
                info!(project = %info.project, branch = %info.branch, "Removed {} untracked entries", removed)
            }
            Err(e) => {
                error!(project = %info.project, branch = %info.branch, error = %e, "Failed to clean working copy")
            }
        }
    }
}
