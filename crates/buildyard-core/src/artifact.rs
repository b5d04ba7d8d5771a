//! Publishes build output into `«home»/artifacts/«project»/«branch»`.
//!
//! Publishing is destructive-then-move: a previous artifact at the
//! destination is removed before the new one is renamed into place, so an
//! interrupted publish leaves an empty destination, never a mixed one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::project::is_nested_relative;

/// Glob (relative to the working copy) of build logs carried along.
pub const LOG_GLOB: &str = "*.log";

/// Filesystem failures while publishing. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to remove previous artifacts at {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create artifact directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log glob {pattern}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Relocates build output below an artifacts root.
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    root: PathBuf,
}

impl ArtifactPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `«root»/«project»/«branch»`
    pub fn destination(&self, project: &str, branch: &str) -> PathBuf {
        self.root.join(project).join(branch)
    }

    /// The build output to publish, or `None` when there is nothing to publish.
    ///
    /// A missing output directory is a soft failure: it is logged as a
    /// warning and no fault is raised. Paths that leave the working copy,
    /// or name the working copy itself, are never published.
    pub fn locate(&self, workdir: &Path, artifacts: &str, project: &str) -> Option<PathBuf> {
        if artifacts.trim().is_empty() {
            debug!(project = %project, "No artifact path configured, nothing to publish");
            return None;
        }
        if !is_nested_relative(artifacts) {
            error!(project = %project, "Refusing to publish artifact path {:?} outside the working copy", artifacts);
            return None;
        }
        let source = workdir.join(artifacts);
        if !source.exists() {
            warn!(project = %project, "Build artifacts could not be found, maybe the build failed?");
            info!(project = %project, "Expected build artifacts in {}", source.display());
            info!(project = %project, "No build will be published for this project/branch");
            return None;
        }
        debug!(project = %project, "Build artifacts found in {}", source.display());
        Some(source)
    }

    /// Move `source` and the working copy's build logs to the destination
    /// for `project`/`branch`. Returns the destination.
    pub fn publish(
        &self,
        source: &Path,
        workdir: &Path,
        project: &str,
        branch: &str,
    ) -> Result<PathBuf, ArtifactError> {
        let destination = self.destination(project, branch);
        info!(project = %project, branch = %branch, "Publishing build artifacts to {}", destination.display());

        match fs::remove_dir_all(&destination) {
            Ok(()) => debug!(project = %project, "Removed previous artifacts"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ArtifactError::Remove {
                    path: destination,
                    source,
                })
            }
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        move_path(source, &destination)?;
        self.relocate_logs(workdir, &destination, project)?;

        debug!(project = %project, branch = %branch, "Artifact processing completed");
        Ok(destination)
    }

    fn relocate_logs(
        &self,
        workdir: &Path,
        destination: &Path,
        project: &str,
    ) -> Result<usize, ArtifactError> {
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&workdir.to_string_lossy()),
            LOG_GLOB
        );
        debug!(project = %project, "Searching for build logs using glob {}", pattern);

        let entries = glob::glob(&pattern).map_err(|source| ArtifactError::Glob {
            pattern: pattern.clone(),
            source,
        })?;

        let mut moved = 0;
        for entry in entries {
            let log = match entry {
                Ok(path) if path.is_file() => path,
                Ok(_) => continue,
                Err(e) => {
                    warn!(project = %project, error = %e, "Unreadable build log entry");
                    continue;
                }
            };
            let Some(name) = log.file_name() else {
                continue;
            };
            move_path(&log, &destination.join(name))?;
            moved += 1;
        }
        debug!(project = %project, "Moved {} log files", moved);
        Ok(moved)
    }
}

/// Rename `from` to `to`, falling back to copy-and-remove when a rename is
/// not possible (e.g. across filesystems).
fn move_path(from: &Path, to: &Path) -> Result<(), ArtifactError> {
    let wrap = |source: io::Error| ArtifactError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    let rename_err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!(error = %rename_err, "Rename failed, copying {} instead", from.display());

    copy_recursive(from, to).map_err(wrap)?;
    if from.is_dir() {
        fs::remove_dir_all(from).map_err(wrap)
    } else {
        fs::remove_file(from).map_err(wrap)
    }
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if !from.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}
