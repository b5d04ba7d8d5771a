//! Error types for version-control operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::FaultClass;

/// Errors raised by a [`WorkingCopy`](super::WorkingCopy) or [`VcsBackend`](super::VcsBackend).
#[derive(Debug, Error)]
pub enum VcsError {
    /// Cloning the remote into the project directory failed.
    #[error("failed to clone {url} into {path}: {source}")]
    Clone {
        url: String,
        path: PathBuf,
        source: git2::Error,
    },

    /// The working copy exists but could not be opened.
    #[error("failed to open repository at {path}: {source}")]
    Open { path: PathBuf, source: git2::Error },

    /// Fetching from the remote failed.
    #[error("fetch from remote {remote} failed: {source}")]
    Fetch { remote: String, source: git2::Error },

    /// No remote-tracking ref exists for the branch.
    #[error("remote branch origin/{branch} not found")]
    RemoteBranchNotFound { branch: String },

    /// Checking out the branch tree failed.
    #[error("checkout of branch {branch} failed: {source}")]
    Checkout { branch: String, source: git2::Error },

    /// The merge left conflicts in the index.
    #[error("conflicts encountered merging origin/{branch}, please resolve them")]
    MergeConflicts { branch: String },

    /// Merge analysis returned none of up-to-date, normal or fast-forward.
    #[error("unexpected merge analysis result {bits:#x} for branch {branch}")]
    UnexpectedAnalysis { branch: String, bits: u32 },

    /// HEAD does not point at a local branch.
    #[error("HEAD is not attached to a local branch")]
    DetachedHead,

    /// Computing the working-directory description failed.
    #[error("failed to describe working directory: {source}")]
    Describe { source: git2::Error },

    /// Any other git failure.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl VcsError {
    /// Fetch and describe failures degrade gracefully; everything else
    /// aborts the owning project.
    pub fn class(&self) -> FaultClass {
        match self {
            VcsError::Fetch { .. } | VcsError::Describe { .. } => FaultClass::Recoverable,
            _ => FaultClass::Project,
        }
    }
}

/// Result type for version-control operations.
pub type VcsResult<T> = std::result::Result<T, VcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_error_displays_url_and_path() {
        let err = VcsError::Clone {
            url: "https://example.com/org/p1.git".to_string(),
            path: PathBuf::from("/srv/build/projects/p1"),
            source: git2::Error::from_str("connection refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/org/p1.git"));
        assert!(msg.contains("/srv/build/projects/p1"));
        assert_eq!(err.class(), FaultClass::Project);
    }

    #[test]
    fn test_unexpected_analysis_displays_bits() {
        let err = VcsError::UnexpectedAnalysis {
            branch: "develop".to_string(),
            bits: 8,
        };
        assert!(err.to_string().contains("0x8"));
    }

    #[test]
    fn test_describe_is_recoverable() {
        let err = VcsError::Describe {
            source: git2::Error::from_str("no tags"),
        };
        assert_eq!(err.class(), FaultClass::Recoverable);
    }
}
