//! Version-control capability consumed by the synchronizer.
//!
//! The engine never talks to git directly; it drives a [`WorkingCopy`]
//! obtained from a [`VcsBackend`]. [`git::GitBackend`] is the production
//! implementation on top of libgit2, [`fakes::MemoryBackend`] an in-memory
//! stand-in for exercising the synchronizer state machine.

pub mod error;
pub mod fakes;
pub mod git;

use std::path::Path;

pub use error::{VcsError, VcsResult};
pub use git::{GitBackend, GitWorkingCopy};

/// Name of the remote every project is synchronized against.
pub const ORIGIN: &str = "origin";

/// Hex object id of a commit.
pub type CommitId = String;

/// Where HEAD currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadRef {
    /// Short name of the local branch HEAD is attached to.
    pub branch: Option<String>,
    /// Commit HEAD resolves to.
    pub target: Option<CommitId>,
}

/// Disposition of a local branch relative to its remote-tracking ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAnalysis {
    UpToDate,
    FastForward,
    Normal,
    /// None of the known dispositions; carries the raw analysis bits.
    Unexpected(u32),
}

/// Index state after merging a candidate commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Clean,
    Conflicted,
}

/// Checkout flags applied when materializing a tree in the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutStrategy {
    pub force: bool,
    pub recreate_missing: bool,
    pub allow_conflicts: bool,
    pub use_theirs: bool,
}

impl CheckoutStrategy {
    /// Branch materialization: local edits are discardable.
    pub const BUILD: CheckoutStrategy = CheckoutStrategy {
        force: false,
        recreate_missing: true,
        allow_conflicts: true,
        use_theirs: true,
    };

    /// Overwrite the working copy with the target tree.
    pub const FORCE: CheckoutStrategy = CheckoutStrategy {
        force: true,
        recreate_missing: true,
        allow_conflicts: false,
        use_theirs: false,
    };
}

/// An opened working copy.
///
/// Owned by exactly one project task; implementations need not be `Sync`.
pub trait WorkingCopy {
    /// Root of the checked-out tree.
    fn workdir(&self) -> &Path;

    /// Persist `remote.origin.prune = true` in the repository config.
    fn enable_remote_pruning(&mut self) -> VcsResult<()>;

    /// Look up `remote`, creating it with `url` when missing.
    fn ensure_remote(&mut self, remote: &str, url: &str) -> VcsResult<()>;

    /// Fetch all refs of `remote`, pruning deleted branches.
    fn fetch(&mut self, remote: &str) -> VcsResult<()>;

    fn head(&self) -> VcsResult<HeadRef>;

    /// Commit of the remote-tracking branch `origin/<branch>`, if any.
    fn resolve_remote_branch(&self, branch: &str) -> VcsResult<Option<CommitId>>;

    /// Commit of the local branch, if it exists.
    fn local_branch(&self, branch: &str) -> VcsResult<Option<CommitId>>;

    fn create_branch(&mut self, branch: &str, commit: &str) -> VcsResult<()>;

    /// Set the upstream of a local branch, e.g. `origin/main`.
    fn set_upstream(&mut self, branch: &str, upstream: &str) -> VcsResult<()>;

    /// Check out the tree of `commit`; `branch` labels errors.
    fn checkout_tree(
        &mut self,
        branch: &str,
        commit: &str,
        strategy: CheckoutStrategy,
    ) -> VcsResult<()>;

    /// Point HEAD at `refs/heads/<branch>`.
    fn set_head(&mut self, branch: &str) -> VcsResult<()>;

    /// Move `refs/heads/<branch>` to `commit`.
    fn set_branch_target(&mut self, branch: &str, commit: &str) -> VcsResult<()>;

    /// Analyse HEAD against `origin/<branch>`.
    fn merge_analysis(&self, branch: &str) -> VcsResult<MergeAnalysis>;

    /// Merge `origin/<branch>` into the index and working tree.
    fn merge(&mut self, branch: &str) -> VcsResult<MergeStatus>;

    /// Write the merged index and commit it on HEAD with two parents.
    fn commit_merge(&mut self, local: &str, remote: &str, message: &str) -> VcsResult<CommitId>;

    /// Drop merge state and reset index and tree to HEAD without moving refs.
    fn abort_merge(&mut self) -> VcsResult<()>;

    /// Remove MERGE_HEAD and friends after a completed merge.
    fn cleanup_merge_state(&mut self) -> VcsResult<()>;

    /// Human-readable description of the working directory, like `git describe`.
    fn describe_workdir(&self) -> VcsResult<String>;

    /// Short names of every branch known on `remote`, excluding `HEAD`.
    fn remote_branches(&self, remote: &str) -> VcsResult<Vec<String>>;
}

/// Factory for working copies.
pub trait VcsBackend: Send + Sync {
    type Copy: WorkingCopy;

    fn open(&self, path: &Path) -> VcsResult<Self::Copy>;

    fn clone_repo(&self, url: &str, path: &Path) -> VcsResult<Self::Copy>;
}

/// `refs/remotes/origin/<branch>`
pub fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/{ORIGIN}/{branch}")
}

/// `refs/heads/<branch>`
pub fn local_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}
