//! Synchronizes one project's working copy with its remote.
//!
//! Per project: `Absent → Cloning → Open`, then for every branch
//! `Fetching → MergeAnalysis → {UpToDate | Merging | FastForwarding} → BranchReady`.
//! Fetching happens once per branch so a long multi-branch build sees
//! concurrent remote updates; it is skipped for the first branch after a
//! fresh clone.

use std::fmt;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::error::{BuildError, Result};
use crate::project::{WildcardPolicy, WILDCARD};
use crate::vcs::{
    CheckoutStrategy, CommitId, MergeAnalysis, MergeStatus, VcsBackend, VcsError, VcsResult,
    WorkingCopy, ORIGIN,
};

/// States of the synchronization state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Absent,
    Cloning,
    Open,
    Fetching,
    MergeAnalysis,
    UpToDate,
    Merging,
    FastForwarding,
    BranchReady,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Absent => "absent",
            SyncState::Cloning => "cloning",
            SyncState::Open => "open",
            SyncState::Fetching => "fetching",
            SyncState::MergeAnalysis => "merge_analysis",
            SyncState::UpToDate => "up_to_date",
            SyncState::Merging => "merging",
            SyncState::FastForwarding => "fast_forwarding",
            SyncState::BranchReady => "branch_ready",
        };
        f.write_str(name)
    }
}

/// Produced once per project by the clone/open step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The working copy was cloned during this run.
    pub fresh: bool,
    /// Working-directory description after opening; empty when unavailable.
    pub description: String,
}

/// What the pull step did to the branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    UpToDate,
    FastForwarded { to: CommitId },
    Merged { commit: CommitId },
}

/// A branch that reached `BranchReady`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSync {
    pub branch: String,
    pub action: SyncAction,
    /// Empty when the description could not be computed.
    pub description: String,
}

/// Drives a [`WorkingCopy`] through the synchronization state machine.
pub struct Synchronizer<C: WorkingCopy> {
    project: String,
    copy: C,
    skip_next_fetch: bool,
    state: SyncState,
}

impl<C: WorkingCopy> Synchronizer<C> {
    /// Clone or open the working copy at `path` and apply standing config.
    ///
    /// A failed clone or open is fatal for the project.
    pub fn prepare<B>(
        backend: &B,
        project: &str,
        url: &str,
        path: &Path,
    ) -> VcsResult<(Self, SyncOutcome)>
    where
        B: VcsBackend<Copy = C>,
    {
        let mut fresh = false;
        let copy = if path.exists() {
            info!(project = %project, "Opening repository in {}", path.display());
            backend.open(path)?
        } else {
            debug!(project = %project, state = %SyncState::Absent, "No working copy at {}", path.display());
            info!(project = %project, state = %SyncState::Cloning, "Cloning {} into {}", url, path.display());
            fresh = true;
            backend.clone_repo(url, path)?
        };

        let mut sync = Self {
            project: project.to_string(),
            copy,
            skip_next_fetch: fresh,
            state: if fresh { SyncState::Cloning } else { SyncState::Absent },
        };
        sync.transition(SyncState::Open);

        debug!(project = %project, "Enabling pruning on remote {}", ORIGIN);
        sync.copy.enable_remote_pruning()?;
        sync.copy.ensure_remote(ORIGIN, url)?;

        let description = sync.describe().unwrap_or_default();
        Ok((sync, SyncOutcome { fresh, description }))
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn transition(&mut self, next: SyncState) {
        debug!(project = %self.project, from = %self.state, to = %next, "sync transition");
        self.state = next;
    }

    /// Fetch from origin; failures are logged and processing continues with
    /// whatever is already local.
    fn fetch(&mut self) {
        if self.skip_next_fetch {
            self.skip_next_fetch = false;
            debug!(project = %self.project, "Fresh clone, skipping fetch");
            return;
        }
        self.transition(SyncState::Fetching);
        if let Err(e) = self.copy.fetch(ORIGIN) {
            error!(project = %self.project, error = %e, "Failed to fetch changes from remote");
        }
    }

    /// Expand a wildcard branch list according to `policy`.
    ///
    /// Non-wildcard lists are returned unchanged.
    pub fn resolve_branches(
        &mut self,
        branches: &[String],
        policy: &WildcardPolicy,
    ) -> Result<Vec<String>> {
        if branches.first().map(String::as_str) != Some(WILDCARD) {
            debug!(project = %self.project, "Branches to build: {}", branches.join(", "));
            return Ok(branches.to_vec());
        }

        match policy {
            WildcardPolicy::Remote => {
                self.fetch();
                // The list is current now; the first branch need not fetch again.
                self.skip_next_fetch = true;
                let names = self.copy.remote_branches(ORIGIN)?;
                info!(
                    project = %self.project,
                    "Wildcard expanded to {} remote branches: {}",
                    names.len(),
                    names.join(", ")
                );
                Ok(names)
            }
            WildcardPolicy::Fixed(names) => {
                warn!(
                    project = %self.project,
                    "Wildcard branch build replaced by fixed list: {}",
                    names.join(", ")
                );
                Ok(names.clone())
            }
            WildcardPolicy::Reject => Err(BuildError::UnresolvedWildcard {
                project: self.project.clone(),
            }),
        }
    }

    /// Bring `branch` to the tip of `origin/<branch>` and check it out.
    pub fn sync_branch(&mut self, branch: &str) -> VcsResult<BranchSync> {
        self.fetch();

        debug!(project = %self.project, branch = %branch, "Checking out branch");
        self.checkout_branch(branch)?;

        info!(project = %self.project, branch = %branch, "Pulling changes from remote");
        let action = self.pull()?;

        let description = self.describe().unwrap_or_default();
        if !description.is_empty() {
            info!(
                project = %self.project,
                branch = %branch,
                "On branch {}, working directory is {}",
                branch,
                description
            );
        }
        self.transition(SyncState::BranchReady);

        Ok(BranchSync {
            branch: branch.to_string(),
            action,
            description,
        })
    }

    /// Materialize a local branch tracking `origin/<branch>` and point HEAD at it.
    fn checkout_branch(&mut self, branch: &str) -> VcsResult<()> {
        let remote = self.copy.resolve_remote_branch(branch)?.ok_or_else(|| {
            VcsError::RemoteBranchNotFound {
                branch: branch.to_string(),
            }
        })?;

        let local = match self.copy.local_branch(branch)? {
            Some(commit) => commit,
            None => {
                debug!(project = %self.project, branch = %branch, "Creating local branch from {}", remote);
                self.copy.create_branch(branch, &remote)?;
                self.copy
                    .set_upstream(branch, &format!("{ORIGIN}/{branch}"))?;
                remote
            }
        };

        self.copy
            .checkout_tree(branch, &local, CheckoutStrategy::BUILD)?;
        self.copy.set_head(branch)
    }

    /// Merge-analysis-driven update of the branch HEAD is on.
    fn pull(&mut self) -> VcsResult<SyncAction> {
        let head = self.copy.head()?;
        let branch = head.branch.ok_or(VcsError::DetachedHead)?;

        self.transition(SyncState::MergeAnalysis);
        match self.copy.merge_analysis(&branch)? {
            MergeAnalysis::UpToDate => {
                self.transition(SyncState::UpToDate);
                Ok(SyncAction::UpToDate)
            }
            MergeAnalysis::FastForward => {
                self.transition(SyncState::FastForwarding);
                let remote = self.remote_tip(&branch)?;
                self.copy
                    .checkout_tree(&branch, &remote, CheckoutStrategy::FORCE)?;
                self.copy.set_branch_target(&branch, &remote)?;
                self.copy.set_head(&branch)?;
                info!(project = %self.project, branch = %branch, "Fast-forwarded to {}", remote);
                Ok(SyncAction::FastForwarded { to: remote })
            }
            MergeAnalysis::Normal => {
                self.transition(SyncState::Merging);
                let remote = self.remote_tip(&branch)?;
                let local = head.target.ok_or(VcsError::DetachedHead)?;

                if self.copy.merge(&branch)? == MergeStatus::Conflicted {
                    if let Err(e) = self.copy.abort_merge() {
                        error!(project = %self.project, error = %e, "Failed to clean up conflicted merge");
                    }
                    return Err(VcsError::MergeConflicts { branch });
                }

                let message = format!("Merge {ORIGIN}/{branch} into {branch}");
                let commit = self.copy.commit_merge(&local, &remote, &message)?;
                self.copy.cleanup_merge_state()?;
                info!(project = %self.project, branch = %branch, "Merged remote changes as {}", commit);
                Ok(SyncAction::Merged { commit })
            }
            MergeAnalysis::Unexpected(bits) => {
                error!(project = %self.project, branch = %branch, "Unexpected merge analysis result {}", bits);
                Err(VcsError::UnexpectedAnalysis { branch, bits })
            }
        }
    }

    fn remote_tip(&self, branch: &str) -> VcsResult<CommitId> {
        self.copy
            .resolve_remote_branch(branch)?
            .ok_or_else(|| VcsError::RemoteBranchNotFound {
                branch: branch.to_string(),
            })
    }

    /// Working-directory description; failures are logged, not propagated.
    pub fn describe(&self) -> Option<String> {
        match self.copy.describe_workdir() {
            Ok(description) => Some(description),
            Err(e) => {
                error!(project = %self.project, error = %e, "Failed to describe working directory");
                None
            }
        }
    }
}
