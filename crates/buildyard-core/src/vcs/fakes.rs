//! In-memory fakes for the VCS capability (testing only)
//!
//! `MemoryBackend` hands out `MemoryWorkingCopy` handles that share one
//! scripted `MemoryRepo`. Every call is appended to `MemoryRepo::calls` so
//! tests can assert on the exact sequence the synchronizer drove.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    CheckoutStrategy, CommitId, HeadRef, MergeAnalysis, MergeStatus, VcsBackend, VcsError,
    VcsResult, WorkingCopy, ORIGIN,
};

// ---------------------------------------------------------------------------
// MemoryRepo
// ---------------------------------------------------------------------------

/// Scripted repository state shared between a backend and its working copies.
#[derive(Debug, Default)]
pub struct MemoryRepo {
    /// Branch tips on the remote server; `fetch` mirrors them locally.
    pub server: BTreeMap<String, CommitId>,
    /// Remote-tracking refs (`origin/<name>`).
    pub remote_branches: BTreeMap<String, CommitId>,
    pub local_branches: BTreeMap<String, CommitId>,
    pub upstreams: BTreeMap<String, String>,
    pub remotes: BTreeMap<String, String>,
    pub head: Option<String>,
    pub prune_enabled: bool,
    /// Forced merge-analysis results per branch.
    pub analysis: BTreeMap<String, MergeAnalysis>,
    /// Branches whose merge leaves conflicts.
    pub conflicted: BTreeSet<String>,
    pub fail_fetch: bool,
    pub fail_describe: bool,
    pub fail_clone: bool,
    pub in_merge: bool,
    pub merge_commits: Vec<(CommitId, CommitId)>,
    pub calls: Vec<String>,
}

impl MemoryRepo {
    /// A repository whose server and tracking refs both hold `branches`.
    pub fn with_branches(branches: &[(&str, &str)]) -> Self {
        let tips: BTreeMap<String, CommitId> = branches
            .iter()
            .map(|(b, c)| (b.to_string(), c.to_string()))
            .collect();
        Self {
            server: tips.clone(),
            remote_branches: tips,
            ..Self::default()
        }
    }

    /// Count of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

fn lock(state: &Mutex<MemoryRepo>) -> MutexGuard<'_, MemoryRepo> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Backend whose clone creates the target directory and shares `state`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub state: Arc<Mutex<MemoryRepo>>,
}

impl MemoryBackend {
    pub fn new(repo: MemoryRepo) -> Self {
        Self {
            state: Arc::new(Mutex::new(repo)),
        }
    }

    pub fn repo(&self) -> MutexGuard<'_, MemoryRepo> {
        lock(&self.state)
    }
}

impl VcsBackend for MemoryBackend {
    type Copy = MemoryWorkingCopy;

    fn open(&self, path: &Path) -> VcsResult<MemoryWorkingCopy> {
        lock(&self.state).calls.push("open".to_string());
        Ok(MemoryWorkingCopy {
            state: Arc::clone(&self.state),
            workdir: path.to_path_buf(),
        })
    }

    fn clone_repo(&self, url: &str, path: &Path) -> VcsResult<MemoryWorkingCopy> {
        let mut repo = lock(&self.state);
        repo.calls.push("clone".to_string());
        if repo.fail_clone {
            return Err(VcsError::Clone {
                url: url.to_string(),
                path: path.to_path_buf(),
                source: git2::Error::from_str("scripted clone failure"),
            });
        }
        std::fs::create_dir_all(path).map_err(|e| VcsError::Clone {
            url: url.to_string(),
            path: path.to_path_buf(),
            source: git2::Error::from_str(&e.to_string()),
        })?;
        repo.remotes.insert(ORIGIN.to_string(), url.to_string());
        repo.remote_branches = repo.server.clone();
        let default = repo.server.keys().next().cloned();
        if let Some(name) = default {
            let tip = repo.server[&name].clone();
            repo.local_branches.insert(name.clone(), tip);
            repo.head = Some(name);
        }
        drop(repo);
        Ok(MemoryWorkingCopy {
            state: Arc::clone(&self.state),
            workdir: path.to_path_buf(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkingCopy
// ---------------------------------------------------------------------------

/// Working copy view over a shared [`MemoryRepo`].
#[derive(Debug)]
pub struct MemoryWorkingCopy {
    state: Arc<Mutex<MemoryRepo>>,
    workdir: PathBuf,
}

impl MemoryWorkingCopy {
    fn repo(&self) -> MutexGuard<'_, MemoryRepo> {
        lock(&self.state)
    }
}

impl WorkingCopy for MemoryWorkingCopy {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn enable_remote_pruning(&mut self) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push("enable_remote_pruning".to_string());
        repo.prune_enabled = true;
        Ok(())
    }

    fn ensure_remote(&mut self, remote: &str, url: &str) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push(format!("ensure_remote:{remote}"));
        repo.remotes
            .entry(remote.to_string())
            .or_insert_with(|| url.to_string());
        Ok(())
    }

    fn fetch(&mut self, remote: &str) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push(format!("fetch:{remote}"));
        if repo.fail_fetch {
            return Err(VcsError::Fetch {
                remote: remote.to_string(),
                source: git2::Error::from_str("scripted fetch failure"),
            });
        }
        repo.remote_branches = repo.server.clone();
        Ok(())
    }

    fn head(&self) -> VcsResult<HeadRef> {
        let repo = self.repo();
        let branch = repo.head.clone();
        let target = branch
            .as_ref()
            .and_then(|b| repo.local_branches.get(b).cloned());
        Ok(HeadRef { branch, target })
    }

    fn resolve_remote_branch(&self, branch: &str) -> VcsResult<Option<CommitId>> {
        Ok(self.repo().remote_branches.get(branch).cloned())
    }

    fn local_branch(&self, branch: &str) -> VcsResult<Option<CommitId>> {
        Ok(self.repo().local_branches.get(branch).cloned())
    }

    fn create_branch(&mut self, branch: &str, commit: &str) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push(format!("create_branch:{branch}"));
        repo.local_branches
            .insert(branch.to_string(), commit.to_string());
        Ok(())
    }

    fn set_upstream(&mut self, branch: &str, upstream: &str) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push(format!("set_upstream:{branch}:{upstream}"));
        repo.upstreams
            .insert(branch.to_string(), upstream.to_string());
        Ok(())
    }

    fn checkout_tree(
        &mut self,
        branch: &str,
        commit: &str,
        _strategy: CheckoutStrategy,
    ) -> VcsResult<()> {
        self.repo()
            .calls
            .push(format!("checkout_tree:{branch}:{commit}"));
        Ok(())
    }

    fn set_head(&mut self, branch: &str) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push(format!("set_head:{branch}"));
        repo.head = Some(branch.to_string());
        Ok(())
    }

    fn set_branch_target(&mut self, branch: &str, commit: &str) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push(format!("set_branch_target:{branch}:{commit}"));
        repo.local_branches
            .insert(branch.to_string(), commit.to_string());
        Ok(())
    }

    fn merge_analysis(&self, branch: &str) -> VcsResult<MergeAnalysis> {
        let mut repo = self.repo();
        repo.calls.push(format!("merge_analysis:{branch}"));
        if let Some(forced) = repo.analysis.get(branch) {
            return Ok(*forced);
        }
        let remote = repo
            .remote_branches
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::RemoteBranchNotFound {
                branch: branch.to_string(),
            })?;
        Ok(match repo.local_branches.get(branch) {
            Some(local) if *local == remote => MergeAnalysis::UpToDate,
            _ => MergeAnalysis::FastForward,
        })
    }

    fn merge(&mut self, branch: &str) -> VcsResult<MergeStatus> {
        let mut repo = self.repo();
        repo.calls.push(format!("merge:{branch}"));
        repo.in_merge = true;
        Ok(if repo.conflicted.contains(branch) {
            MergeStatus::Conflicted
        } else {
            MergeStatus::Clean
        })
    }

    fn commit_merge(&mut self, local: &str, remote: &str, _message: &str) -> VcsResult<CommitId> {
        let mut repo = self.repo();
        repo.calls.push("commit_merge".to_string());
        repo.merge_commits
            .push((local.to_string(), remote.to_string()));
        let id = format!("merge-{}", repo.merge_commits.len());
        if let Some(head) = repo.head.clone() {
            repo.local_branches.insert(head, id.clone());
        }
        Ok(id)
    }

    fn abort_merge(&mut self) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push("abort_merge".to_string());
        repo.in_merge = false;
        Ok(())
    }

    fn cleanup_merge_state(&mut self) -> VcsResult<()> {
        let mut repo = self.repo();
        repo.calls.push("cleanup_merge_state".to_string());
        repo.in_merge = false;
        Ok(())
    }

    fn describe_workdir(&self) -> VcsResult<String> {
        let repo = self.repo();
        if repo.fail_describe {
            return Err(VcsError::Describe {
                source: git2::Error::from_str("scripted describe failure"),
            });
        }
        let target = repo
            .head
            .as_ref()
            .and_then(|b| repo.local_branches.get(b))
            .cloned()
            .unwrap_or_default();
        Ok(target)
    }

    fn remote_branches(&self, _remote: &str) -> VcsResult<Vec<String>> {
        Ok(self.repo().remote_branches.keys().cloned().collect())
    }
}
