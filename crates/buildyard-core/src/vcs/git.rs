//! libgit2-backed working copies.

use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, DescribeFormatOptions, DescribeOptions, ErrorCode, FetchOptions, FetchPrune,
    Oid, RemoteCallbacks, Repository, ResetType, Signature,
};
use tracing::{debug, trace};

use super::{
    local_ref, remote_ref, CheckoutStrategy, CommitId, HeadRef, MergeAnalysis, MergeStatus,
    VcsBackend, VcsError, VcsResult, WorkingCopy, ORIGIN,
};

/// Fallback identity for merge commits when the repository has none configured.
const FALLBACK_NAME: &str = "buildyard";
const FALLBACK_EMAIL: &str = "buildyard@localhost";

/// Opens and clones repositories through libgit2.
#[derive(Debug, Clone, Default)]
pub struct GitBackend;

impl GitBackend {
    pub fn new() -> Self {
        Self
    }
}

impl VcsBackend for GitBackend {
    type Copy = GitWorkingCopy;

    fn open(&self, path: &Path) -> VcsResult<GitWorkingCopy> {
        debug!("Opening git repository at: {}", path.display());
        let repo = Repository::open(path).map_err(|source| VcsError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        GitWorkingCopy::from_repository(repo, path)
    }

    fn clone_repo(&self, url: &str, path: &Path) -> VcsResult<GitWorkingCopy> {
        debug!("Cloning {} into {}", url, path.display());
        let repo = RepoBuilder::new()
            .fetch_options(fetch_options())
            .clone(url, path)
            .map_err(|source| VcsError::Clone {
                url: url.to_string(),
                path: path.to_path_buf(),
                source,
            })?;

        if let Ok(head) = repo.head() {
            debug!("Clone completed, HEAD is at {:?}", head.target());
        }
        GitWorkingCopy::from_repository(repo, path)
    }
}

/// Credential callbacks: ssh-agent for ssh remotes, the default helper otherwise.
pub fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|url, username, allowed| {
        trace!("Credentials requested for {} (allowed: {:?})", url, allowed);
        if allowed.is_ssh_key() {
            Cred::ssh_key_from_agent(username.unwrap_or("git"))
        } else {
            Cred::default()
        }
    });
    callbacks
}

fn fetch_options<'a>() -> FetchOptions<'a> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks());
    options.prune(FetchPrune::On);
    options.update_fetchhead(true);
    options
}

fn parse_oid(commit: &str) -> VcsResult<Oid> {
    Ok(Oid::from_str(commit)?)
}

/// A non-bare repository opened for synchronization.
pub struct GitWorkingCopy {
    repo: Repository,
    workdir: PathBuf,
}

impl GitWorkingCopy {
    fn from_repository(repo: Repository, path: &Path) -> VcsResult<Self> {
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());
        Ok(Self { repo, workdir })
    }

    fn signature(&self) -> VcsResult<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
        }
    }

    fn find_branch_target(&self, name: &str, kind: BranchType) -> VcsResult<Option<CommitId>> {
        match self.repo.find_branch(name, kind) {
            Ok(branch) => Ok(branch.get().target().map(|oid| oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remote_annotated_commit(&self, branch: &str) -> VcsResult<git2::AnnotatedCommit<'_>> {
        let reference = match self.repo.find_reference(&remote_ref(branch)) {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(VcsError::RemoteBranchNotFound {
                    branch: branch.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.repo.reference_to_annotated_commit(&reference)?)
    }
}

impl WorkingCopy for GitWorkingCopy {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn enable_remote_pruning(&mut self) -> VcsResult<()> {
        let mut config = self.repo.config()?;
        config.set_bool(&format!("remote.{ORIGIN}.prune"), true)?;
        Ok(())
    }

    fn ensure_remote(&mut self, remote: &str, url: &str) -> VcsResult<()> {
        match self.repo.find_remote(remote) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("Remote {} does not exist, creating it for {}", remote, url);
                self.repo.remote(remote, url)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&mut self, remote: &str) -> VcsResult<()> {
        let mut handle = self.repo.find_remote(remote)?;
        handle
            .fetch(&[] as &[&str], Some(&mut fetch_options()), None)
            .map_err(|source| VcsError::Fetch {
                remote: remote.to_string(),
                source,
            })
    }

    fn head(&self) -> VcsResult<HeadRef> {
        let head = self.repo.head()?;
        let branch = if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        };
        Ok(HeadRef {
            branch,
            target: head.target().map(|oid| oid.to_string()),
        })
    }

    fn resolve_remote_branch(&self, branch: &str) -> VcsResult<Option<CommitId>> {
        self.find_branch_target(&format!("{ORIGIN}/{branch}"), BranchType::Remote)
    }

    fn local_branch(&self, branch: &str) -> VcsResult<Option<CommitId>> {
        self.find_branch_target(branch, BranchType::Local)
    }

    fn create_branch(&mut self, branch: &str, commit: &str) -> VcsResult<()> {
        let commit = self.repo.find_commit(parse_oid(commit)?)?;
        self.repo.branch(branch, &commit, false)?;
        Ok(())
    }

    fn set_upstream(&mut self, branch: &str, upstream: &str) -> VcsResult<()> {
        let mut local = self.repo.find_branch(branch, BranchType::Local)?;
        local.set_upstream(Some(upstream))?;
        Ok(())
    }

    fn checkout_tree(
        &mut self,
        branch: &str,
        commit: &str,
        strategy: CheckoutStrategy,
    ) -> VcsResult<()> {
        let wrap = |source: git2::Error| VcsError::Checkout {
            branch: branch.to_string(),
            source,
        };
        let oid = Oid::from_str(commit).map_err(wrap)?;
        let tree = self
            .repo
            .find_commit(oid)
            .and_then(|c| c.tree())
            .map_err(wrap)?;

        let mut builder = CheckoutBuilder::new();
        if strategy.force {
            builder.force();
        } else {
            builder.safe();
        }
        builder
            .recreate_missing(strategy.recreate_missing)
            .allow_conflicts(strategy.allow_conflicts)
            .use_theirs(strategy.use_theirs);

        self.repo
            .checkout_tree(tree.as_object(), Some(&mut builder))
            .map_err(wrap)
    }

    fn set_head(&mut self, branch: &str) -> VcsResult<()> {
        self.repo.set_head(&local_ref(branch))?;
        Ok(())
    }

    fn set_branch_target(&mut self, branch: &str, commit: &str) -> VcsResult<()> {
        let mut reference = self.repo.find_reference(&local_ref(branch))?;
        reference.set_target(
            parse_oid(commit)?,
            &format!("buildyard: fast-forward {branch} to {commit}"),
        )?;
        Ok(())
    }

    fn merge_analysis(&self, branch: &str) -> VcsResult<MergeAnalysis> {
        let annotated = self.remote_annotated_commit(branch)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        // libgit2 reports NORMAL together with FASTFORWARD when a fast-forward
        // is possible, so fast-forward must be checked first.
        Ok(if analysis.is_up_to_date() {
            MergeAnalysis::UpToDate
        } else if analysis.is_fast_forward() {
            MergeAnalysis::FastForward
        } else if analysis.is_normal() {
            MergeAnalysis::Normal
        } else {
            MergeAnalysis::Unexpected(analysis.bits())
        })
    }

    fn merge(&mut self, branch: &str) -> VcsResult<MergeStatus> {
        let annotated = self.remote_annotated_commit(branch)?;
        self.repo.merge(&[&annotated], None, None)?;
        let index = self.repo.index()?;
        Ok(if index.has_conflicts() {
            MergeStatus::Conflicted
        } else {
            MergeStatus::Clean
        })
    }

    fn commit_merge(&mut self, local: &str, remote: &str, message: &str) -> VcsResult<CommitId> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;
        let local = self.repo.find_commit(parse_oid(local)?)?;
        let remote = self.repo.find_commit(parse_oid(remote)?)?;

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&local, &remote],
        )?;
        Ok(oid.to_string())
    }

    fn abort_merge(&mut self) -> VcsResult<()> {
        self.repo.cleanup_state()?;
        let head = self.repo.head()?.peel_to_commit()?;
        let mut builder = CheckoutBuilder::new();
        builder.force();
        self.repo
            .reset(head.as_object(), ResetType::Hard, Some(&mut builder))?;
        Ok(())
    }

    fn cleanup_merge_state(&mut self) -> VcsResult<()> {
        self.repo.cleanup_state()?;
        Ok(())
    }

    fn describe_workdir(&self) -> VcsResult<String> {
        let mut options = DescribeOptions::new();
        options.describe_tags().show_commit_oid_as_fallback(true);
        let describe = self
            .repo
            .describe(&options)
            .map_err(|source| VcsError::Describe { source })?;

        let mut format = DescribeFormatOptions::new();
        format.dirty_suffix("-dirty");
        describe
            .format(Some(&format))
            .map_err(|source| VcsError::Describe { source })
    }

    fn remote_branches(&self, remote: &str) -> VcsResult<Vec<String>> {
        let prefix = format!("{remote}/");
        let mut names = Vec::new();
        for entry in self.repo.branches(Some(BranchType::Remote))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                if let Some(short) = name.strip_prefix(&prefix) {
                    if short != "HEAD" {
                        names.push(short.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
