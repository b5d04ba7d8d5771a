//! git2-built fixtures: a bare "remote" seeded with commits, no git binary needed.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use git2::{BranchType, Oid, Repository, Signature};

pub fn signature() -> Signature<'static> {
    Signature::now("fixture", "fixture@example.com").expect("signature")
}

/// A bare repository standing in for a hosted remote.
pub struct Remote {
    pub repo: Repository,
    pub path: PathBuf,
}

impl Remote {
    pub fn init(path: &Path) -> Self {
        let repo = Repository::init_bare(path).expect("init bare remote");
        Self {
            repo,
            path: path.to_path_buf(),
        }
    }

    /// Clone URL of the remote.
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Commit a full snapshot of `files` on `branch`, on top of its tip.
    pub fn commit(&self, branch: &str, files: &[(&str, &str)], message: &str) -> Oid {
        let mut builder = self.repo.treebuilder(None).expect("treebuilder");
        for (name, contents) in files {
            let blob = self.repo.blob(contents.as_bytes()).expect("blob");
            let mode = if name.ends_with(".sh") { 0o100755 } else { 0o100644 };
            builder.insert(name, blob, mode).expect("insert");
        }
        let tree = self.repo.find_tree(builder.write().expect("write tree")).expect("tree");

        // New branches fork from main when it exists.
        let parent = [branch, "main"]
            .iter()
            .find_map(|name| {
                self.repo
                    .find_branch(name, BranchType::Local)
                    .ok()
                    .and_then(|b| b.get().target())
            })
            .map(|oid| self.repo.find_commit(oid).expect("parent"));
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let sig = signature();
        let refname = format!("refs/heads/{branch}");
        let oid = self
            .repo
            .commit(
                Some(refname.as_str()),
                &sig,
                &sig,
                message,
                &tree,
                &parents,
            )
            .expect("commit");
        if branch == "main" {
            self.repo.set_head("refs/heads/main").expect("remote HEAD");
        }
        oid
    }

    pub fn tip(&self, branch: &str) -> Oid {
        self.repo
            .find_branch(branch, BranchType::Local)
            .expect("branch")
            .get()
            .target()
            .expect("target")
    }
}

/// Commit `files` into the checked-out branch of a working copy.
pub fn commit_in_workdir(workdir: &Path, files: &[(&str, &str)], message: &str) -> Oid {
    let repo = Repository::open(workdir).expect("open working copy");
    let mut index = repo.index().expect("index");
    for (name, contents) in files {
        fs::write(workdir.join(name), contents).expect("write file");
        index.add_path(Path::new(name)).expect("add");
    }
    index.write().expect("write index");
    let tree = repo.find_tree(index.write_tree().expect("write tree")).expect("tree");
    let head = repo.head().expect("head").peel_to_commit().expect("head commit");
    let sig = signature();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head])
        .expect("commit")
}

/// Commit id a local branch of the working copy points at.
pub fn local_tip(workdir: &Path, branch: &str) -> Oid {
    let repo = Repository::open(workdir).expect("open working copy");
    let tip = repo
        .find_branch(branch, BranchType::Local)
        .expect("local branch")
        .get()
        .target()
        .expect("target");
    tip
}

pub fn parent_count(workdir: &Path, commit: Oid) -> usize {
    let repo = Repository::open(workdir).expect("open working copy");
    let count = repo.find_commit(commit).expect("commit").parent_count();
    count
}
