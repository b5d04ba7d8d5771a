//! Expands a wildcard branch list to every head on the remote.

use buildyard_core::vcs::git::remote_callbacks;
use buildyard_core::{BuildPlugin, ProjectSpec};
use git2::{Direction, Remote};
use tracing::{error, info, warn};

pub const NAME: &str = "all-branches";

const HEADS_PREFIX: &str = "refs/heads/";

/// Lists the remote's branches before the project is synchronized, so no
/// working copy is needed yet.
#[derive(Debug, Default)]
pub struct AllBranches;

impl AllBranches {
    pub fn new() -> Self {
        Self
    }
}

/// Branch names advertised by the remote at `url`, sorted.
pub fn list_remote_heads(url: &str) -> Result<Vec<String>, git2::Error> {
    let mut remote = Remote::create_detached(url)?;
    let mut connection = remote.connect_auth(Direction::Fetch, Some(remote_callbacks()), None)?;

    let mut names: Vec<String> = connection
        .remote()
        .list()?
        .iter()
        .filter_map(|head| head.name().strip_prefix(HEADS_PREFIX))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

impl BuildPlugin for AllBranches {
    fn name(&self) -> &str {
        NAME
    }

    fn pre_project(&self, project: &mut ProjectSpec) {
        if !project.is_wildcard() {
            return;
        }

        match list_remote_heads(&project.url) {
            Ok(names) if names.is_empty() => {
                warn!(project = %project.path, "Remote advertises no branches, leaving wildcard in place");
            }
            Ok(names) => {
                info!(
                    project = %project.path,
                    "Expanded wildcard to {} branches: {}",
                    names.len(),
                    names.join(", ")
                );
                project.branches = names;
            }
            Err(e) => {
                error!(project = %project.path, error = %e, "Failed to list remote branches");
            }
        }
    }
}
