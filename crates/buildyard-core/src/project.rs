//! Project specifications and per-run results.

use std::path::{Component, Path};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Branch-list value meaning "build every branch".
pub const WILDCARD: &str = "*";

/// One configured project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Remote URL cloned into the working copy.
    pub url: String,
    /// Path segment under `projects/` and `artifacts/`.
    pub path: String,
    /// Build output directory, relative to the working copy.
    #[serde(default)]
    pub artifacts: String,
    /// Branches in build order, or a single [`WILDCARD`].
    pub branches: Vec<String>,
    /// Script templates run in order for every branch.
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Plugins allowed to observe this project; empty means all.
    #[serde(default)]
    pub plugins: Vec<String>,
}

impl ProjectSpec {
    pub fn new(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            artifacts: String::new(),
            branches: Vec::new(),
            scripts: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: impl Into<String>) -> Self {
        self.artifacts = artifacts.into();
        self
    }

    pub fn with_branches<S: Into<String>>(mut self, branches: impl IntoIterator<Item = S>) -> Self {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scripts<S: Into<String>>(mut self, scripts: impl IntoIterator<Item = S>) -> Self {
        self.scripts = scripts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_plugins<S: Into<String>>(mut self, plugins: impl IntoIterator<Item = S>) -> Self {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// True when the branch list asks for every branch.
    pub fn is_wildcard(&self) -> bool {
        self.branches.first().map(String::as_str) == Some(WILDCARD)
    }

    /// Whether `plugin` may receive this project's hooks.
    pub fn allows_plugin(&self, plugin: &str) -> bool {
        self.plugins.is_empty() || self.plugins.iter().any(|p| p == plugin)
    }
}

/// True when `rel` names an entry strictly below the directory it is joined
/// to: relative, no `..`, and not the directory itself.
pub fn is_nested_relative(rel: &str) -> bool {
    let mut nested = false;
    for component in Path::new(rel.trim()).components() {
        match component {
            Component::Normal(_) => nested = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    nested
}

/// What to do with a wildcard branch list no plugin expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WildcardPolicy {
    /// Build every `origin/*` branch known after fetching.
    #[default]
    Remote,
    /// Fail the project.
    Reject,
    /// Substitute a fixed list.
    Fixed(Vec<String>),
}

/// Result of one branch iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchResult {
    pub branch: String,
    /// Working-directory description after checkout; empty when unavailable.
    pub description: String,
    /// Whether build output was found and published.
    pub artifact_published: bool,
}

/// Terminal status of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ProjectStatus {
    Succeeded,
    /// A project-scoped fault; siblings were unaffected.
    Failed(String),
    /// A run-scoped fault; no further projects were started.
    Halted(String),
    /// Not started because an earlier project halted the run.
    Skipped,
}

/// Outcome of processing one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOutcome {
    pub project: String,
    pub status: ProjectStatus,
    /// Branches that completed, in build order.
    pub branches: Vec<BranchResult>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ProjectOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ProjectStatus::Succeeded
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Per-project outcomes in configuration order.
    pub outcomes: Vec<ProjectOutcome>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }

    /// True when a run-scoped fault stopped the run.
    pub fn halted(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.status, ProjectStatus::Halted(_)))
    }

    pub fn outcome(&self, project: &str) -> Option<&ProjectOutcome> {
        self.outcomes.iter().find(|o| o.project == project)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
