//! Lifecycle-hook plugins.
//!
//! A plugin implements [`BuildPlugin`] and is registered in a
//! [`PluginCatalog`] under its name. At startup the configured names are
//! looked up, constructed and initialised once; the resulting
//! [`PluginPipeline`] is read-only afterwards and shared by every project
//! task.
//!
//! Hooks fire in this order:
//!
//! ```text
//! Init → PostLoad → PreProjects → PreProject → PreBranch → PreArtifacts
//!      → PostArtifacts → PostBranch → PostProject → PostProjects
//! ```
//!
//! Hooks take `&self` and may be called from several project tasks at the
//! same time, so plugins must be reentrant. A panicking hook is contained
//! by the pipeline and never reaches the core or sibling plugins.

pub mod pipeline;
pub mod registry;

use std::fmt;
use std::path::Path;

use crate::project::ProjectSpec;

pub use pipeline::PluginPipeline;
pub use registry::{load_plugins, PluginCatalog, PluginConstructor};

/// Errors raised while loading or running plugins. Never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {name} is not registered in the catalog")]
    Unknown { name: String },

    #[error("plugin {plugin} failed to initialise: {message}")]
    Init { plugin: String, message: String },

    #[error("plugin {plugin} panicked in {hook}: {message}")]
    Panic {
        plugin: String,
        hook: Hook,
        message: String,
    },
}

impl PluginError {
    /// Convenience for plugins reporting an initialisation failure.
    pub fn init(plugin: impl Into<String>, message: impl fmt::Display) -> Self {
        PluginError::Init {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }
}

/// The ten lifecycle phases, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Init,
    PostLoad,
    PreProjects,
    PreProject,
    PreBranch,
    PreArtifacts,
    PostArtifacts,
    PostBranch,
    PostProject,
    PostProjects,
}

impl Hook {
    pub const ALL: [Hook; 10] = [
        Hook::Init,
        Hook::PostLoad,
        Hook::PreProjects,
        Hook::PreProject,
        Hook::PreBranch,
        Hook::PreArtifacts,
        Hook::PostArtifacts,
        Hook::PostBranch,
        Hook::PostProject,
        Hook::PostProjects,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Init => "init",
            Hook::PostLoad => "post_load",
            Hook::PreProjects => "pre_projects",
            Hook::PreProject => "pre_project",
            Hook::PreBranch => "pre_branch",
            Hook::PreArtifacts => "pre_artifacts",
            Hook::PostArtifacts => "post_artifacts",
            Hook::PostBranch => "post_branch",
            Hook::PostProject => "post_project",
            Hook::PostProjects => "post_projects",
        }
    }

    /// Run-level hooks go to every plugin regardless of project allow-lists.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            Hook::Init | Hook::PostLoad | Hook::PreProjects | Hook::PostProjects
        )
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Hook arguments
// ---------------------------------------------------------------------------

/// Passed to `post_load`.
#[derive(Debug, Clone, Copy)]
pub struct LoadInfo<'a> {
    pub version: &'a str,
    pub build_time: &'a str,
}

/// Passed to `pre_projects` / `post_projects`.
#[derive(Debug, Clone, Copy)]
pub struct RunInfo<'a> {
    pub working_dir: &'a Path,
    pub home: &'a Path,
    pub async_mode: bool,
}

/// Passed to `pre_branch` / `post_branch`.
#[derive(Debug, Clone, Copy)]
pub struct BranchInfo<'a> {
    pub project: &'a str,
    /// Working copy of the project.
    pub workdir: &'a Path,
    pub branch: &'a str,
    /// Working-directory description; empty when unavailable.
    pub description: &'a str,
}

/// Passed to `pre_artifacts` / `post_artifacts`.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactInfo<'a> {
    pub project: &'a str,
    pub branch: &'a str,
    /// Build output inside the working copy.
    pub source: &'a Path,
    /// Publication directory under `artifacts/`.
    pub destination: &'a Path,
}

// ---------------------------------------------------------------------------
// BuildPlugin
// ---------------------------------------------------------------------------

/// An in-process lifecycle plugin.
///
/// Every hook has a no-op default; implement only the phases you need.
pub trait BuildPlugin: Send + Sync {
    /// Name used in configuration and allow-lists.
    fn name(&self) -> &str;

    /// Called once with the raw configuration document and the core version.
    /// An error excludes the plugin from all later hooks.
    fn init(&mut self, _raw_config: &[u8], _version: &str) -> Result<(), PluginError> {
        Ok(())
    }

    fn post_load(&self, _info: &LoadInfo<'_>) {}

    fn pre_projects(&self, _info: &RunInfo<'_>) {}

    /// May rewrite the project before synchronization, e.g. to expand a
    /// wildcard branch list.
    fn pre_project(&self, _project: &mut ProjectSpec) {}

    fn pre_branch(&self, _info: &BranchInfo<'_>) {}

    fn pre_artifacts(&self, _info: &ArtifactInfo<'_>) {}

    fn post_artifacts(&self, _info: &ArtifactInfo<'_>) {}

    fn post_branch(&self, _info: &BranchInfo<'_>) {}

    fn post_project(&self, _project: &ProjectSpec) {}

    fn post_projects(&self, _info: &RunInfo<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_order_and_names() {
        assert_eq!(Hook::ALL.first(), Some(&Hook::Init));
        assert_eq!(Hook::ALL.last(), Some(&Hook::PostProjects));
        assert_eq!(Hook::PreArtifacts.to_string(), "pre_artifacts");
    }

    #[test]
    fn test_run_level_hooks() {
        assert!(Hook::PreProjects.is_run_level());
        assert!(Hook::PostLoad.is_run_level());
        assert!(!Hook::PreBranch.is_run_level());
        assert!(!Hook::PostProject.is_run_level());
    }

    #[test]
    fn test_panic_error_display() {
        let err = PluginError::Panic {
            plugin: "trace".to_string(),
            hook: Hook::PreBranch,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "plugin trace panicked in pre_branch: boom");
    }
}
