//! Process-wide, read-only run context.

use std::path::PathBuf;

use crate::VERSION;

/// Build timestamp injected at compile time, if any.
pub const BUILD_TIME: &str = match option_env!("BUILDYARD_BUILD_TIME") {
    Some(t) => t,
    None => "unspecified",
};

/// Shared by every project task; never mutated after construction.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Root of `projects/` and `artifacts/`.
    pub home: PathBuf,
    /// Directory the process was started from.
    pub working_dir: PathBuf,
    /// Process projects concurrently.
    pub async_mode: bool,
    pub version: String,
    pub build_time: String,
}

impl RunContext {
    pub fn new(home: impl Into<PathBuf>, working_dir: impl Into<PathBuf>, async_mode: bool) -> Self {
        Self {
            home: home.into(),
            working_dir: working_dir.into(),
            async_mode,
            version: VERSION.to_string(),
            build_time: BUILD_TIME.to_string(),
        }
    }

    /// `«home»/projects/«project»`
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.home.join("projects").join(project)
    }

    /// `«home»/artifacts`
    pub fn artifacts_root(&self) -> PathBuf {
        self.home.join("artifacts")
    }
}
