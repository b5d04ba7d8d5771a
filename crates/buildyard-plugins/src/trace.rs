//! Logs every lifecycle phase at INFO.

use std::sync::atomic::{AtomicUsize, Ordering};

use buildyard_core::{
    ArtifactInfo, BranchInfo, BuildPlugin, LoadInfo, PluginError, ProjectSpec, RunInfo,
};
use tracing::info;

pub const NAME: &str = "trace";

#[derive(Debug, Default)]
pub struct TracePlugin {
    core_version: String,
    fired: AtomicUsize,
}

impl TracePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hooks observed since init.
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::Relaxed)
    }

    fn observe(&self, hook: &str) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        info!(plugin = NAME, hook = hook, core_version = %self.core_version, "lifecycle");
    }
}

impl BuildPlugin for TracePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, raw_config: &[u8], version: &str) -> Result<(), PluginError> {
        serde_json::from_slice::<serde_json::Value>(raw_config)
            .map_err(|e| PluginError::init(NAME, e))?;
        self.core_version = version.to_string();
        info!(plugin = NAME, "Initialised against core {}", version);
        Ok(())
    }

    fn post_load(&self, info: &LoadInfo<'_>) {
        self.observe("post_load");
        info!(plugin = NAME, version = %info.version, build_time = %info.build_time, "plugins loaded");
    }

    fn pre_projects(&self, info: &RunInfo<'_>) {
        self.observe("pre_projects");
        info!(plugin = NAME, home = %info.home.display(), async_mode = info.async_mode, "starting projects");
    }

    fn pre_project(&self, project: &mut ProjectSpec) {
        self.observe("pre_project");
        info!(plugin = NAME, project = %project.path, branches = %project.branches.join(","), "starting project");
    }

    fn pre_branch(&self, info: &BranchInfo<'_>) {
        self.observe("pre_branch");
        info!(plugin = NAME, project = %info.project, branch = %info.branch, description = %info.description, "starting branch");
    }

    fn pre_artifacts(&self, info: &ArtifactInfo<'_>) {
        self.observe("pre_artifacts");
        info!(plugin = NAME, project = %info.project, branch = %info.branch, source = %info.source.display(), "publishing");
    }

    fn post_artifacts(&self, info: &ArtifactInfo<'_>) {
        self.observe("post_artifacts");
        info!(plugin = NAME, project = %info.project, branch = %info.branch, destination = %info.destination.display(), "published");
    }

    fn post_branch(&self, info: &BranchInfo<'_>) {
        self.observe("post_branch");
        info!(plugin = NAME, project = %info.project, branch = %info.branch, "finished branch");
    }

    fn post_project(&self, project: &ProjectSpec) {
        self.observe("post_project");
        info!(plugin = NAME, project = %project.path, "finished project");
    }

    fn post_projects(&self, _info: &RunInfo<'_>) {
        self.observe("post_projects");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_init_requires_json_config() {
        let mut plugin = TracePlugin::new();
        assert!(plugin.init(b"not json", "0.4.0").is_err());
        assert!(plugin.init(br#"{"projects": []}"#, "0.4.0").is_ok());
        assert_eq!(plugin.core_version, "0.4.0");
    }

    #[test]
    fn test_counts_observed_hooks() {
        let plugin = TracePlugin::new();
        let mut spec = ProjectSpec::new("u", "p1");
        plugin.pre_project(&mut spec);
        plugin.post_project(&spec);
        plugin.post_projects(&RunInfo {
            working_dir: Path::new("/w"),
            home: Path::new("/h"),
            async_mode: true,
        });
        assert_eq!(plugin.fired(), 3);
    }
}
