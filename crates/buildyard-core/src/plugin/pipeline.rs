//! Ordered, panic-isolated hook firing.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, trace};

use super::{ArtifactInfo, BranchInfo, BuildPlugin, Hook, LoadInfo, PluginError, RunInfo};
use crate::project::ProjectSpec;

/// Initialised plugins in load order. Read-only once built.
#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<Box<dyn BuildPlugin>>,
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl PluginPipeline {
    pub fn new(plugins: Vec<Box<dyn BuildPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in firing order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run one hook of one plugin, containing any panic.
    fn invoke<F>(plugin: &dyn BuildPlugin, hook: Hook, call: F) -> Option<PluginError>
    where
        F: FnOnce(),
    {
        trace!(plugin = %plugin.name(), hook = %hook, "firing hook");
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(()) => None,
            Err(payload) => {
                let err = PluginError::Panic {
                    plugin: plugin.name().to_string(),
                    hook,
                    message: panic_message(payload.as_ref()),
                };
                error!(plugin = %plugin.name(), hook = %hook, error = %err, "Plugin hook panicked");
                Some(err)
            }
        }
    }

    /// Fire `hook` on every plugin the project allows (all plugins when
    /// `project` is `None`). Returns the contained panics.
    fn fire<F>(&self, hook: Hook, project: Option<&ProjectSpec>, mut call: F) -> Vec<PluginError>
    where
        F: FnMut(&dyn BuildPlugin),
    {
        self.plugins
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| project.map_or(true, |spec| spec.allows_plugin(p.name())))
            .filter_map(|p| Self::invoke(p, hook, || call(p)))
            .collect()
    }

    pub fn post_load(&self, info: &LoadInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PostLoad, None, |p| p.post_load(info))
    }

    pub fn pre_projects(&self, info: &RunInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PreProjects, None, |p| p.pre_projects(info))
    }

    /// Plugins may rewrite `project`; the allow-list is checked against its
    /// current state before each plugin.
    pub fn pre_project(&self, project: &mut ProjectSpec) -> Vec<PluginError> {
        let mut faults = Vec::new();
        for plugin in &self.plugins {
            if !project.allows_plugin(plugin.name()) {
                continue;
            }
            let plugin = plugin.as_ref();
            if let Some(err) = Self::invoke(plugin, Hook::PreProject, || plugin.pre_project(project)) {
                faults.push(err);
            }
        }
        faults
    }

    pub fn pre_branch(&self, project: &ProjectSpec, info: &BranchInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PreBranch, Some(project), |p| p.pre_branch(info))
    }

    pub fn pre_artifacts(&self, project: &ProjectSpec, info: &ArtifactInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PreArtifacts, Some(project), |p| p.pre_artifacts(info))
    }

    pub fn post_artifacts(&self, project: &ProjectSpec, info: &ArtifactInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PostArtifacts, Some(project), |p| p.post_artifacts(info))
    }

    pub fn post_branch(&self, project: &ProjectSpec, info: &BranchInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PostBranch, Some(project), |p| p.post_branch(info))
    }

    pub fn post_project(&self, project: &ProjectSpec) -> Vec<PluginError> {
        self.fire(Hook::PostProject, Some(project), |p| p.post_project(project))
    }

    pub fn post_projects(&self, info: &RunInfo<'_>) -> Vec<PluginError> {
        self.fire(Hook::PostProjects, None, |p| p.post_projects(info))
    }
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginPipeline")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        panic_on: Option<Hook>,
    }

    impl Recorder {
        fn boxed(name: &'static str, log: &Log, panic_on: Option<Hook>) -> Box<dyn BuildPlugin> {
            Box::new(Self {
                name,
                log: log.clone(),
                panic_on,
            })
        }

        fn record(&self, hook: Hook) {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, hook));
            if self.panic_on == Some(hook) {
                panic!("{} exploded", self.name);
            }
        }
    }

    impl BuildPlugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn pre_projects(&self, _info: &RunInfo<'_>) {
            self.record(Hook::PreProjects)
        }
        fn pre_project(&self, project: &mut ProjectSpec) {
            self.record(Hook::PreProject);
            project.scripts.push(format!("added-by-{}", self.name));
        }
        fn pre_branch(&self, _info: &BranchInfo<'_>) {
            self.record(Hook::PreBranch)
        }
        fn post_branch(&self, _info: &BranchInfo<'_>) {
            self.record(Hook::PostBranch)
        }
    }

    fn branch_info<'a>(workdir: &'a Path) -> BranchInfo<'a> {
        BranchInfo {
            project: "p1",
            workdir,
            branch: "main",
            description: "",
        }
    }

    #[test]
    fn test_hooks_fire_in_load_order() {
        let log = Log::default();
        let pipeline = PluginPipeline::new(vec![
            Recorder::boxed("first", &log, None),
            Recorder::boxed("second", &log, None),
        ]);
        let spec = ProjectSpec::new("u", "p1");

        pipeline.pre_branch(&spec, &branch_info(Path::new("/w")));
        assert_eq!(*log.lock().unwrap(), vec!["first:pre_branch", "second:pre_branch"]);
    }

    #[test]
    fn test_panicking_hook_does_not_stop_siblings_or_later_phases() {
        let log = Log::default();
        let pipeline = PluginPipeline::new(vec![
            Recorder::boxed("bad", &log, Some(Hook::PreBranch)),
            Recorder::boxed("good", &log, None),
        ]);
        let spec = ProjectSpec::new("u", "p1");
        let info = branch_info(Path::new("/w"));

        let faults = pipeline.pre_branch(&spec, &info);
        assert_eq!(faults.len(), 1);
        assert!(matches!(
            &faults[0],
            PluginError::Panic { plugin, hook: Hook::PreBranch, message } if plugin == "bad" && message == "bad exploded"
        ));

        let faults = pipeline.post_branch(&spec, &info);
        assert!(faults.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["bad:pre_branch", "good:pre_branch", "bad:post_branch", "good:post_branch"]
        );
    }

    #[test]
    fn test_pre_project_mutations_are_visible_to_later_plugins() {
        let log = Log::default();
        let pipeline = PluginPipeline::new(vec![
            Recorder::boxed("a", &log, None),
            Recorder::boxed("b", &log, None),
        ]);
        let mut spec = ProjectSpec::new("u", "p1");

        pipeline.pre_project(&mut spec);
        assert_eq!(spec.scripts, vec!["added-by-a", "added-by-b"]);
    }

    #[test]
    fn test_allow_list_filters_project_hooks_but_not_run_hooks() {
        let log = Log::default();
        let pipeline = PluginPipeline::new(vec![
            Recorder::boxed("a", &log, None),
            Recorder::boxed("b", &log, None),
        ]);
        let spec = ProjectSpec::new("u", "p1").with_plugins(["b"]);

        pipeline.pre_branch(&spec, &branch_info(Path::new("/w")));
        pipeline.pre_projects(&RunInfo {
            working_dir: Path::new("/w"),
            home: Path::new("/h"),
            async_mode: false,
        });
        assert_eq!(
            *log.lock().unwrap(),
            vec!["b:pre_branch", "a:pre_projects", "b:pre_projects"]
        );
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
