//! Project scheduling with per-project failure isolation.
//!
//! Every project runs the same blocking procedure on tokio's blocking pool:
//! pre-project hooks, synchronization, then for each branch checkout,
//! scripts, artifact publication and hooks, and finally post-project hooks.
//! In parallel mode all projects are started at once and joined; in
//! sequential mode they run one after another in configuration order.
//!
//! Errors are classified with [`FaultClass`]: project faults mark only the
//! owning project as failed, run faults additionally stop new projects from
//! starting. Panics are programming faults: they are logged with the
//! project context and re-raised once the other tasks have been joined.

use std::any::Any;
use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifact::ArtifactPublisher;
use crate::config::validate_project;
use crate::context::RunContext;
use crate::error::{BuildError, FaultClass};
use crate::obs::{self, BranchSpan, ProjectSpan};
use crate::plugin::pipeline::panic_message;
use crate::plugin::{ArtifactInfo, BranchInfo, PluginPipeline, RunInfo};
use crate::project::{
    BranchResult, ProjectOutcome, ProjectSpec, ProjectStatus, RunReport, WildcardPolicy,
};
use crate::script::{run_scripts, ProcessRunner, ScriptRunner, ScriptVariables};
use crate::sync::Synchronizer;
use crate::vcs::VcsBackend;

/// Drives every configured project to completion.
pub struct ProjectScheduler<B: VcsBackend + 'static> {
    ctx: Arc<RunContext>,
    backend: Arc<B>,
    runner: Arc<dyn ScriptRunner>,
    plugins: Arc<PluginPipeline>,
    publisher: ArtifactPublisher,
    wildcard: WildcardPolicy,
}

impl<B: VcsBackend + 'static> Clone for ProjectScheduler<B> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            backend: Arc::clone(&self.backend),
            runner: Arc::clone(&self.runner),
            plugins: Arc::clone(&self.plugins),
            publisher: self.publisher.clone(),
            wildcard: self.wildcard.clone(),
        }
    }
}

impl<B: VcsBackend + 'static> ProjectScheduler<B> {
    /// Scheduler with a [`ProcessRunner`] and the default wildcard policy.
    pub fn new(ctx: Arc<RunContext>, backend: B, plugins: Arc<PluginPipeline>) -> Self {
        let publisher = ArtifactPublisher::new(ctx.artifacts_root());
        Self {
            ctx,
            backend: Arc::new(backend),
            runner: Arc::new(ProcessRunner),
            plugins,
            publisher,
            wildcard: WildcardPolicy::default(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_wildcard_policy(mut self, policy: WildcardPolicy) -> Self {
        self.wildcard = policy;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn run_info(&self) -> RunInfo<'_> {
        RunInfo {
            working_dir: &self.ctx.working_dir,
            home: &self.ctx.home,
            async_mode: self.ctx.async_mode,
        }
    }

    /// Process every project and return once all of them have finished.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from any project task after the remaining tasks
    /// have been joined.
    pub async fn run(&self, projects: Vec<ProjectSpec>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Running from {} with configured home directory {}",
            self.ctx.working_dir.display(),
            self.ctx.home.display()
        );
        obs::emit_run_started(&run_id.to_string(), projects.len(), self.ctx.async_mode);

        self.plugins.pre_projects(&self.run_info());

        let outcomes = if self.ctx.async_mode {
            debug!("Asynchronous mode enabled: projects will be built in parallel");
            self.run_parallel(run_id, projects).await
        } else {
            debug!("Asynchronous mode disabled: projects will be built in sequence");
            self.run_sequential(run_id, projects).await
        };

        self.plugins.post_projects(&self.run_info());

        let report = RunReport {
            run_id,
            started_at,
            outcomes,
            duration: start.elapsed(),
        };
        obs::emit_run_finished(
            &run_id.to_string(),
            report.duration.as_millis() as u64,
            report.succeeded_count(),
            report.failed_count(),
        );
        info!("Finished processing all configured projects");
        report
    }

    async fn run_parallel(&self, run_id: Uuid, projects: Vec<ProjectSpec>) -> Vec<ProjectOutcome> {
        let names: Vec<String> = projects.iter().map(|p| p.path.clone()).collect();
        let tasks = projects.into_iter().map(|spec| {
            let this = self.clone();
            tokio::task::spawn_blocking(move || this.process_project(run_id, spec))
        });
        let joined = join_all(tasks).await;

        let mut outcomes = Vec::with_capacity(joined.len());
        let mut programming_fault: Option<Box<dyn Any + Send>> = None;
        for (name, result) in names.into_iter().zip(joined) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    error!(
                        project = %name,
                        "Processing project caused a programming fault: {}",
                        panic_message(payload.as_ref())
                    );
                    programming_fault.get_or_insert(payload);
                }
                Err(e) => {
                    error!(project = %name, error = %e, "Project task was cancelled");
                    outcomes.push(failed_outcome(&name, e.to_string()));
                }
            }
        }

        if let Some(payload) = programming_fault {
            panic::resume_unwind(payload);
        }
        outcomes
    }

    async fn run_sequential(&self, run_id: Uuid, projects: Vec<ProjectSpec>) -> Vec<ProjectOutcome> {
        let mut outcomes = Vec::with_capacity(projects.len());
        let mut halted = false;
        for spec in projects {
            if halted {
                info!(project = %spec.path, "Skipping project, the run was halted");
                outcomes.push(ProjectOutcome {
                    project: spec.path,
                    status: ProjectStatus::Skipped,
                    branches: Vec::new(),
                    duration: Duration::ZERO,
                });
                continue;
            }

            let name = spec.path.clone();
            let this = self.clone();
            let outcome = match tokio::task::spawn_blocking(move || this.process_project(run_id, spec)).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    error!(
                        project = %name,
                        "Processing project caused a programming fault: {}",
                        panic_message(payload.as_ref())
                    );
                    panic::resume_unwind(payload);
                }
                Err(e) => failed_outcome(&name, e.to_string()),
            };
            halted = matches!(outcome.status, ProjectStatus::Halted(_));
            outcomes.push(outcome);
        }
        outcomes
    }

    /// The per-project procedure, identical in both modes. Runs on a
    /// blocking thread.
    fn process_project(&self, run_id: Uuid, mut spec: ProjectSpec) -> ProjectOutcome {
        let _span = ProjectSpan::enter(&run_id.to_string(), &spec.path);
        let start = Instant::now();
        info!("Processing project {} from {}", spec.path, spec.url);

        let path = spec.path.clone();
        self.plugins.pre_project(&mut spec);
        if spec.path != path {
            warn!("A plugin renamed project {} to {}, keeping the configured path", path, spec.path);
            spec.path = path;
        }

        let mut branches = Vec::new();
        let status = match self.build_project(&spec, &mut branches) {
            Ok(()) => {
                info!("Processing project {} completed", spec.path);
                ProjectStatus::Succeeded
            }
            Err(e) => {
                let class = e.class();
                error!(error = %e, class = ?class, "Processing project {} failed", spec.path);
                if class == FaultClass::Run {
                    ProjectStatus::Halted(e.to_string())
                } else {
                    ProjectStatus::Failed(e.to_string())
                }
            }
        };

        self.plugins.post_project(&spec);

        let outcome = ProjectOutcome {
            project: spec.path,
            status,
            branches,
            duration: start.elapsed(),
        };
        obs::emit_project_finished(
            &outcome.project,
            outcome.branches.len(),
            outcome.duration.as_millis() as u64,
            outcome.succeeded(),
        );
        outcome
    }

    fn build_project(
        &self,
        spec: &ProjectSpec,
        completed: &mut Vec<BranchResult>,
    ) -> Result<(), BuildError> {
        validate_project(spec).map_err(|source| BuildError::InvalidProject {
            project: spec.path.clone(),
            source,
        })?;

        let workdir = self.ctx.project_dir(&spec.path);
        if let Some(parent) = workdir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (mut sync, outcome) =
            Synchronizer::prepare(self.backend.as_ref(), &spec.path, &spec.url, &workdir)?;
        debug!(fresh = outcome.fresh, "Repository loaded and configured");

        let branches = sync.resolve_branches(&spec.branches, &self.wildcard)?;
        let project_start = Instant::now();

        for (index, branch) in branches.iter().enumerate() {
            let _span = BranchSpan::enter(branch, index + 1);
            let branch_start = Instant::now();
            info!("Processing branch {} {}", index + 1, branch);

            let result = self.build_branch(spec, &mut sync, &workdir, branch)?;
            completed.push(result);

            info!(
                duration_ms = branch_start.elapsed().as_millis() as u64,
                "Completed branch {} {}",
                index + 1,
                branch
            );
        }

        info!(
            duration_ms = project_start.elapsed().as_millis() as u64,
            "Completed {} branches",
            completed.len()
        );
        Ok(())
    }

    fn build_branch(
        &self,
        spec: &ProjectSpec,
        sync: &mut Synchronizer<B::Copy>,
        workdir: &Path,
        branch: &str,
    ) -> Result<BranchResult, BuildError> {
        let synced = sync.sync_branch(branch)?;

        let info = BranchInfo {
            project: &spec.path,
            workdir,
            branch,
            description: &synced.description,
        };
        self.plugins.pre_branch(spec, &info);

        let vars = ScriptVariables {
            project: spec.path.clone(),
            branch: branch.to_string(),
            url: spec.url.clone(),
            artifacts: spec.artifacts.clone(),
        };
        run_scripts(self.runner.as_ref(), workdir, &spec.scripts, &vars)?;

        let mut artifact_published = false;
        if let Some(source) = self.publisher.locate(workdir, &spec.artifacts, &spec.path) {
            let destination = self.publisher.destination(&spec.path, branch);
            let artifacts = ArtifactInfo {
                project: &spec.path,
                branch,
                source: &source,
                destination: &destination,
            };
            self.plugins.pre_artifacts(spec, &artifacts);
            self.publisher.publish(&source, workdir, &spec.path, branch)?;
            self.plugins.post_artifacts(spec, &artifacts);
            obs::emit_artifact_published(&spec.path, branch, &destination);
            artifact_published = true;
        }

        self.plugins.post_branch(spec, &info);

        Ok(BranchResult {
            branch: branch.to_string(),
            description: synced.description,
            artifact_published,
        })
    }
}

fn failed_outcome(project: &str, reason: String) -> ProjectOutcome {
    ProjectOutcome {
        project: project.to_string(),
        status: ProjectStatus::Failed(reason),
        branches: Vec::new(),
        duration: Duration::ZERO,
    }
}
