//! Structured observability for run, project and branch lifecycle events.
//!
//! - `ProjectSpan` / `BranchSpan` RAII guards tag every log line emitted
//!   while processing a project or branch.
//! - `emit_*` functions log the run-level lifecycle at `info!` with an
//!   `event` field, so JSON output can be filtered by event name.

use tracing::info;

/// RAII guard for a project-scoped span.
///
/// ```ignore
/// let _span = ProjectSpan::enter(&run_id, "p1");
/// ```
pub struct ProjectSpan {
    _span: tracing::span::EnteredSpan,
}

impl ProjectSpan {
    pub fn enter(run_id: &str, project: &str) -> Self {
        let span = tracing::info_span!("buildyard.project", run_id = %run_id, project = %project);
        Self {
            _span: span.entered(),
        }
    }
}

/// RAII guard for a branch span, nested inside a [`ProjectSpan`].
pub struct BranchSpan {
    _span: tracing::span::EnteredSpan,
}

impl BranchSpan {
    pub fn enter(branch: &str, index: usize) -> Self {
        let span = tracing::info_span!("buildyard.branch", branch = %branch, index = index);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_run_started(run_id: &str, projects: usize, async_mode: bool) {
    info!(event = "run.started", run_id = %run_id, projects = projects, async_mode = async_mode);
}

/// Emit event: one project reached a terminal status.
pub fn emit_project_finished(project: &str, branches: usize, duration_ms: u64, success: bool) {
    info!(
        event = "project.finished",
        project = %project,
        branches = branches,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: artifacts of one branch were published.
pub fn emit_artifact_published(project: &str, branch: &str, destination: &std::path::Path) {
    info!(
        event = "artifact.published",
        project = %project,
        branch = %branch,
        destination = %destination.display(),
    );
}

/// Emit event: the whole run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, succeeded: usize, failed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed = failed,
    );
}
