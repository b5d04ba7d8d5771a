//! Fault taxonomy for the orchestration engine.
//!
//! Every error carries a [`FaultClass`] that tells the scheduler how far it
//! propagates. Panics are not part of this taxonomy: they are programming
//! faults and are re-raised at the task boundary.

use crate::artifact::ArtifactError;
use crate::config::ConfigError;
use crate::script::ScriptError;
use crate::vcs::VcsError;

/// How far a fault propagates once it leaves the component that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// Halts the whole run; no further projects are started.
    Run,
    /// Aborts the owning project only; siblings are unaffected.
    Project,
    /// Logged where it happens; processing continues.
    Recoverable,
}

/// Errors produced by the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("vcs error: {0}")]
    Vcs(#[from] VcsError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// A project no longer passes validation after `pre_project` plugins ran.
    #[error("project {project} is invalid after plugin rewrite: {source}")]
    InvalidProject {
        project: String,
        #[source]
        source: ConfigError,
    },

    #[error("project {project} still has a wildcard branch list and the wildcard policy rejects it")]
    UnresolvedWildcard { project: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Classification used by the scheduler to decide propagation.
    pub fn class(&self) -> FaultClass {
        match self {
            BuildError::Artifact(_) => FaultClass::Run,
            BuildError::Vcs(e) => e.class(),
            BuildError::Script(_) => FaultClass::Project,
            BuildError::UnresolvedWildcard { .. } => FaultClass::Project,
            BuildError::InvalidProject { .. } => FaultClass::Project,
            BuildError::Io(_) => FaultClass::Project,
        }
    }

    /// True when this fault must stop the run.
    pub fn is_fatal_to_run(&self) -> bool {
        self.class() == FaultClass::Run
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_faults_halt_the_run() {
        let err = BuildError::Artifact(ArtifactError::Remove {
            path: "/tmp/home/artifacts/p1/main".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert_eq!(err.class(), FaultClass::Run);
        assert!(err.is_fatal_to_run());
    }

    #[test]
    fn test_script_faults_are_project_scoped() {
        let err = BuildError::Script(ScriptError::Empty { index: 0 });
        assert_eq!(err.class(), FaultClass::Project);
        assert!(!err.is_fatal_to_run());
    }

    #[test]
    fn test_merge_conflict_is_project_scoped() {
        let err = BuildError::Vcs(VcsError::MergeConflicts {
            branch: "main".to_string(),
        });
        assert_eq!(err.class(), FaultClass::Project);
        assert!(err.to_string().contains("conflicts encountered"));
    }

    #[test]
    fn test_fetch_failure_is_recoverable() {
        let err = BuildError::Vcs(VcsError::Fetch {
            remote: "origin".to_string(),
            source: git2::Error::from_str("network unreachable"),
        });
        assert_eq!(err.class(), FaultClass::Recoverable);
    }

    #[test]
    fn test_invalid_project_is_project_scoped() {
        let err = BuildError::InvalidProject {
            project: "p1".to_string(),
            source: ConfigError::InvalidArtifacts {
                project: "p1".to_string(),
                artifacts: "/etc".to_string(),
            },
        };
        assert_eq!(err.class(), FaultClass::Project);
        assert!(err.to_string().contains("/etc"));
    }

    #[test]
    fn test_unresolved_wildcard_names_project() {
        let err = BuildError::UnresolvedWildcard {
            project: "p1".to_string(),
        };
        assert!(err.to_string().contains("p1"));
        assert_eq!(err.class(), FaultClass::Project);
    }
}
