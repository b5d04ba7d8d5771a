//! buildyard Core Library
//!
//! Orchestration engine for multi-repository builds: a project scheduler
//! with failure isolation, a git synchronization state machine, a
//! lifecycle-hook plugin pipeline and an artifact publisher.

pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod obs;
pub mod plugin;
pub mod project;
pub mod scheduler;
pub mod script;
pub mod sync;
pub mod telemetry;
pub mod vcs;

/// Version of the core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use artifact::{ArtifactError, ArtifactPublisher};
pub use config::{BuildConfig, ConfigError, LoadedConfig, DEFAULT_CONFIG_FILE};
pub use context::{RunContext, BUILD_TIME};
pub use error::{BuildError, FaultClass, Result};
pub use plugin::{
    load_plugins, ArtifactInfo, BranchInfo, BuildPlugin, Hook, LoadInfo, PluginCatalog,
    PluginError, PluginPipeline, RunInfo,
};
pub use project::{
    BranchResult, ProjectOutcome, ProjectSpec, ProjectStatus, RunReport, WildcardPolicy, WILDCARD,
};
pub use scheduler::ProjectScheduler;
pub use script::{ProcessRunner, ScriptError, ScriptOutput, ScriptRunner, ScriptVariables};
pub use sync::{BranchSync, SyncAction, SyncOutcome, SyncState, Synchronizer};
pub use telemetry::{init_tracing, parse_level};
pub use vcs::{GitBackend, GitWorkingCopy, VcsBackend, VcsError, WorkingCopy};
