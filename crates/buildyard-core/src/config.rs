//! `.build.json` loading and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::project::{is_nested_relative, ProjectSpec, WildcardPolicy};
use crate::telemetry::parse_level;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".build.json";

/// Errors loading or validating configuration. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("project #{index} has an empty path")]
    EmptyPath { index: usize },

    #[error("project path {path:?} must be relative and must not contain '..'")]
    InvalidPath { path: String },

    #[error("project {project} artifact path {artifacts:?} must name a directory inside the working copy")]
    InvalidArtifacts { project: String, artifacts: String },

    #[error("project {project} has an empty url")]
    EmptyUrl { project: String },

    #[error("project {project} has no branches configured")]
    NoBranches { project: String },

    #[error("project path {path:?} is configured more than once")]
    DuplicatePath { path: String },

    #[error("unknown log level {level:?}")]
    InvalidLogLevel { level: String },
}

/// `log` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: Option<String>,
}

/// The configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Root of `projects/` and `artifacts/`; blank means the working directory.
    #[serde(default)]
    pub home: String,

    /// Build projects concurrently.
    #[serde(default, rename = "async")]
    pub async_mode: bool,

    #[serde(default)]
    pub log: LogConfig,

    /// Plugin names, in load order.
    #[serde(default)]
    pub plugins: Vec<String>,

    #[serde(default)]
    pub wildcard: WildcardPolicy,

    pub projects: Vec<ProjectSpec>,
}

/// A validated configuration together with the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: BuildConfig,
    /// Raw document, handed to plugins at init.
    pub raw: Vec<u8>,
    pub path: PathBuf,
}

impl BuildConfig {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
        let raw = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_slice(&raw)?;
        Ok(LoadedConfig {
            config,
            raw,
            path: path.to_path_buf(),
        })
    }

    /// Parse and validate a JSON document.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        let config: BuildConfig = serde_json::from_slice(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (index, project) in self.projects.iter().enumerate() {
            let path = project.path.trim();
            if path.is_empty() {
                return Err(ConfigError::EmptyPath { index });
            }
            validate_project(project)?;
            if !seen.insert(path) {
                return Err(ConfigError::DuplicatePath {
                    path: project.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Absolute home directory; blank or `./` resolves to `working_dir`.
    pub fn resolve_home(&self, working_dir: &Path) -> PathBuf {
        let home = self.home.trim();
        if home.is_empty() || home == "." || home == "./" {
            return working_dir.to_path_buf();
        }
        let home = Path::new(home);
        if home.is_absolute() {
            home.to_path_buf()
        } else {
            working_dir.join(home)
        }
    }

    /// Configured log level; `INFO` when unset.
    pub fn log_level(&self) -> Result<Level, ConfigError> {
        match self.log.level.as_deref() {
            None => Ok(Level::INFO),
            Some(name) if name.trim().is_empty() => Ok(Level::INFO),
            Some(name) => parse_level(name).ok_or_else(|| ConfigError::InvalidLogLevel {
                level: name.to_string(),
            }),
        }
    }
}

/// Checks that hold for a single project on its own.
///
/// Run at load and again after `pre_project` plugins had a chance to
/// rewrite the project.
pub fn validate_project(project: &ProjectSpec) -> Result<(), ConfigError> {
    if !is_nested_relative(&project.path) {
        return Err(ConfigError::InvalidPath {
            path: project.path.clone(),
        });
    }
    if project.url.trim().is_empty() {
        return Err(ConfigError::EmptyUrl {
            project: project.path.clone(),
        });
    }
    if project.branches.is_empty() {
        return Err(ConfigError::NoBranches {
            project: project.path.clone(),
        });
    }
    // Blank means nothing is published.
    if !project.artifacts.trim().is_empty() && !is_nested_relative(&project.artifacts) {
        return Err(ConfigError::InvalidArtifacts {
            project: project.path.clone(),
            artifacts: project.artifacts.clone(),
        });
    }
    Ok(())
}
