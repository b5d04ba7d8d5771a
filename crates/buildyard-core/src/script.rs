//! Build script execution.
//!
//! Script templates are expanded, split on whitespace and executed without a
//! shell in the project working copy. Output of every script is kept next to
//! the working copy as `buildyard-stdout_<n>.log` / `buildyard-stderr_<n>.log`
//! so the artifact publisher can carry it along.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

/// Prefix of per-script log files written into the working copy.
pub const LOG_PREFIX: &str = "buildyard";

/// Errors raised while running build scripts. All are fatal for the project.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script {index} is empty after substitution")]
    Empty { index: usize },

    #[error("failed to spawn script {index} ({command}): {source}")]
    Spawn {
        index: usize,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("script {index} ({command}) exited with {}", describe_exit(.exit_code))]
    Failed {
        index: usize,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Values substituted into script templates.
#[derive(Debug, Clone, Default)]
pub struct ScriptVariables {
    pub project: String,
    pub branch: String,
    pub url: String,
    pub artifacts: String,
}

impl ScriptVariables {
    /// Replace `{{.Project}}`, `{{.Branch}}`, `{{.URL}}` and `{{.Artifacts}}`.
    ///
    /// Whitespace inside the braces is tolerated (`{{ .Branch }}`); unknown
    /// placeholders are left untouched.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            match self.lookup(after[..end].trim()) {
                Some(value) => out.push_str(value),
                None => out.push_str(&rest[start..start + 2 + end + 2]),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            ".Project" => Some(&self.project),
            ".Branch" => Some(&self.branch),
            ".URL" => Some(&self.url),
            ".Artifacts" => Some(&self.artifacts),
            _ => None,
        }
    }
}

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes one tokenized command in a directory.
///
/// Implementations must be callable from several project tasks at once.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, dir: &Path, program: &str, args: &[String]) -> io::Result<ScriptOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ScriptRunner for ProcessRunner {
    fn run(&self, dir: &Path, program: &str, args: &[String]) -> io::Result<ScriptOutput> {
        let start = Instant::now();
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        Ok(ScriptOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}

/// Path of the stdout log for script `index`.
pub fn stdout_log(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{LOG_PREFIX}-stdout_{index}.log"))
}

/// Path of the stderr log for script `index`.
pub fn stderr_log(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{LOG_PREFIX}-stderr_{index}.log"))
}

fn write_logs(dir: &Path, index: usize, stdout: &str, stderr: &str) {
    for (path, contents) in [
        (stdout_log(dir, index), stdout),
        (stderr_log(dir, index), stderr),
    ] {
        if let Err(e) = fs::write(&path, contents) {
            error!(error = %e, "Failed to write script log {}", path.display());
        }
    }
}

/// Remove script logs left behind by an earlier branch or run. Returns the
/// number of removed files.
pub fn clear_logs(dir: &Path) -> usize {
    let pattern = format!(
        "{}/{LOG_PREFIX}-std*_*.log",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "Invalid script log glob {}", pattern);
            return 0;
        }
    };

    let mut removed = 0;
    for path in entries.flatten() {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(error = %e, "Failed to remove stale script log {}", path.display()),
        }
    }
    removed
}

/// Expand, tokenize and run every script in order, stopping at the first failure.
///
/// Logs from a previous invocation are cleared first, so the working copy
/// only ever holds logs of the scripts run for the current branch.
pub fn run_scripts(
    runner: &dyn ScriptRunner,
    dir: &Path,
    scripts: &[String],
    vars: &ScriptVariables,
) -> Result<Vec<ScriptOutput>, ScriptError> {
    debug!(project = %vars.project, "Project has {} scripts configured", scripts.len());
    let stale = clear_logs(dir);
    if stale > 0 {
        debug!(project = %vars.project, branch = %vars.branch, "Removed {} stale script logs", stale);
    }

    let mut outputs = Vec::with_capacity(scripts.len());
    for (index, template) in scripts.iter().enumerate() {
        let command = vars.expand(template);
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(ScriptError::Empty { index });
        };
        let args: Vec<String> = parts.map(str::to_string).collect();

        debug!(project = %vars.project, branch = %vars.branch, "Executing script {}: {}", index, command);
        let output = match runner.run(dir, program, &args) {
            Ok(output) => output,
            Err(source) => {
                write_logs(dir, index, "", &source.to_string());
                return Err(ScriptError::Spawn {
                    index,
                    command,
                    source,
                });
            }
        };
        write_logs(dir, index, &output.stdout, &output.stderr);

        if !output.success() {
            debug!(project = %vars.project, "{}", output.stdout);
            error!(project = %vars.project, branch = %vars.branch, "{}", output.stderr);
            return Err(ScriptError::Failed {
                index,
                command,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        info!(
            project = %vars.project,
            branch = %vars.branch,
            duration_ms = output.duration.as_millis() as u64,
            "Script {} completed",
            index
        );
        outputs.push(output);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn vars() -> ScriptVariables {
        ScriptVariables {
            project: "p1".to_string(),
            branch: "main".to_string(),
            url: "https://example.com/p1.git".to_string(),
            artifacts: "out".to_string(),
        }
    }

    /// Records invocations and answers with scripted exit codes.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail_on: Option<usize>,
    }

    impl ScriptRunner for RecordingRunner {
        fn run(&self, _dir: &Path, program: &str, args: &[String]) -> io::Result<ScriptOutput> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push((program.to_string(), args.to_vec()));
            let failed = self.fail_on == Some(index);
            Ok(ScriptOutput {
                exit_code: Some(if failed { 3 } else { 0 }),
                stdout: format!("ran {program}"),
                stderr: if failed { "boom".into() } else { String::new() },
                duration: Duration::from_millis(1),
            })
        }
    }

    #[test]
    fn test_expand_substitutes_known_variables() {
        let v = vars();
        assert_eq!(
            v.expand("make BRANCH={{.Branch}} OUT={{ .Artifacts }} NAME={{.Project}}"),
            "make BRANCH=main OUT=out NAME=p1"
        );
        assert_eq!(v.expand("git clone {{.URL}}"), "git clone https://example.com/p1.git");
    }

    #[test]
    fn test_expand_leaves_unknown_and_unterminated_placeholders() {
        let v = vars();
        assert_eq!(v.expand("echo {{.Nope}}"), "echo {{.Nope}}");
        assert_eq!(v.expand("echo {{.Branch"), "echo {{.Branch");
    }

    #[test]
    fn test_run_scripts_tokenizes_in_order_and_writes_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let scripts = vec![
            "make  build   {{.Branch}}".to_string(),
            "make test".to_string(),
        ];

        let outputs = run_scripts(&runner, tmp.path(), &scripts, &vars()).expect("scripts");
        assert_eq!(outputs.len(), 2);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], ("make".to_string(), vec!["build".to_string(), "main".to_string()]));
        assert_eq!(calls[1], ("make".to_string(), vec!["test".to_string()]));

        let log = fs::read_to_string(stdout_log(tmp.path(), 1)).unwrap();
        assert_eq!(log, "ran make");
        assert!(stderr_log(tmp.path(), 0).exists());
    }

    #[test]
    fn test_failing_script_stops_later_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner {
            fail_on: Some(0),
            ..Default::default()
        };
        let scripts = vec!["false".to_string(), "never".to_string()];

        let err = run_scripts(&runner, tmp.path(), &scripts, &vars()).unwrap_err();
        assert!(matches!(err, ScriptError::Failed { index: 0, exit_code: Some(3), .. }));
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
        assert_eq!(fs::read_to_string(stderr_log(tmp.path(), 0)).unwrap(), "boom");
    }

    #[test]
    fn test_logs_of_earlier_branch_are_cleared() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let three: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        run_scripts(&runner, tmp.path(), &three, &vars()).expect("first branch");
        assert!(stdout_log(tmp.path(), 2).exists());
        fs::write(tmp.path().join("build.log"), "project log").unwrap();

        let next = ScriptVariables {
            branch: "develop".to_string(),
            ..vars()
        };
        run_scripts(&runner, tmp.path(), &["a".to_string()], &next).expect("second branch");

        assert!(stdout_log(tmp.path(), 0).exists());
        assert!(!stdout_log(tmp.path(), 1).exists());
        assert!(!stderr_log(tmp.path(), 2).exists());
        assert!(tmp.path().join("build.log").exists());
    }

    #[test]
    fn test_blank_script_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let err = run_scripts(&runner, tmp.path(), &["   ".to_string()], &vars()).unwrap_err();
        assert!(matches!(err, ScriptError::Empty { index: 0 }));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let out = ProcessRunner
            .run(tmp.path(), "echo", &["hello".to_string()])
            .expect("echo");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));

        let out = ProcessRunner.run(tmp.path(), "false", &[]).expect("false");
        assert!(!out.success());
    }

    #[test]
    fn test_process_runner_reports_missing_program() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ProcessRunner.run(tmp.path(), "buildyard-no-such-program", &[]);
        assert!(err.is_err());
    }
}
