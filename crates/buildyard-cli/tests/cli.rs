//! End-to-end checks of the `buildyard` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use git2::{Repository, Signature};

fn buildyard(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_buildyard"))
        .args(args)
        .current_dir(dir)
        .env_remove("BUILDYARD_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn buildyard")
}

/// Bare repository with `build.sh` committed on `main`.
fn remote_with_script(path: &Path, script: &str) -> String {
    let repo = Repository::init_bare(path).expect("init bare");
    let blob = repo.blob(script.as_bytes()).expect("blob");
    let mut builder = repo.treebuilder(None).expect("treebuilder");
    builder.insert("build.sh", blob, 0o100755).expect("insert");
    let tree = repo.find_tree(builder.write().expect("tree")).expect("find tree");
    let sig = Signature::now("fixture", "fixture@example.com").expect("signature");
    repo.commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
        .expect("commit");
    repo.set_head("refs/heads/main").expect("head");
    path.to_string_lossy().into_owned()
}

fn write_config(dir: &Path, projects: serde_json::Value) {
    let doc = serde_json::json!({
        "home": "./",
        "async": true,
        "plugins": ["trace"],
        "projects": projects,
    });
    fs::write(dir.join(".build.json"), doc.to_string()).expect("write config");
}

#[test]
fn version_flag_prints_version() {
    let tmp = tempfile::tempdir().unwrap();
    let out = buildyard(tmp.path(), &["--version"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "stdout: {stdout}");
}

#[test]
fn missing_config_exits_with_fatal_code() {
    let tmp = tempfile::tempdir().unwrap();
    let out = buildyard(tmp.path(), &[]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn invalid_config_exits_with_fatal_code() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("custom.json"),
        r#"{"projects": [{"url": "u", "path": "../escape", "branches": ["main"]}]}"#,
    )
    .unwrap();
    let out = buildyard(tmp.path(), &["--config", "custom.json"]);
    assert_eq!(out.status.code(), Some(2));
}

#[cfg(unix)]
#[test]
fn successful_run_publishes_and_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let url = remote_with_script(
        &tmp.path().join("remote.git"),
        "mkdir -p out\necho built > out/marker\n",
    );
    write_config(
        tmp.path(),
        serde_json::json!([{
            "url": url,
            "path": "p1",
            "artifacts": "out",
            "branches": ["main"],
            "scripts": ["sh build.sh"],
        }]),
    );

    let out = buildyard(tmp.path(), &["--sequential"]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(tmp.path().join("artifacts/p1/main/marker").exists());
    assert!(tmp.path().join("projects/p1/build.sh").exists());
    assert!(out.stdout.is_empty(), "logs belong on stderr");
    assert!(String::from_utf8_lossy(&out.stderr).contains("buildyard"));
}

#[cfg(unix)]
#[test]
fn publish_failure_halts_run_with_fatal_code() {
    let tmp = tempfile::tempdir().unwrap();
    let first = remote_with_script(&tmp.path().join("first.git"), "mkdir -p out\ntouch out/ok\n");
    let second = remote_with_script(&tmp.path().join("second.git"), "mkdir -p out\ntouch out/ok\n");
    write_config(
        tmp.path(),
        serde_json::json!([
            { "url": first, "path": "first", "artifacts": "out", "branches": ["main"], "scripts": ["sh build.sh"] },
            { "url": second, "path": "second", "artifacts": "out", "branches": ["main"], "scripts": ["sh build.sh"] },
        ]),
    );
    fs::write(tmp.path().join("artifacts"), "in the way").unwrap();

    let out = buildyard(tmp.path(), &["--sequential"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(tmp.path().join("projects/first").exists());
    assert!(!tmp.path().join("projects/second").exists());
}

#[test]
fn artifact_path_outside_working_copy_is_rejected_at_load() {
    let tmp = tempfile::tempdir().unwrap();
    let victim = tmp.path().join("victim");
    fs::create_dir_all(&victim).unwrap();
    write_config(
        tmp.path(),
        serde_json::json!([{
            "url": "https://example.com/p1.git",
            "path": "p1",
            "artifacts": victim.to_string_lossy(),
            "branches": ["main"],
        }]),
    );

    let out = buildyard(tmp.path(), &[]);
    assert_eq!(out.status.code(), Some(2));
    assert!(victim.exists());
    assert!(!tmp.path().join("projects").exists());
}

#[cfg(unix)]
#[test]
fn failed_project_exits_one() {
    let tmp = tempfile::tempdir().unwrap();
    let good = remote_with_script(&tmp.path().join("good.git"), "mkdir -p out\ntouch out/ok\n");
    let bad = remote_with_script(&tmp.path().join("bad.git"), "exit 1\n");
    write_config(
        tmp.path(),
        serde_json::json!([
            { "url": bad, "path": "bad", "artifacts": "out", "branches": ["main"], "scripts": ["sh build.sh"] },
            { "url": good, "path": "good", "artifacts": "out", "branches": ["main"], "scripts": ["sh build.sh"] },
        ]),
    );

    let out = buildyard(tmp.path(), &["--json"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(tmp.path().join("artifacts/good/main/ok").exists());
    assert!(!tmp.path().join("artifacts/bad").exists());
}
