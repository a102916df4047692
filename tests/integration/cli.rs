//! Tests that drive the installed binary the way a user would.

use super::test_utils::write_render_comp_script;
use std::process::Command;
use tempfile::TempDir;

fn frameflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_frameflow"))
}

#[test]
fn test_execute_runs_named_node_only() {
    let temp = TempDir::new().unwrap();
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    let script = temp.path().join("script.json");
    write_render_comp_script(&script, &out_dir);

    let status = frameflow()
        .args(["execute", "--script"])
        .arg(&script)
        .args(["--nodes", "comp", "--frames", "2,5"])
        .current_dir(temp.path())
        .status()
        .unwrap();

    assert!(status.success());
    // execute re-runs exactly the named nodes; it does not walk upstream.
    assert!(out_dir.join("comp.2").is_file());
    assert!(out_dir.join("comp.5").is_file());
    assert!(!out_dir.join("render.2").exists());
}

#[test]
fn test_execute_unknown_node_fails() {
    let temp = TempDir::new().unwrap();
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    let script = temp.path().join("script.json");
    write_render_comp_script(&script, &out_dir);

    let output = frameflow()
        .args(["execute", "--script"])
        .arg(&script)
        .args(["--nodes", "missing"])
        .current_dir(temp.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"));
}

#[test]
fn test_dispatch_foreground_walks_upstream() {
    let temp = TempDir::new().unwrap();
    let out_dir = temp.path().join("out");
    let jobs_dir = temp.path().join("jobs");
    std::fs::create_dir_all(&out_dir).unwrap();
    let script = temp.path().join("script.json");
    write_render_comp_script(&script, &out_dir);

    let status = frameflow()
        .args(["dispatch", "--script"])
        .arg(&script)
        .args(["--nodes", "comp", "--frames", "4", "--jobs-directory"])
        .arg(&jobs_dir)
        .current_dir(temp.path())
        .status()
        .unwrap();

    assert!(status.success());
    assert!(out_dir.join("render.4").is_file());
    assert!(out_dir.join("comp.4").is_file());
}

#[test]
fn test_dispatchers_lists_builtins() {
    let output = frameflow().arg("dispatchers").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Local (default)"));
    assert!(stdout.contains("Text"));
}

#[test]
fn test_dispatch_unknown_backend_fails() {
    let temp = TempDir::new().unwrap();
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    let script = temp.path().join("script.json");
    write_render_comp_script(&script, &out_dir);

    let output = frameflow()
        .args(["dispatch", "--script"])
        .arg(&script)
        .args(["--nodes", "comp", "--dispatcher", "Farm"])
        .current_dir(temp.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown dispatcher 'Farm'"));
}
