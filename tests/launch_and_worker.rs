//! End-to-end coverage of `launch` followed by the hidden `worker`
//! subcommand draining the batch it created, against a fake scheduler
//! binary standing in for `qsub`.

use assert_cmd::prelude::*;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;
use tempfile::TempDir;

fn smart_dispatch_bin() -> Command {
    Command::cargo_bin("smart-dispatch").expect("binary exists")
}

/// Writes a fake `qsub` into `bin_dir` that prints an incrementing job id
/// and returns the directory it lives in, to be prepended onto `PATH`.
fn fake_scheduler(bin_dir: &std::path::Path) {
    let script_path = bin_dir.join("fake-qsub");
    let mut file = fs::File::create(&script_path).unwrap();
    writeln!(file, "#!/bin/sh\necho \"job-$$.cluster.example.org\"").unwrap();
    drop(file);
    fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn test_env() -> (TempDir, TempDir, TempDir) {
    let logs_dir = TempDir::new().unwrap();
    let config_dir = TempDir::new().unwrap();
    let bin_dir = TempDir::new().unwrap();

    fs::write(
        config_dir.path().join("testcluster.json"),
        r#"{"qtest": {"max_walltime": "01:00:00:00", "cores": 4, "ram": 1000000}}"#,
    )
    .unwrap();
    fake_scheduler(bin_dir.path());

    (logs_dir, config_dir, bin_dir)
}

fn configured_cmd(logs_dir: &TempDir, config_dir: &TempDir, bin_dir: &TempDir) -> Command {
    let mut cmd = smart_dispatch_bin();
    cmd.env("SMART_DISPATCH_DIR", logs_dir.path());
    cmd.env("SMART_DISPATCH_CONFIG_DIR", config_dir.path());
    let path = std::env::var("PATH").unwrap_or_default();
    cmd.env("PATH", format!("{}:{path}", bin_dir.path().display()));
    cmd
}

#[test]
fn launch_generates_pbs_scripts_and_submits_them() {
    let (logs_dir, config_dir, bin_dir) = test_env();

    let output = configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["launch", "-q", "qtest", "-L", "fake-qsub", "--", "echo hello"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("Batch"));
    assert!(stdout.contains("job-"));

    let batches: Vec<_> = fs::read_dir(logs_dir.path()).unwrap().collect();
    assert_eq!(batches.len(), 1);
    let batch_dir = batches[0].as_ref().unwrap().path();

    let scripts: Vec<_> = fs::read_dir(batch_dir.join("commands"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("job_commands_"))
        .collect();
    assert_eq!(scripts.len(), 1);

    let script_contents = fs::read_to_string(scripts[0].path()).unwrap();
    assert!(script_contents.contains("#PBS -q qtest"));
    assert!(script_contents.contains("echo hello"));

    assert!(batch_dir.join("jobs_id.txt").exists());
    assert!(batch_dir.join("command_line.log").exists());
    assert!(batch_dir.join("commands").join("commands.txt").exists());
}

#[test]
fn worker_drains_the_batch_created_by_launch() {
    let (logs_dir, config_dir, bin_dir) = test_env();

    configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["launch", "-q", "qtest", "-L", "fake-qsub", "--", "echo from-worker"])
        .assert()
        .success();

    let batch_dir = fs::read_dir(logs_dir.path()).unwrap().next().unwrap().unwrap().path();

    configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["worker", batch_dir.to_str().unwrap()])
        .assert()
        .success();

    let finished = fs::read_to_string(batch_dir.join("commands").join("finished_commands.txt")).unwrap();
    assert!(finished.contains("echo from-worker"));

    let command_logs: Vec<_> = fs::read_dir(batch_dir.join("logs")).unwrap().collect();
    assert!(command_logs.iter().any(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".out")));
}

#[test]
fn do_not_launch_writes_scripts_but_never_submits() {
    let (logs_dir, config_dir, bin_dir) = test_env();

    let output = configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["launch", "-q", "qtest", "-x", "-L", "fake-qsub", "--", "echo hello"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("not launched"));
    assert!(!stdout.contains("job-"));

    let batch_dir = fs::read_dir(logs_dir.path()).unwrap().next().unwrap().unwrap().path();
    let scripts: Vec<_> = fs::read_dir(batch_dir.join("commands"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("job_commands_"))
        .collect();
    assert_eq!(scripts.len(), 1);

    let jobs_id_log = fs::read_to_string(batch_dir.join("jobs_id.txt")).unwrap_or_default();
    assert!(jobs_id_log.is_empty());
}

#[test]
fn launch_with_folded_argument_seeds_every_expansion() {
    let (logs_dir, config_dir, bin_dir) = test_env();

    configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["launch", "-q", "qtest", "-L", "fake-qsub", "--", "echo [a b c]"])
        .assert()
        .success();

    let batch_dir = fs::read_dir(logs_dir.path()).unwrap().next().unwrap().unwrap().path();
    let pending = fs::read_to_string(batch_dir.join("commands").join("commands.txt")).unwrap();
    let lines: Vec<&str> = pending.lines().collect();
    assert_eq!(lines, vec!["echo a", "echo b", "echo c"]);

    // The batch name is slugified from the whole folded command line, not
    // just its first expansion — it should carry the bracketed token text.
    let batch_name = batch_dir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(batch_name.contains("a_b_c"), "batch name {batch_name} missing folded token text");
}

#[test]
fn unknown_queue_without_overrides_exits_with_code_two() {
    let (logs_dir, config_dir, bin_dir) = test_env();

    configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["launch", "-q", "mystery-queue", "-L", "fake-qsub", "--", "echo hi"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn resume_resubmits_a_batch_with_pending_commands() {
    let (logs_dir, config_dir, bin_dir) = test_env();

    configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["launch", "-q", "qtest", "-L", "fake-qsub", "--", "echo resumable"])
        .assert()
        .success();

    let batch_dir = fs::read_dir(logs_dir.path()).unwrap().next().unwrap().unwrap().path();

    let jobs_id_before = fs::read_to_string(batch_dir.join("jobs_id.txt")).unwrap();

    configured_cmd(&logs_dir, &config_dir, &bin_dir)
        .args(["resume", batch_dir.to_str().unwrap(), "-L", "fake-qsub"])
        .assert()
        .success();

    let jobs_id_after = fs::read_to_string(batch_dir.join("jobs_id.txt")).unwrap();
    assert!(jobs_id_after.len() > jobs_id_before.len());
}
