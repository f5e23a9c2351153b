use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn eeg_sync() -> Command {
    let mut cmd = Command::cargo_bin("eeg-sync").unwrap();
    cmd.env_remove("EEG_SYNC_SUBJECT")
        .env_remove("EEG_SYNC_LOG_FILE")
        .env_remove("EEG_SYNC_MAC_ADDRESS");
    cmd
}

/// A two-trial protocol that completes in about a second
fn short_run(dir: &Path, subject: &str) -> Command {
    let mut cmd = eeg_sync();
    cmd.args([
        "run",
        "--relax-secs",
        "0.2",
        "--trial-secs",
        "0.2",
        "--rest-secs",
        "0.1",
        "--trials",
        "2",
        "--gap-secs",
        "0",
        "--sample-rate",
        "100",
        "--seed",
        "5",
        "--quiet",
        "--json",
        "--subject",
        subject,
        "-o",
    ])
    .arg(dir);
    cmd
}

fn report(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8(output.stdout.clone()).unwrap();
    serde_json::from_str(&stdout).unwrap()
}

fn marker_list(value: &serde_json::Value) -> Vec<u64> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect()
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    eeg_sync()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    eeg_sync()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("eeg-sync"));
}

#[test]
fn test_help_lists_subcommands() {
    eeg_sync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("protocol"));
}

// =============================================================================
// PROTOCOL SUBCOMMAND
// =============================================================================

#[test]
fn test_protocol_default_table() {
    eeg_sync()
        .arg("protocol")
        .assert()
        .success()
        .stdout(predicate::str::contains("relax (eyes closed)"))
        .stdout(predicate::str::contains("trial 5"))
        .stdout(predicate::str::contains(
            "Expected markers: 1,2,3,4,1,2,3,4,1,2,3,4,1,2,3,4,1,2,3,4,6",
        ))
        .stdout(predicate::str::contains("Nominal duration: 255.0s"));
}

#[test]
fn test_protocol_json_respects_overrides() {
    let output = eeg_sync()
        .args(["protocol", "--trials", "1", "--json"])
        .assert()
        .success();
    let parsed = report(output.get_output());

    assert_eq!(marker_list(&parsed["expected_markers"]), vec![1, 2, 3, 4, 6]);
    // relax, trial 1, finished
    assert_eq!(parsed["phases"].as_array().unwrap().len(), 3);
    assert_eq!(parsed["phases"][1]["start_marker"], 3);
    assert_eq!(parsed["phases"][1]["end_marker"], 4);
}

#[test]
fn test_protocol_rejects_negative_duration() {
    eeg_sync()
        .args(["protocol", "--rest-secs=-1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rest_secs"));
}

#[test]
fn test_protocol_rejects_oversized_duration() {
    eeg_sync()
        .args(["protocol", "--relax-secs", "1e20"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("relax_secs must be at most"));
}

// =============================================================================
// RUN SUBCOMMAND
// =============================================================================

#[test]
fn test_run_writes_both_exports() {
    let tmp = TempDir::new().unwrap();
    let output = short_run(tmp.path(), "T1").assert().success();
    let parsed = report(output.get_output());

    assert_eq!(parsed["subject_id"], "T1");
    assert_eq!(parsed["outcome"]["outcome"], "completed");
    assert_eq!(
        marker_list(&parsed["markers"]),
        vec![1, 2, 3, 4, 1, 2, 3, 4, 6]
    );
    assert!(parsed["samples_recorded"].as_u64().unwrap() > 0);
    assert!(parsed["acquisition_error"].is_null());

    assert!(tmp.path().join("T1_eeg_data.csv").is_file());
    assert!(tmp.path().join("T1_eeg_data.raw.edf").is_file());
}

#[test]
fn test_run_requires_subject() {
    let tmp = TempDir::new().unwrap();
    eeg_sync()
        .args(["run", "--trials", "0", "--relax-secs", "0", "-o"])
        .arg(tmp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("subject id is required"));
    assert!(!tmp.path().join("_eeg_data.csv").exists());
}

#[test]
fn test_run_rejects_oversized_duration_before_streaming() {
    let tmp = TempDir::new().unwrap();
    eeg_sync()
        .args(["run", "--trial-secs", "1e20", "--quiet", "--subject", "T10", "-o"])
        .arg(tmp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("trial_secs must be at most"));
    assert!(!tmp.path().join("T10_eeg_data.csv").exists());
}

#[test]
fn test_run_rejects_unsafe_subject() {
    let tmp = TempDir::new().unwrap();
    short_run(tmp.path(), "../escape").assert().code(2);
}

#[test]
fn test_run_missing_song_directory() {
    let tmp = TempDir::new().unwrap();
    short_run(tmp.path(), "T2")
        .arg("--songs")
        .arg(tmp.path().join("no-such-dir"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("song directory not found"));
    assert!(!tmp.path().join("T2_eeg_data.csv").exists());
}

#[test]
fn test_run_with_song_files() {
    let tmp = TempDir::new().unwrap();
    let songs = tmp.path().join("songs");
    std::fs::create_dir(&songs).unwrap();
    for name in ["song001.mp3", "song002.mp3"] {
        std::fs::write(songs.join(name), b"").unwrap();
    }

    short_run(tmp.path(), "T3")
        .arg("--songs")
        .arg(&songs)
        .assert()
        .success();
}

#[test]
fn test_run_device_disconnect_is_partial_failure() {
    let tmp = TempDir::new().unwrap();
    let output = short_run(tmp.path(), "T4")
        .args(["--disconnect-after", "30"])
        .assert()
        .code(3);
    let parsed = report(output.get_output());

    assert!(parsed["acquisition_error"].is_string());
    assert_eq!(parsed["samples_recorded"], 30);
    assert_eq!(parsed["outcome"]["outcome"], "aborted");
    assert_eq!(marker_list(&parsed["markers"]).last(), Some(&6));

    // Captured data is still saved
    assert!(tmp.path().join("T4_eeg_data.csv").is_file());
    assert!(tmp.path().join("T4_eeg_data.raw.edf").is_file());
}

#[test]
fn test_run_rejected_native_markers_still_succeeds() {
    let tmp = TempDir::new().unwrap();
    let output = short_run(tmp.path(), "T5")
        .arg("--reject-markers")
        .assert()
        .success();
    let parsed = report(output.get_output());
    assert_eq!(parsed["native_marker_failures"], 9);
    assert_eq!(marker_list(&parsed["markers"]).len(), 9);
}

#[test]
fn test_run_text_summary() {
    let tmp = TempDir::new().unwrap();
    eeg_sync()
        .args([
            "run",
            "--relax-secs",
            "0.1",
            "--trials",
            "0",
            "--gap-secs",
            "0",
            "--sample-rate",
            "100",
            "--quiet",
            "--subject",
            "T6",
            "-o",
        ])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Protocol:  completed"))
        .stdout(predicate::str::contains("Markers:   1,2,6"))
        .stdout(predicate::str::contains("Saved CSV"))
        .stdout(predicate::str::contains("Saved EDF+"));
}

#[test]
fn test_run_log_file() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("session.log");
    short_run(tmp.path(), "T7")
        .arg("--log-file")
        .arg(&log)
        .assert()
        .success();

    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.contains("Session for subject T7"));
}

// =============================================================================
// INSPECT SUBCOMMAND
// =============================================================================

#[test]
fn test_inspect_after_run() {
    let tmp = TempDir::new().unwrap();
    short_run(tmp.path(), "T8").assert().success();

    eeg_sync()
        .args(["inspect", "--subject", "T8", "-d"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Files are consistent"))
        .stdout(predicate::str::contains("Markers:  1,2,3,4,1,2,3,4,6"));
}

#[test]
fn test_inspect_json() {
    let tmp = TempDir::new().unwrap();
    short_run(tmp.path(), "T9").assert().success();

    let output = eeg_sync()
        .args(["inspect", "--json", "--subject", "T9", "-d"])
        .arg(tmp.path())
        .assert()
        .success();
    let parsed = report(output.get_output());

    assert_eq!(parsed["consistent"], true);
    assert_eq!(parsed["tabular"]["format"], "CSV");
    assert_eq!(parsed["edf"]["format"], "EDF+");
    assert_eq!(parsed["tabular"]["samples"], parsed["edf"]["samples"]);
    assert_eq!(parsed["edf"]["sample_rate"], 100.0);
}

#[test]
fn test_inspect_missing_files() {
    let tmp = TempDir::new().unwrap();
    eeg_sync()
        .args(["inspect", "--subject", "nobody", "-d"])
        .arg(tmp.path())
        .assert()
        .code(2);
}

#[test]
fn test_inspect_requires_subject_or_paths() {
    eeg_sync()
        .arg("inspect")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--subject"));
}
