// Command line behaviour of the scancore binary
use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn scancore(args: &[&str]) -> std::process::Output {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("empty.toml");
    fs::write(&config_path, "").expect("Failed to write config file");

    Command::new(env!("CARGO_BIN_EXE_scancore"))
        .arg("--config-file")
        .arg(&config_path)
        .args(args)
        .output()
        .expect("Failed to execute scancore")
}

#[test]
fn test_help_lists_logging_options() {
    let output = scancore(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(
        stdout.contains("--verbose") && stdout.contains("--log-format") && stdout.contains("--log-file"),
        "Expected help output to contain logging options, got: {}",
        stdout
    );
}

#[test]
fn test_list_modules() {
    let output = scancore(&["--list-modules"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("speculate"), "{stdout}");
    assert!(stdout.contains("stdout"), "{stdout}");
}

#[test]
fn test_missing_targets_is_an_error() {
    let output = scancore(&["-q"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("No targets given"), "{stderr}");
}

#[test]
fn test_unknown_module_is_an_error() {
    let output = scancore(&["-q", "-t", "example.com", "-m", "nmap"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("Unknown module 'nmap'"), "{stderr}");
}

#[test]
fn test_json_summary() {
    let output = scancore(&["-q", "--json", "-t", "10.0.0.0/30", "-m", "speculate"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["events_emitted"], 3);
    assert_eq!(summary["events_distributed"], 3);
    assert!(summary["modules"]["speculate"].is_object());
}

#[test]
fn test_json_log_file() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("scan.log");
    let output = scancore(&[
        "-q",
        "-t",
        "example.com",
        "-m",
        "speculate",
        "--log-format",
        "json",
        "--log-file",
        log_path.to_str().unwrap(),
        "--log-file-level",
        "debug",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let content = fs::read_to_string(&log_path).unwrap();
    let entries: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|entry| entry["timestamp"].is_string()));
    assert!(
        entries.iter().any(|entry| entry["module"] == "speculate"),
        "expected a record from the speculate module in {content}"
    );
}
