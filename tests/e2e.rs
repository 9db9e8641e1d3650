use std::process::Command;

use tempfile::TempDir;

const HEADER: &str = "account,limit_1m,limit_2m,limit_3m,limit_4m";

fn run(requests: &str, database: Option<&TempDir>) -> (String, String, bool) {
    let mut command = Command::new(env!("CARGO_BIN_EXE_kredit-ledger"));
    command
        .arg("tests/fixtures/limits.csv")
        .arg(format!("tests/fixtures/{requests}"))
        .env("RUST_LOG", "warn")
        .env_remove("KREDIT_DATABASE");
    if let Some(dir) = database {
        command.env("KREDIT_DATABASE", dir.path().join("ledger.db"));
    }
    let output = command.output().expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn authorizes_and_reports_limits() {
    let (stdout, stderr, success) = run("requests.csv", None);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "1,0.0000,0.0000,0.0000,0.0000",
            "2,500000.0000,600000.0000,750000.0000,1000000.0000",
            "3,100000.0000,200000.0000,500000.0000,700000.0000",
        ]
    );
}

#[test]
fn malformed_rows_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv", None);

    assert!(success);
    assert!(stderr.contains("line 3"));
    assert!(stderr.contains("failed to parse row"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(
        lines[2],
        "2,500000.0000,600000.0000,750000.0000,1000000.0000"
    );
}

#[test]
fn sqlite_state_persists_across_runs() {
    let dir = tempfile::tempdir().unwrap();

    let (stdout, stderr, success) = run("requests.csv", Some(&dir));
    assert!(success, "stderr: {stderr}");
    assert!(stdout.contains("2,500000.0000,600000.0000,750000.0000,1000000.0000"));

    // seeding keeps the rescaled limits; the same requests now drain account 2
    // and find account 1 exhausted
    let (stdout, stderr, success) = run("requests.csv", Some(&dir));
    assert!(success, "stderr: {stderr}");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "1,0.0000,0.0000,0.0000,0.0000",
            "2,0.0000,0.0000,0.0000,0.0000",
            "3,100000.0000,200000.0000,500000.0000,700000.0000",
        ]
    );
}

#[test]
fn missing_arguments_fail() {
    let output = Command::new(env!("CARGO_BIN_EXE_kredit-ledger"))
        .arg("tests/fixtures/limits.csv")
        .output()
        .expect("failed to run binary");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage"));
}
