//! Smoke tests -- verify the binary runs and key subcommands are wired.

use assert_cmd::Command;

fn loadgate() -> Command {
    let mut cmd = Command::cargo_bin("loadgate").unwrap();
    cmd.env_remove("LOADGATE_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    loadgate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Approval-gated load test scheduler"));
}

#[test]
fn test_cli_version() {
    loadgate()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("loadgate"));
}

#[test]
fn test_task_submit_subcommand_exists() {
    loadgate()
        .args(["task", "submit", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--target"));
}

#[test]
fn test_schedule_dry_run_subcommand_exists() {
    loadgate()
        .args(["schedule", "dry-run", "--help"])
        .assert()
        .success();
}

#[test]
fn test_parse_fixture() {
    loadgate()
        .args(["parse", "fixtures/locust/stats_aggregated.csv"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"error_rate\": 0.05"))
        .stdout(predicates::str::contains("\"success_count\": 950"));
}

#[test]
fn test_parse_rejects_file_without_aggregate() {
    loadgate()
        .args(["parse", "fixtures/locust/stats_no_aggregate.csv"])
        .assert()
        .failure();
}

#[test]
fn test_config_prints_defaults() {
    loadgate()
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("bind = \"0.0.0.0:8080\""))
        .stdout(predicates::str::contains("max_concurrent_runs = 4"));
}

#[test]
fn test_task_submit_and_list_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("loadgate.toml");
    let db = dir.path().join("loadgate.db");
    std::fs::write(
        &config,
        format!("[storage]\ndb_path = \"{}\"\n", db.display()),
    )
    .unwrap();

    loadgate()
        .arg("--config")
        .arg(&config)
        .args([
            "task",
            "submit",
            "--owner",
            "3",
            "--users",
            "10",
            "--target",
            "http://target.example.test",
            "--start",
            "2030-01-01T10:00",
            "--end",
            "2030-01-01T10:05",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("Task 1 submitted"));

    loadgate()
        .arg("--config")
        .arg(&config)
        .args(["task", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("pending"))
        .stdout(predicates::str::contains("http://target.example.test"));

    loadgate()
        .arg("--config")
        .arg(&config)
        .args(["task", "approve", "1"])
        .assert()
        .success();

    loadgate()
        .arg("--config")
        .arg(&config)
        .args(["task", "approve", "1"])
        .assert()
        .failure();
}

#[test]
fn test_unreadable_env_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    loadgate()
        .env("LOADGATE_CONFIG", dir.path().join("missing.toml"))
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("bind = \"0.0.0.0:8080\""))
        .stderr(predicates::str::contains("could not be loaded"));
}

#[test]
fn test_explicit_config_must_load() {
    let dir = tempfile::tempdir().unwrap();
    loadgate()
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("config")
        .assert()
        .failure();
}
