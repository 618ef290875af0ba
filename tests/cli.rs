use assert_cmd::prelude::*; // Add methods on commands
use indoc::formatdoc;
use predicates::prelude::*; // Used for writing assertions
use std::fs;
use std::path::Path;
use std::process::Command; // Run programs
use tempfile::TempDir;

/// Config with every artifact directory inside `dir`
fn write_config(dir: &Path, engine_section: &str) -> std::path::PathBuf {
    let text = formatdoc! {"
        engine: {engine}
        prefix: stage_
        databases: [billing_db]
        output:
          directory: {dir}/output
          log_directory: {dir}/logs
        {section}",
        engine = engine_section.lines().next().unwrap().trim_end_matches(':'),
        dir = dir.display(),
        section = engine_section,
    };

    let path = dir.join("clone.yaml");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn missing_arguments() {
    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.assert().failure();
}

#[test]
/// `./dbclone clone` must have --file or -f args
fn clone_missing_arguments() {
    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--file"));
}

#[test]
fn clone_file_not_found() {
    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .arg("--file")
        .arg("/tmp/dbclone-file-not-found.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
/// Database names are validated before anything connects
fn clone_invalid_database_name() {
    let dir = TempDir::new().unwrap();
    let file = write_config(dir.path(), "postgres:\n  host: 127.0.0.1\n  port: 1\n");

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .arg("--file")
        .arg(&file)
        .arg("--databases")
        .arg("billing_db,crm;drop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("crm;drop"));

    assert!(!dir.path().join("logs").exists());
}

#[test]
/// An unreachable server aborts the whole run with exit code 1
fn clone_postgres_unreachable() {
    let dir = TempDir::new().unwrap();
    let file = write_config(
        dir.path(),
        "postgres:\n  host: 127.0.0.1\n  port: 1\n  password: secret\n",
    );

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .arg("--file")
        .arg(&file)
        .env("RUST_LOG", "info")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("admin connection test failed"));

    // the failure is in the log file too, without colours
    let logs: Vec<_> = fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let log = fs::read_to_string(&logs[0]).unwrap();
    assert!(log.contains("[ERROR] Error: admin connection test failed"));
    assert!(!log.contains('\u{1b}'));
    assert!(!log.contains("secret"));

    // nothing was provisioned, so no summary
    assert!(!dir.path().join("output").exists());
}

#[test]
/// Without any MongoDB shell on PATH the run cannot start
fn clone_mongodb_without_shell() {
    let dir = TempDir::new().unwrap();
    let file = write_config(dir.path(), "mongodb:\n  host: 127.0.0.1\n  password: secret\n");

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .arg("--file")
        .arg(&file)
        .env("PATH", "")
        .env("RUST_LOG", "info")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no MongoDB shell client found"));
}

#[test]
/// `--engine` overrides the file, and the matching section must exist
fn clone_engine_override_without_section() {
    let dir = TempDir::new().unwrap();
    let file = write_config(dir.path(), "postgres:\n  host: 127.0.0.1\n");

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .arg("--file")
        .arg(&file)
        .arg("--engine")
        .arg("mongodb")
        .assert()
        .failure()
        .stderr(predicate::str::contains("`mongodb` section is missing"));
}

#[test]
/// A variable left unexpanded is reported on the console and in the run log
fn clone_unset_env_var_warns_in_log() {
    let dir = TempDir::new().unwrap();
    let file = write_config(
        dir.path(),
        "postgres:\n  host: 127.0.0.1\n  port: 1\n  password: ${DBCLONE_TEST_UNSET_PASSWORD}\n",
    );

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("clone")
        .arg("--file")
        .arg(&file)
        .env("RUST_LOG", "info")
        .env_remove("DBCLONE_TEST_UNSET_PASSWORD")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "may not have fully expanded environment variables",
        ));

    let logs: Vec<_> = fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    let log = fs::read_to_string(&logs[0]).unwrap();
    assert!(log.contains("[WARN] A config value may not have fully expanded"));
    assert!(log.contains("${DBCLONE_TEST_UNSET_PASSWORD}"));
}
