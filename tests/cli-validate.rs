use assert_cmd::prelude::*; // Add methods on commands
use indoc::indoc;
use predicates::prelude::*; // Used for writing assertions
use std::fs;
use std::io::Write;
use std::process::Command; // Run programs
use tempfile::{NamedTempFile, TempDir};

#[test]
/// `./dbclone validate --file` must point to something that exists
fn validate_file_not_found() {
    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("validate")
        .arg("--file")
        .arg("/tmp/dbclone-test-file-not-found")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

/// Test the validate command with a valid file
#[test]
fn validate_file_valid() {
    let text = indoc! {"
        engine: postgres
        prefix: stage_
        databases: [billing_db, crm]
        postgres:
          host: localhost
          username: postgres
          password: ${DBCLONE_TEST_PASSWORD:postgres}
          schema: public
    "};

    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(text.as_bytes())
        .expect("failed to write to temp file");

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("validate")
        .arg("--file")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

/// Invalid files are reported with the reason
#[test]
fn validate_file_invalid() {
    let text = indoc! {"
        engine: postgres
        prefix: stage-
        databases: [billing_db]
        postgres:
          host: localhost
    "};

    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(text.as_bytes())
        .expect("failed to write to temp file");

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("validate")
        .arg("--file")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid"))
        .stdout(predicate::str::contains("invalid prefix"));
}

/// A directory is scanned recursively for *.yaml and *.yml
#[test]
fn validate_directory() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("mongo")).unwrap();
    fs::write(
        dir.path().join("pg.yaml"),
        indoc! {"
            engine: postgres
            prefix: stage_
            databases: [billing_db]
            postgres:
              host: localhost
        "},
    )
    .unwrap();
    fs::write(
        dir.path().join("mongo/catalog.yml"),
        indoc! {"
            engine: mongodb
            prefix: stage_
            databases: [catalog]
            mongodb:
              host: localhost
        "},
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "# not a config").unwrap();

    let mut cmd = Command::cargo_bin("dbclone").unwrap();
    cmd.arg("validate")
        .arg("--file")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("pg.yaml").and(predicate::str::contains("catalog.yml")))
        .stdout(predicate::str::contains("README.md").not());
}
