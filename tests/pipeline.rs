use anyhow::{anyhow, Result};
use chrono::{Local, TimeZone};
use dbclone::config::{Config, EngineKind};
use dbclone::engine::{CloneRequest, Engine, Provisioned};
use dbclone::ident::Identifier;
use dbclone::ledger::{CredentialPair, Credentials};
use dbclone::run::{run, Outcome};
use indoc::indoc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Engine keeping its databases in memory and recording every call.
#[derive(Default)]
struct FakeEngine {
    dryrun: bool,
    databases: HashSet<String>,
    active: HashMap<String, u64>,
    connect_fails: bool,
    backup_fails: bool,
    verify_fails: bool,
    failed_statements: Vec<String>,
    calls: Vec<String>,
}

impl FakeEngine {
    fn with_databases(names: &[&str]) -> Self {
        Self {
            databases: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn called(&self, prefix: &str) -> Vec<&String> {
        self.calls.iter().filter(|c| c.starts_with(prefix)).collect()
    }
}

impl Engine for FakeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn dryrun(&self) -> bool {
        self.dryrun
    }

    fn check_connection(&mut self) -> Result<()> {
        if self.connect_fails {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    fn database_exists(&mut self, name: &Identifier) -> Result<bool> {
        Ok(self.databases.contains(name.as_str()))
    }

    fn active_connections(&mut self, name: &Identifier) -> Result<u64> {
        Ok(self.active.get(name.as_str()).copied().unwrap_or(0))
    }

    fn termination_hint(&self, name: &Identifier) -> Vec<String> {
        vec![format!("kill sessions on {}", name)]
    }

    fn backup_extension(&self) -> &'static str {
        "dump"
    }

    fn backup(&mut self, source: &Identifier, destination: &Path) -> Result<()> {
        self.calls.push(format!("backup {}", source));
        if self.backup_fails {
            return Err(anyhow!("disk full"));
        }
        if !self.dryrun {
            fs::write(destination, source.as_str())?;
        }
        Ok(())
    }

    fn clone_database(&mut self, request: &CloneRequest) -> Result<()> {
        self.calls
            .push(format!("clone {} {}", request.source, request.target));
        if !self.dryrun {
            self.databases.insert(request.target.to_string());
        }
        Ok(())
    }

    fn provision(&mut self, request: &CloneRequest) -> Result<Provisioned> {
        self.calls.push(format!("provision {}", request.target));
        let target = &request.target;

        Ok(Provisioned {
            credentials: Credentials::Relational(CredentialPair {
                database: target.clone(),
                owner_user: target.derive("", "_user_owner")?,
                owner_password: "ownerpw".to_string(),
                app_user: target.derive("", "_user")?,
                app_password: "apppw".to_string(),
                app_role: target.derive("r_rw_", "")?,
                owner_role: target.derive("r_rc_", "")?,
            }),
            failed_statements: self.failed_statements.clone(),
        })
    }

    fn verify(&mut self, credentials: &Credentials) -> Result<()> {
        self.calls.push(format!("verify {}", credentials.database()));
        if self.verify_fails {
            return Err(anyhow!("pgbouncer unreachable"));
        }
        Ok(())
    }

    fn endpoint_metadata(&self) -> Vec<(String, String)> {
        vec![("Host".to_string(), "fake.internal".to_string())]
    }
}

fn config(dir: &Path, databases: &[&str]) -> Config {
    let mut config: Config = indoc! {"
        engine: postgres
        prefix: stage_
        databases: [placeholder]
        postgres:
          host: localhost
    "}
    .parse()
    .unwrap();

    config.databases = databases
        .iter()
        .map(|d| Identifier::new(d).unwrap())
        .collect();
    config.output.directory = dir.join("output");
    config.backup.directory = dir.join("backups");
    config
}

fn files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => vec![],
    };
    names.sort();
    names
}

fn now() -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
}

#[test]
fn ledger_has_one_entry_per_provisioned_database() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["billing_db", "crm", "catalog"]);
    let mut engine = FakeEngine::with_databases(&["billing_db", "crm", "catalog"]);

    let report = run(&config, &mut engine, now()).unwrap();

    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.exit_code(), 0);

    let summary = report.summary.expect("summary written");
    let content = fs::read_to_string(&summary).unwrap();
    assert_eq!(content.matches("Database:").count(), 3);
    assert!(content.contains("3 database(s) provisioned"));
    assert!(content.contains("Host: fake.internal"));

    assert_eq!(
        files(&dir.path().join("output")),
        vec![
            "credentials_postgres_20261018_093000.txt",
            "stage_billing_db_credentials.txt",
            "stage_catalog_credentials.txt",
            "stage_crm_credentials.txt",
        ]
    );
}

#[test]
fn missing_source_is_skipped_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["ghost", "crm"]);
    let mut engine = FakeEngine::with_databases(&["crm"]);

    let report = run(&config, &mut engine, now()).unwrap();

    assert_eq!(
        report.databases[0].outcome,
        Outcome::Skipped("source does not exist".to_string())
    );
    assert!(report.databases[1].outcome.is_provisioned());
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(engine.called("clone"), vec!["clone crm stage_crm"]);

    let content = fs::read_to_string(report.summary.unwrap()).unwrap();
    assert_eq!(content.matches("Database:").count(), 1);
}

#[test]
fn active_connections_on_source_block_clone() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["billing_db"]);
    let mut engine = FakeEngine::with_databases(&["billing_db"]);
    engine.active.insert("billing_db".to_string(), 2);

    let report = run(&config, &mut engine, now()).unwrap();

    assert!(matches!(
        &report.databases[0].outcome,
        Outcome::Skipped(reason) if reason.contains("source: 2")
    ));
    assert!(engine.called("clone").is_empty());
    assert!(engine.called("provision").is_empty());
    // nothing provisioned, nothing written
    assert!(report.summary.is_none());
    assert!(!dir.path().join("output").exists());
}

#[test]
fn active_connections_on_existing_target_block_clone() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["billing_db"]);
    let mut engine = FakeEngine::with_databases(&["billing_db", "stage_billing_db"]);
    engine.active.insert("stage_billing_db".to_string(), 1);

    let report = run(&config, &mut engine, now()).unwrap();

    assert!(matches!(
        &report.databases[0].outcome,
        Outcome::Skipped(reason) if reason.contains("target: 1")
    ));
    assert!(engine.called("clone").is_empty());
}

#[test]
fn second_run_skips_existing_target() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["catalog"]);
    let mut engine = FakeEngine::with_databases(&["catalog"]);

    let first = run(&config, &mut engine, now()).unwrap();
    assert_eq!(first.exit_code(), 0);

    let second = run(&config, &mut engine, now()).unwrap();
    assert_eq!(
        second.databases[0].outcome,
        Outcome::Skipped("target already exists".to_string())
    );
    assert_eq!(second.exit_code(), 2);
    assert_eq!(engine.called("clone").len(), 1);
    assert_eq!(engine.called("provision").len(), 1);
}

#[test]
fn backup_failure_aborts_only_that_database() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), &["billing_db"]);
    config.backup.enabled = true;
    let mut engine = FakeEngine::with_databases(&["billing_db"]);
    engine.backup_fails = true;

    let report = run(&config, &mut engine, now()).unwrap();

    assert!(matches!(
        &report.databases[0].outcome,
        Outcome::Failed(reason) if reason.contains("backup of billing_db failed")
    ));
    assert!(engine.called("clone").is_empty());
    assert_eq!(report.exit_code(), 2);
}

#[test]
fn backup_is_taken_before_clone() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), &["billing_db"]);
    config.backup.enabled = true;
    let mut engine = FakeEngine::with_databases(&["billing_db"]);

    let report = run(&config, &mut engine, now()).unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        engine.calls[..2],
        [
            "backup billing_db".to_string(),
            "clone billing_db stage_billing_db".to_string()
        ]
    );
    assert_eq!(
        files(&dir.path().join("backups")),
        vec!["billing_db_20261018_093000.dump"]
    );
}

#[test]
fn failed_verification_only_warns() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["crm"]);
    let mut engine = FakeEngine::with_databases(&["crm"]);
    engine.verify_fails = true;

    let report = run(&config, &mut engine, now()).unwrap();

    assert_eq!(
        report.databases[0].outcome,
        Outcome::Provisioned {
            failed_statements: 0
        }
    );
    assert_eq!(engine.called("verify"), vec!["verify stage_crm"]);
    assert!(report.summary.is_some());
}

#[test]
fn soft_failures_are_counted() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["crm"]);
    let mut engine = FakeEngine::with_databases(&["crm"]);
    engine.failed_statements = vec![
        "GRANT USAGE ON SCHEMA ...".to_string(),
        "ALTER TABLE ... OWNER TO ...".to_string(),
    ];

    let report = run(&config, &mut engine, now()).unwrap();

    assert_eq!(
        report.databases[0].outcome,
        Outcome::Provisioned {
            failed_statements: 2
        }
    );
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn dryrun_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), &["billing_db", "crm"]);
    config.backup.enabled = true;
    let mut engine = FakeEngine::with_databases(&["billing_db", "crm"]);
    engine.dryrun = true;

    let report = run(&config, &mut engine, now()).unwrap();

    assert_eq!(report.succeeded(), 2);
    assert!(report.summary.is_none());
    assert!(!dir.path().join("output").exists());
    assert!(!dir.path().join("backups").exists());
    assert!(!engine.databases.contains("stage_crm"));
}

#[test]
fn admin_connection_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["billing_db", "crm"]);
    let mut engine = FakeEngine::with_databases(&["billing_db", "crm"]);
    engine.connect_fails = true;

    let err = run(&config, &mut engine, now()).unwrap_err();

    assert!(format!("{:#}", err).contains("admin connection test failed: connection refused"));
    assert!(engine.calls.is_empty());
}

#[test]
fn no_database_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &[]);
    let mut engine = FakeEngine::default();

    assert!(run(&config, &mut engine, now()).is_err());
}

#[test]
fn failed_secrets_file_keeps_credentials_in_summary() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["crm", "billing_db"]);
    let mut engine = FakeEngine::with_databases(&["crm", "billing_db"]);
    // a directory where the secrets file of stage_crm should go
    fs::create_dir_all(dir.path().join("output/stage_crm_credentials.txt")).unwrap();

    let report = run(&config, &mut engine, now()).unwrap();

    assert!(matches!(
        &report.databases[0].outcome,
        Outcome::Failed(reason) if reason.contains("writing credentials of stage_crm failed")
    ));
    assert!(report.databases[1].outcome.is_provisioned());
    assert_eq!(report.exit_code(), 2);

    let content = fs::read_to_string(report.summary.unwrap()).unwrap();
    assert!(content.contains("Database:       stage_crm\n"));
    assert!(content.contains("stage_crm;stage_crm_user_owner;ownerpw;stage_crm_user;apppw"));
    assert!(content.contains("Database:       stage_billing_db\n"));
}
