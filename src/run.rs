use crate::clone::{self, CloneStatus};
use crate::config::Config;
use crate::engine::{CloneRequest, Engine};
use crate::guard::{self, Verdict};
use crate::ident::Identifier;
use crate::ledger::{self, CredentialLedger};
use ansi_term::Colour::{Green, Red, Yellow};
use anyhow::{anyhow, Context, Result};
use ascii_table::AsciiTable;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::fmt;
use std::path::PathBuf;

/// What happened to one requested database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Cloned and provisioned; `failed_statements` soft gaps in lenient mode
    Provisioned { failed_statements: usize },
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_provisioned(&self) -> bool {
        matches!(self, Outcome::Provisioned { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Provisioned { .. } => write!(f, "provisioned"),
            Outcome::Skipped(_) => write!(f, "skipped"),
            Outcome::Failed(_) => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseReport {
    pub source: Identifier,
    pub target: Option<Identifier>,
    pub outcome: Outcome,
}

impl DatabaseReport {
    fn detail(&self) -> String {
        match &self.outcome {
            Outcome::Provisioned {
                failed_statements: 0,
            } => "-".to_string(),
            Outcome::Provisioned { failed_statements } => {
                format!("{} statement(s) failed", failed_statements)
            }
            Outcome::Skipped(reason) | Outcome::Failed(reason) => reason.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub databases: Vec<DatabaseReport>,
    /// Credentials summary, when one was written
    pub summary: Option<PathBuf>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.databases
            .iter()
            .filter(|d| d.outcome.is_provisioned())
            .count()
    }

    pub fn total(&self) -> usize {
        self.databases.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// Process exit code: 0 when every database was provisioned, 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            2
        }
    }
}

/// Clone and provision every configured database, one at a time.
///
/// Fatal errors (no database requested, admin connection down) are returned;
/// anything going wrong with a single database is recorded in its report and
/// the run moves on to the next one.
pub fn run(config: &Config, engine: &mut dyn Engine, now: DateTime<Local>) -> Result<RunReport> {
    if config.databases.is_empty() {
        return Err(anyhow!(
            "no database to clone, set `databases` or pass --databases"
        ));
    }

    engine.check_connection().context("admin connection test failed")?;
    info!(
        "{}: connected to {} as admin",
        Green.paint("Success"),
        engine.kind()
    );

    let dryrun = engine.dryrun();
    let endpoint = engine.endpoint_metadata();
    let mut ledger = CredentialLedger::new();
    let mut report = RunReport::default();

    for source in &config.databases {
        info!("==> {}", source);

        let database = process(config, engine, source, now, &endpoint, &mut ledger);
        match &database.outcome {
            Outcome::Provisioned { .. } => {}
            Outcome::Skipped(reason) => {
                warn!("{}: {} skipped, {}", Yellow.paint("Warning"), source, reason)
            }
            Outcome::Failed(reason) => {
                error!("{}: {} failed, {}", Red.paint("Error"), source, reason)
            }
        }
        report.databases.push(database);
    }

    print_summary(&report);

    if !dryrun {
        report.summary = ledger.flush(&config.output.directory, engine.kind(), now, &endpoint)?;
    }

    let line = format!(
        "{}/{} database(s) provisioned",
        report.succeeded(),
        report.total()
    );
    if report.all_succeeded() {
        info!("{}: {}", Green.paint("Success"), line);
    } else {
        warn!("{}: {}", Yellow.paint("Warning"), line);
    }

    Ok(report)
}

// One database through guard, clone, provision and verify
fn process(
    config: &Config,
    engine: &mut dyn Engine,
    source: &Identifier,
    now: DateTime<Local>,
    endpoint: &[(String, String)],
    ledger: &mut CredentialLedger,
) -> DatabaseReport {
    let mut database = DatabaseReport {
        source: source.clone(),
        target: None,
        outcome: Outcome::Failed(String::new()),
    };

    let request = match CloneRequest::new(source, &config.prefix) {
        Ok(request) => request,
        Err(e) => {
            database.outcome = Outcome::Failed(format!("{:#}", e));
            return database;
        }
    };
    database.target = Some(request.target.clone());

    database.outcome = match pipeline(config, engine, &request, now, endpoint, ledger) {
        Ok(outcome) => outcome,
        Err(e) => Outcome::Failed(format!("{:#}", e)),
    };

    database
}

fn pipeline(
    config: &Config,
    engine: &mut dyn Engine,
    request: &CloneRequest,
    now: DateTime<Local>,
    endpoint: &[(String, String)],
    ledger: &mut CredentialLedger,
) -> Result<Outcome> {
    match guard::check(engine, request, config.cooldown_seconds)? {
        Verdict::Proceed => {}
        Verdict::MissingSource => {
            return Ok(Outcome::Skipped("source does not exist".to_string()))
        }
        Verdict::ActiveConnections { source, target } => {
            return Ok(Outcome::Skipped(format!(
                "active connections (source: {}, target: {})",
                source, target
            )))
        }
    }

    if clone::execute(engine, request, &config.backup, now)? == CloneStatus::AlreadyExists {
        return Ok(Outcome::Skipped("target already exists".to_string()));
    }

    let provisioned = engine
        .provision(request)
        .with_context(|| format!("provisioning {} failed", request.target))?;

    if !engine.dryrun() {
        // into the summary first, so the secrets survive a failed write below
        ledger.record(provisioned.credentials.clone());

        let path = ledger::write_secrets_file(
            &config.output.directory,
            &provisioned.credentials,
            endpoint,
        )
        .with_context(|| format!("writing credentials of {} failed", request.target))?;
        info!(
            "{}: credentials of {} written to {}",
            Green.paint("Success"),
            request.target,
            path.display()
        );
    }

    if let Err(e) = engine.verify(&provisioned.credentials) {
        warn!(
            "{}: connection test of {} failed: {:#}",
            Yellow.paint("Warning"),
            request.target,
            e
        );
    }

    let failed_statements = provisioned.failed_statements.len();
    if failed_statements > 0 {
        warn!(
            "{}: {} provisioned with {} failed statement(s):",
            Yellow.paint("Warning"),
            request.target,
            failed_statements
        );
        for statement in &provisioned.failed_statements {
            warn!("  {}", statement);
        }
    }

    Ok(Outcome::Provisioned { failed_statements })
}

/// Print the result table
fn print_summary(report: &RunReport) {
    let mut rows = vec![
        vec![
            "Database".to_string(),
            "Target".to_string(),
            "Status".to_string(),
            "Detail".to_string(),
        ],
        vec![
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
        ],
    ];
    for database in &report.databases {
        rows.push(vec![
            database.source.to_string(),
            database
                .target
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            database.outcome.to_string(),
            database.detail(),
        ]);
    }

    let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(120).saturating_sub(5);

    let mut table = AsciiTable::default();
    table.set_max_width(term_width);

    info!("Summary:\n{}", table.format(rows));
}
