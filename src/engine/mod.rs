//! Engine capabilities.
//!
//! The run loop only talks to [`Engine`]; the two variants decide how each
//! capability maps onto their engine.

pub mod mongodb;
pub mod postgres;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::{Config, EngineKind};
use crate::connection::PgConnector;
use crate::ident::Identifier;
use crate::ledger::Credentials;
use anyhow::Result;
use std::path::Path;

pub use self::mongodb::{MongoEngine, MongoTools, ShellClient};
pub use self::postgres::PostgresEngine;

/// One requested clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub source: Identifier,
    /// Always `prefix + source`
    pub target: Identifier,
}

impl CloneRequest {
    pub fn new(source: &Identifier, prefix: &str) -> Result<Self> {
        Ok(Self {
            source: source.clone(),
            target: source.derive(prefix, "")?,
        })
    }
}

/// Result of provisioning a cloned database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub credentials: Credentials,
    /// Statements that failed without failing the database
    pub failed_statements: Vec<String>,
}

pub trait Engine {
    fn kind(&self) -> EngineKind;

    /// Nothing is changed when set; actions are logged instead.
    fn dryrun(&self) -> bool;

    /// Trivial command as the admin identity. Failure aborts the run.
    fn check_connection(&mut self) -> Result<()>;

    fn database_exists(&mut self, name: &Identifier) -> Result<bool>;

    /// Non-idle sessions or operations on the database.
    fn active_connections(&mut self, name: &Identifier) -> Result<u64>;

    /// Engine-native commands to inspect and terminate sessions on `name`.
    fn termination_hint(&self, name: &Identifier) -> Vec<String>;

    /// File extension of backup artifacts.
    fn backup_extension(&self) -> &'static str;

    /// Dump the source database to `destination`.
    fn backup(&mut self, source: &Identifier, destination: &Path) -> Result<()>;

    /// Duplicate `request.source` into the new database `request.target`.
    fn clone_database(&mut self, request: &CloneRequest) -> Result<()>;

    /// Create identities and grant access on the freshly cloned target.
    fn provision(&mut self, request: &CloneRequest) -> Result<Provisioned>;

    /// Connect with the new credentials. Callers only warn on failure.
    fn verify(&mut self, credentials: &Credentials) -> Result<()>;

    /// Connection details appended to secrets files and the summary.
    fn endpoint_metadata(&self) -> Vec<(String, String)>;
}

/// Build the engine selected by the configuration, with the real clients.
pub fn build(config: &Config, dryrun: bool) -> Result<Box<dyn Engine>> {
    let runner: Box<dyn CommandRunner> = Box::new(SystemRunner);

    let engine: Box<dyn Engine> = match config.engine {
        EngineKind::Postgres => Box::new(PostgresEngine::new(
            config,
            Box::new(PgConnector),
            runner,
            dryrun,
        )?),
        EngineKind::MongoDb => {
            let tools = MongoTools::detect(runner.as_ref())?;
            let password = mongodb::admin_password(config.mongodb()?)?;
            Box::new(MongoEngine::new(config, tools, runner, password, dryrun)?)
        }
    };

    Ok(engine)
}
