use anyhow::{Context, Result};
use log::debug;
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use std::fmt;

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Endpoint {
    /// Same server and credentials, other database.
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }
}

// Never print the password
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An open SQL session.
pub trait SqlSession {
    /// Run a statement without parameters.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a `SELECT count(*)` style query returning one bigint.
    fn query_count(&mut self, sql: &str, params: &[&str]) -> Result<i64>;

    /// Run a query returning one text column.
    fn query_names(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>>;
}

/// Opens sessions.
pub trait Connector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SqlSession>>;
}

pub struct DbConnection {
    client: Client,
}

impl DbConnection {
    /// Connect to the endpoint.
    ///
    /// Refer to https://rust-lang-nursery.github.io/rust-cookbook/database/postgres.html
    pub fn connect(endpoint: &Endpoint) -> Result<Self> {
        let client = postgres::Config::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .user(&endpoint.user)
            .password(&endpoint.password)
            .dbname(&endpoint.database)
            .application_name("dbclone")
            .connect(NoTls)
            .with_context(|| format!("could not connect to {}", endpoint))?;

        debug!("Connected to database: {}", endpoint);

        Ok(Self { client })
    }
}

fn to_params<'a>(params: &'a [&'a str]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl SqlSession for DbConnection {
    fn execute(&mut self, sql: &str) -> Result<()> {
        // simple query protocol, some DDL (CREATE DATABASE) refuses to be prepared
        self.client.batch_execute(sql)?;

        Ok(())
    }

    fn query_count(&mut self, sql: &str, params: &[&str]) -> Result<i64> {
        let row = self.client.query_one(sql, &to_params(params))?;

        Ok(row.try_get(0)?)
    }

    fn query_names(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>> {
        let mut names = vec![];
        for row in self.client.query(sql, &to_params(params))? {
            names.push(row.try_get(0)?);
        }

        Ok(names)
    }
}

/// Connects with the `postgres` client.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

impl Connector for PgConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(DbConnection::connect(endpoint)?))
    }
}
