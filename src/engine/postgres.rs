use crate::command::{CommandRunner, Invocation};
use crate::config::{Config, EngineKind, PostgresConfig};
use crate::connection::{Connector, Endpoint, SqlSession};
use crate::engine::{CloneRequest, Engine, Provisioned};
use crate::gen::gen_password;
use crate::ident::{quote_literal, Identifier};
use crate::ledger::{CredentialPair, Credentials};
use crate::provision::{self, Passwords, RelationalNames};
use crate::sql;
use ansi_term::Colour::{Green, Purple};
use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::Path;

const PG_DUMP: &str = "pg_dump";

/// Postgres variant: template copy, then the relational provisioning plan.
pub struct PostgresEngine {
    config: PostgresConfig,
    password_length: u8,
    connector: Box<dyn Connector>,
    runner: Box<dyn CommandRunner>,
    dryrun: bool,
    admin: Option<Box<dyn SqlSession>>,
}

impl PostgresEngine {
    pub fn new(
        config: &Config,
        connector: Box<dyn Connector>,
        runner: Box<dyn CommandRunner>,
        dryrun: bool,
    ) -> Result<Self> {
        if config.backup.enabled && runner.locate(PG_DUMP).is_none() {
            return Err(anyhow!(
                "backups are enabled but `{}` was not found on PATH",
                PG_DUMP
            ));
        }

        Ok(Self {
            config: config.postgres()?.clone(),
            password_length: config.password_length,
            connector,
            runner,
            dryrun,
            admin: None,
        })
    }

    fn admin_endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.config.host.clone(),
            port: self.config.port,
            user: self.config.username.clone(),
            password: self.config.password.clone(),
            database: self.config.admin_database.clone(),
        }
    }

    /// Admin session on the maintenance database, opened on first use.
    fn admin(&mut self) -> Result<&mut Box<dyn SqlSession>> {
        if self.admin.is_none() {
            let session = self.connector.connect(&self.admin_endpoint())?;
            self.admin = Some(session);
        }

        self.admin
            .as_mut()
            .ok_or_else(|| anyhow!("admin session is not open"))
    }

    fn names(&self, target: &Identifier) -> Result<RelationalNames> {
        RelationalNames::derive(
            target,
            &self.config.schema,
            &self.config.app_role_prefix,
            &self.config.owner_role_prefix,
        )
    }
}

impl Engine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn dryrun(&self) -> bool {
        self.dryrun
    }

    fn check_connection(&mut self) -> Result<()> {
        let endpoint = self.admin_endpoint();
        self.admin()?
            .execute(sql::SELECT_ONE)
            .with_context(|| format!("`{}` failed on {}", sql::SELECT_ONE, endpoint))?;

        info!("{}: connected to {}", Green.paint("Success"), endpoint);

        Ok(())
    }

    fn database_exists(&mut self, name: &Identifier) -> Result<bool> {
        let count = self
            .admin()?
            .query_count(sql::DATABASE_EXISTS, &[name.as_str()])?;

        Ok(count > 0)
    }

    fn active_connections(&mut self, name: &Identifier) -> Result<u64> {
        let count = self
            .admin()?
            .query_count(sql::ACTIVE_CONNECTIONS, &[name.as_str()])?;

        Ok(count.max(0) as u64)
    }

    fn termination_hint(&self, name: &Identifier) -> Vec<String> {
        let name = quote_literal(name.as_str());

        vec![
            format!(
                "SELECT pid, usename, application_name, client_addr, state FROM pg_stat_activity WHERE datname = {};",
                name
            ),
            format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid();",
                name
            ),
        ]
    }

    fn backup_extension(&self) -> &'static str {
        "dump"
    }

    fn backup(&mut self, source: &Identifier, destination: &Path) -> Result<()> {
        let invocation = Invocation::new(PG_DUMP)
            .secret_env("PGPASSWORD", &self.config.password)
            .args(["-h", self.config.host.as_str()])
            .args(["-p".to_string(), self.config.port.to_string()])
            .args(["-U", self.config.username.as_str()])
            .args(["-Fc", "-f"])
            .arg(destination.display().to_string())
            .arg(source.as_str());

        if self.dryrun {
            info!("{}: {}", Purple.paint("Dry-run"), invocation);
            return Ok(());
        }

        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(anyhow!("{} failed: {}", PG_DUMP, output.reason()));
        }

        Ok(())
    }

    fn clone_database(&mut self, request: &CloneRequest) -> Result<()> {
        let sql = sql::create_database_from_template(&request.target, &request.source);

        if self.dryrun {
            info!("{}: {}", Purple.paint("Dry-run"), Purple.paint(&sql));
            return Ok(());
        }

        self.admin()?.execute(&sql)?;
        info!("{}: {}", Green.paint("Success"), Purple.paint(&sql));

        Ok(())
    }

    fn provision(&mut self, request: &CloneRequest) -> Result<Provisioned> {
        let names = self.names(&request.target)?;
        let passwords = Passwords {
            owner: gen_password(self.password_length),
            app: gen_password(self.password_length),
        };
        let steps = provision::plan(&names, &passwords, self.config.transfer_ownership);

        let failed_statements = if self.dryrun {
            provision::dry_run(&steps);
            vec![]
        } else {
            let endpoint = self.admin_endpoint().with_database(names.database.as_str());
            let mut session = self.connector.connect(&endpoint)?;
            provision::execute(session.as_mut(), &steps, self.config.strict)?.failed_statements
        };

        Ok(Provisioned {
            credentials: Credentials::Relational(CredentialPair {
                database: names.database,
                owner_user: names.owner_user,
                owner_password: passwords.owner,
                app_user: names.app_user,
                app_password: passwords.app,
                app_role: names.app_role,
                owner_role: names.owner_role,
            }),
            failed_statements,
        })
    }

    fn verify(&mut self, credentials: &Credentials) -> Result<()> {
        let Credentials::Relational(credentials) = credentials else {
            return Err(anyhow!("not postgres credentials: {:?}", credentials));
        };

        let (host, port) = self.config.verify_endpoint();
        let endpoint = Endpoint {
            host,
            port,
            user: credentials.app_user.to_string(),
            password: credentials.app_password.clone(),
            database: credentials.database.to_string(),
        };

        if self.dryrun {
            info!(
                "{}: connect to {} and run `{}`",
                Purple.paint("Dry-run"),
                endpoint,
                sql::SELECT_ONE
            );
            return Ok(());
        }

        self.connector.connect(&endpoint)?.execute(sql::SELECT_ONE)?;
        info!(
            "{}: {} can connect through {}",
            Green.paint("Success"),
            credentials.app_user,
            endpoint
        );

        Ok(())
    }

    fn endpoint_metadata(&self) -> Vec<(String, String)> {
        let (verify_host, verify_port) = self.config.verify_endpoint();

        vec![
            ("Host".to_string(), self.config.host.clone()),
            ("Port".to_string(), self.config.port.to_string()),
            (
                "Application endpoint".to_string(),
                format!("{}:{}", verify_host, verify_port),
            ),
        ]
    }
}
