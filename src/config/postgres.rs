use crate::config::config_base::expand_env;
use crate::ident::{validate_fragment, Identifier};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Postgres section. The user must be allowed to create databases, roles
/// and to read `pg_stat_activity`.
///
/// For example:
/// ```yaml
/// postgres:
///   host: localhost
///   port: 5432
///   username: postgres
///   password: ${PGPASSWORD}
///   schema: public
///   app_role_prefix: r_rw_
///   owner_role_prefix: r_rc_
///   transfer_ownership: true
///   strict: false
///   verify:
///     host: pgbouncer.internal
///     port: 6432
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Database the admin session connects to for cluster-level statements
    #[serde(default = "default_admin_database")]
    pub admin_database: String,
    /// Schema of the source that gets renamed to the owner user
    #[serde(default = "default_schema")]
    pub schema: Identifier,
    #[serde(default = "default_app_role_prefix")]
    pub app_role_prefix: String,
    #[serde(default = "default_owner_role_prefix")]
    pub owner_role_prefix: String,
    #[serde(default = "default_true")]
    pub transfer_ownership: bool,
    /// Fail the database on the first failed grant instead of carrying on
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub verify: Option<PostgresVerify>,
}

/// Endpoint used to test the new credentials, usually a connection pooler or
/// load balancer in front of the cluster.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PostgresVerify {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl PostgresConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow!("postgres host is empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("postgres port must not be 0"));
        }
        if self.username.is_empty() {
            return Err(anyhow!("postgres username is empty"));
        }

        validate_fragment(&self.app_role_prefix).context("invalid app_role_prefix")?;
        validate_fragment(&self.owner_role_prefix).context("invalid owner_role_prefix")?;
        if self.app_role_prefix == self.owner_role_prefix {
            return Err(anyhow!(
                "app_role_prefix and owner_role_prefix must differ, both are `{}`",
                self.app_role_prefix
            ));
        }

        if let Some(PostgresVerify { port: Some(0), .. }) = self.verify {
            return Err(anyhow!("postgres verify port must not be 0"));
        }

        Ok(())
    }

    pub fn expand_env_vars(&self) -> Result<Self> {
        let mut config = self.clone();

        config.host = expand_env(&self.host);
        config.username = expand_env(&self.username);
        config.password = expand_env(&self.password);
        config.admin_database = expand_env(&self.admin_database);

        Ok(config)
    }

    /// Host and port the new credentials are tested through.
    pub fn verify_endpoint(&self) -> (String, u16) {
        let verify = self.verify.clone().unwrap_or_default();

        (
            verify.host.unwrap_or_else(|| self.host.clone()),
            verify.port.unwrap_or(self.port),
        )
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            admin_database: default_admin_database(),
            schema: default_schema(),
            app_role_prefix: default_app_role_prefix(),
            owner_role_prefix: default_owner_role_prefix(),
            transfer_ownership: true,
            strict: false,
            verify: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_admin_database() -> String {
    "postgres".to_string()
}

fn default_schema() -> Identifier {
    Identifier::new("public").expect("`public` is a valid identifier")
}

fn default_app_role_prefix() -> String {
    "r_rw_".to_string()
}

fn default_owner_role_prefix() -> String {
    "r_rc_".to_string()
}

fn default_true() -> bool {
    true
}
