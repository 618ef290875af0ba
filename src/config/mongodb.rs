use crate::config::config_base::expand_env;
use crate::ident::validate_fragment;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// MongoDB section.
///
/// For example:
/// ```yaml
/// mongodb:
///   host: localhost
///   port: 27017
///   username: admin
///   password: ${MONGO_PASSWORD}
///   app_user_suffix: _app_user
///   verify:
///     connection_string: mongodb://mongos.internal:27017
/// ```
///
/// When `password` is missing, or names an unset variable, the operator is
/// prompted for it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_auth_database")]
    pub auth_database: String,
    #[serde(default = "default_app_user_suffix")]
    pub app_user_suffix: String,
    /// Parent of the transient dump directories, system temp dir if unset
    #[serde(default)]
    pub staging_directory: Option<PathBuf>,
    #[serde(default)]
    pub verify: Option<MongoVerify>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct MongoVerify {
    pub connection_string: Option<String>,
}

impl MongoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow!("mongodb host is empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("mongodb port must not be 0"));
        }
        if self.username.is_empty() {
            return Err(anyhow!("mongodb username is empty"));
        }
        if self.auth_database.is_empty() {
            return Err(anyhow!("mongodb auth_database is empty"));
        }
        if self.app_user_suffix.is_empty() {
            return Err(anyhow!("mongodb app_user_suffix is empty"));
        }
        validate_fragment(&self.app_user_suffix).context("invalid app_user_suffix")?;

        Ok(())
    }

    pub fn expand_env_vars(&self) -> Result<Self> {
        let mut config = self.clone();

        config.host = expand_env(&self.host);
        config.username = expand_env(&self.username);
        // an unset variable means no password, so the operator is prompted
        config.password = self
            .password
            .as_deref()
            .map(expand_env)
            .filter(|password| !password.contains("${"));
        config.verify = self.verify.as_ref().map(|v| MongoVerify {
            connection_string: v.connection_string.as_deref().map(expand_env),
        });

        Ok(config)
    }

    /// Connection string the new credentials are tested through.
    pub fn verify_uri(&self) -> String {
        self.verify
            .as_ref()
            .and_then(|v| v.connection_string.clone())
            .unwrap_or_else(|| format!("mongodb://{}:{}", self.host, self.port))
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            auth_database: default_auth_database(),
            app_user_suffix: default_app_user_suffix(),
            staging_directory: None,
            verify: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    27017
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_auth_database() -> String {
    "admin".to_string()
}

fn default_app_user_suffix() -> String {
    "_app_user".to_string()
}
