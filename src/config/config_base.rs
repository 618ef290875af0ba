use anyhow::{anyhow, Context, Result};
use envmnt::{ExpandOptions, ExpansionType};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::{fmt, fs};

pub use super::mongodb::MongoConfig;
pub use super::output::{Backup, Output};
pub use super::postgres::PostgresConfig;
use crate::ident::{validate_fragment, Identifier};

const MASK: &str = "********";

/// Engine kind. Supported values: postgres, mongodb
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineKind::Postgres => write!(f, "postgres"),
            EngineKind::MongoDb => write!(f, "mongodb"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "mongodb" | "mongo" => Ok(EngineKind::MongoDb),
            _ => Err(anyhow!(
                "unsupported engine `{}`, expected: postgres, mongodb",
                s
            )),
        }
    }
}

/// Configuration for one run: which engine, which databases to clone and
/// under which prefix, and how to reach the engine as an administrator.
///  - `engine`: selects the `postgres` or `mongodb` section.
///  - `prefix`: prepended to every source name to get the target name.
///  - `databases`: source databases, cloned in order.
///
/// For example:
///
/// ```yaml
/// engine: postgres
/// prefix: stage_
/// databases:
///   - billing_db
///   - crm
/// backup:
///   enabled: true
///   directory: /var/backups/dbclone
/// postgres:
///   host: localhost
///   port: 5432
///   username: postgres
///   password: ${PGPASSWORD}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub engine: EngineKind,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub databases: Vec<Identifier>,
    /// Wait suggested to the operator after terminating blocking sessions
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_password_length")]
    pub password_length: u8,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub backup: Backup,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub mongodb: Option<MongoConfig>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let masked = self.masked();
        match serde_yaml::to_string(&masked) {
            Ok(yaml) => write!(f, "{}", yaml),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl std::str::FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;

        // Validate
        config.validate()?;

        Ok(config)
    }
}

impl Config {
    pub fn new(config_path: &Path) -> Result<Self> {
        Self::read(config_path)?.expand_env_vars()
    }

    /// Parse and validate, leaving `${VAR}` references as written.
    pub fn read(config_path: &Path) -> Result<Self> {
        let config_path = config_path.to_path_buf();
        let config_str = fs::read_to_string(&config_path).context("failed to read config file")?;
        let config: Config = serde_yaml::from_str(&config_str)?;

        config.validate()?;

        Ok(config)
    }

    /// Apply command line overrides and validate again.
    pub fn with_overrides(
        mut self,
        engine: Option<EngineKind>,
        databases: Option<Vec<Identifier>>,
        prefix: Option<String>,
    ) -> Result<Self> {
        if let Some(engine) = engine {
            self.engine = engine;
        }
        if let Some(databases) = databases {
            self.databases = databases;
        }
        if let Some(prefix) = prefix {
            self.prefix = prefix;
        }

        self.validate()?;

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(anyhow!("prefix is empty"));
        }
        validate_fragment(&self.prefix).context("invalid prefix")?;

        if self.password_length < 12 || self.password_length > 128 {
            return Err(anyhow!(
                "password_length must be between 12 and 128, got {}",
                self.password_length
            ));
        }

        // Validate database names are unique
        let mut names = HashSet::new();
        for database in &self.databases {
            if !names.insert(database) {
                return Err(anyhow!("duplicated database: {}", database));
            }
        }

        // Validate the selected engine section, and every name derived from it
        match self.engine {
            EngineKind::Postgres => {
                let postgres = self
                    .postgres
                    .as_ref()
                    .ok_or_else(|| anyhow!("engine is postgres but `postgres` section is missing"))?;
                postgres.validate()?;

                for database in &self.databases {
                    let target = database.derive(&self.prefix, "")?;
                    target.derive("", "_user_owner")?;
                    target.derive(&postgres.app_role_prefix, "")?;
                    target.derive(&postgres.owner_role_prefix, "")?;
                }
            }
            EngineKind::MongoDb => {
                let mongodb = self
                    .mongodb
                    .as_ref()
                    .ok_or_else(|| anyhow!("engine is mongodb but `mongodb` section is missing"))?;
                mongodb.validate()?;

                for database in &self.databases {
                    let target = database.derive(&self.prefix, "")?;
                    target.derive("", &mongodb.app_user_suffix)?;
                }
            }
        }

        Ok(())
    }

    /// The selected postgres section.
    pub fn postgres(&self) -> Result<&PostgresConfig> {
        self.postgres
            .as_ref()
            .ok_or_else(|| anyhow!("`postgres` section is missing"))
    }

    /// The selected mongodb section.
    pub fn mongodb(&self) -> Result<&MongoConfig> {
        self.mongodb
            .as_ref()
            .ok_or_else(|| anyhow!("`mongodb` section is missing"))
    }

    // Expand env variables in config
    /// Expand env variables in the engine sections.
    pub fn expand_env_vars(&self) -> Result<Self> {
        let mut config = self.clone();

        config.postgres = match &self.postgres {
            Some(postgres) => Some(postgres.expand_env_vars()?),
            None => None,
        };
        config.mongodb = match &self.mongodb {
            Some(mongodb) => Some(mongodb.expand_env_vars()?),
            None => None,
        };

        Ok(config)
    }

    // Copy with every password replaced, for display
    fn masked(&self) -> Self {
        let mut config = self.clone();

        if let Some(postgres) = config.postgres.as_mut() {
            if !postgres.password.is_empty() {
                postgres.password = MASK.to_string();
            }
        }
        if let Some(mongodb) = config.mongodb.as_mut() {
            if mongodb.password.is_some() {
                mongodb.password = Some(MASK.to_string());
            }
        }

        config
    }
}

/// Expand environment variables in a config value.
/// For example: `${PGPASSWORD}` or `${PGHOST:localhost}`
pub fn expand_env(value: &str) -> String {
    let options = ExpandOptions {
        expansion_type: Some(ExpansionType::UnixBracketsWithDefaults),
        default_to_empty: false,
    };

    let expanded = envmnt::expand(value, Some(options));

    // Warning if still have environment variables in the value.
    // Most likely, the user forgot to export the environment variables.
    if expanded.contains("${") {
        warn!(
            "A config value may not have fully expanded environment variables: {}",
            value
        );
    }

    expanded
}

fn default_cooldown_seconds() -> u64 {
    60
}

fn default_password_length() -> u8 {
    24
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;
    use std::path::PathBuf;
    use std::str::FromStr;
    use tempfile::NamedTempFile;

    #[test]
    #[should_panic(expected = "failed to get content: invalid type: string")]
    fn test_with_basic_config() {
        let _text = "bad yaml content";
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write(_text.as_bytes())
            .expect("failed to write to temp file");
        let path = PathBuf::from(file.path().to_str().unwrap());

        Config::new(&path).expect("failed to get content");
    }

    // Test config with minimum valid YAML
    #[test]
    fn test_read_config_basic_config() {
        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            postgres: {}
        "};

        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write(_text.as_bytes())
            .expect("failed to write to temp file");
        let path = PathBuf::from(file.path().to_str().unwrap());

        let config = Config::new(&path).expect("failed to get content");
        assert_eq!(config.engine, EngineKind::Postgres);
        assert!(config.databases.is_empty());
        assert_eq!(config.cooldown_seconds, 60);
        assert_eq!(config.password_length, 24);
        assert!(!config.backup.enabled);
    }

    // Config::from_str and Config::new should return the same result
    #[test]
    fn test_read_config_from_str_and_new() {
        let _text = indoc! {"
            engine: mongodb
            prefix: stage_
            databases:
              - catalog
            mongodb:
              host: localhost
        "};

        let config_1 = Config::from_str(_text).expect("failed to get content");

        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write(_text.as_bytes())
            .expect("failed to write to temp file");
        let path = PathBuf::from(file.path().to_str().unwrap());
        let config_2 = Config::new(&path).expect("failed to get content");

        assert_eq!(config_1, config_2);
    }

    // Test config with password contains environement variable
    #[test]
    fn test_read_config_with_env_var() {
        envmnt::set("DBCLONE_TEST_PGHOST", "duyet");

        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            postgres:
              host: ${DBCLONE_TEST_PGHOST}
              password: ${DBCLONE_TEST_UNSET_PASSWORD:fallback}
        "};

        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write(_text.as_bytes())
            .expect("failed to write to temp file");
        let path = PathBuf::from(file.path().to_str().unwrap());

        let config = Config::new(&path).expect("failed to get content");
        let postgres = config.postgres().unwrap();

        assert_eq!(postgres.host, "duyet");
        assert_eq!(postgres.password, "fallback");

        envmnt::remove("DBCLONE_TEST_PGHOST");
    }

    #[test]
    fn test_read_config_keeps_env_refs_until_expanded() {
        envmnt::set("DBCLONE_TEST_READ_PGHOST", "pg.internal");

        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            postgres:
              host: ${DBCLONE_TEST_READ_PGHOST}
        "};

        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write(_text.as_bytes())
            .expect("failed to write to temp file");

        let config = Config::read(file.path()).expect("failed to get content");
        assert_eq!(config.postgres().unwrap().host, "${DBCLONE_TEST_READ_PGHOST}");

        let config = config.expand_env_vars().unwrap();
        assert_eq!(config.postgres().unwrap().host, "pg.internal");

        envmnt::remove("DBCLONE_TEST_READ_PGHOST");
    }

    #[test]
    fn test_read_config_invalid_engine() {
        let _text = indoc! {"
            engine: mysql
            prefix: stage_
        "};

        assert!(Config::from_str(_text).is_err());
    }

    #[test]
    fn test_read_config_missing_engine_section() {
        let _text = indoc! {"
            engine: mongodb
            prefix: stage_
            postgres: {}
        "};

        let err = Config::from_str(_text).unwrap_err();
        assert!(err.to_string().contains("`mongodb` section is missing"));
    }

    #[test]
    fn test_read_config_empty_prefix() {
        let _text = indoc! {"
            engine: postgres
            postgres: {}
        "};

        let err = Config::from_str(_text).unwrap_err();
        assert!(err.to_string().contains("prefix is empty"));
    }

    #[test]
    fn test_read_config_invalid_prefix() {
        let _text = indoc! {"
            engine: postgres
            prefix: \"stage-\"
            postgres: {}
        "};

        assert!(Config::from_str(_text).is_err());
    }

    #[test]
    fn test_read_config_invalid_database_name() {
        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            databases:
              - \"billing; DROP DATABASE postgres\"
            postgres: {}
        "};

        assert!(Config::from_str(_text).is_err());
    }

    #[test]
    fn test_read_config_duplicated_database() {
        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            databases:
              - billing_db
              - billing_db
            postgres: {}
        "};

        let err = Config::from_str(_text).unwrap_err();
        assert!(err.to_string().contains("duplicated database: billing_db"));
    }

    // The owner user name is the longest derived name, it must fit too
    #[test]
    fn test_read_config_derived_name_too_long() {
        let _text = format!(
            "engine: postgres\nprefix: stage_\ndatabases: [{}]\npostgres: {{}}\n",
            "d".repeat(50)
        );

        assert!(Config::from_str(&_text).is_err());
    }

    #[test]
    fn test_read_config_password_length_bounds() {
        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            password_length: 8
            postgres: {}
        "};

        assert!(Config::from_str(_text).is_err());
    }

    #[test]
    fn test_with_overrides() {
        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            databases: [billing_db]
            postgres: {}
            mongodb: {}
        "};

        let config = Config::from_str(_text).unwrap();
        let config = config
            .with_overrides(
                Some(EngineKind::MongoDb),
                Some(vec![Identifier::new("catalog").unwrap()]),
                Some("qa_".to_string()),
            )
            .unwrap();

        assert_eq!(config.engine, EngineKind::MongoDb);
        assert_eq!(config.prefix, "qa_");
        assert_eq!(config.databases, vec![Identifier::new("catalog").unwrap()]);
    }

    #[test]
    fn test_display_masks_passwords() {
        let _text = indoc! {"
            engine: postgres
            prefix: stage_
            postgres:
              password: hunter2
            mongodb:
              password: hunter3
        "};

        let config = Config::from_str(_text).unwrap();
        let shown = config.to_string();

        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("hunter3"));
        assert!(shown.contains(MASK));
    }

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!(EngineKind::from_str("postgres").unwrap(), EngineKind::Postgres);
        assert_eq!(EngineKind::from_str("MongoDB").unwrap(), EngineKind::MongoDb);
        assert!(EngineKind::from_str("oracle").is_err());
    }
}
