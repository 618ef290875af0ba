use crate::config::EngineKind;
use crate::ident::Identifier;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use indoc::formatdoc;
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const RULE: &str = "--------------------------------------------------\n";

/// Postgres credentials for one cloned database.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub database: Identifier,
    pub owner_user: Identifier,
    pub owner_password: String,
    pub app_user: Identifier,
    pub app_password: String,
    pub app_role: Identifier,
    pub owner_role: Identifier,
}

/// MongoDB credentials for one cloned database.
#[derive(Clone, PartialEq, Eq)]
pub struct AppCredential {
    pub database: Identifier,
    pub app_user: Identifier,
    pub app_password: String,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Relational(CredentialPair),
    Document(AppCredential),
}

// Never print secrets through Debug
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Credentials::Relational(c) => write!(
                f,
                "Relational({}, owner: {}, app: {})",
                c.database, c.owner_user, c.app_user
            ),
            Credentials::Document(c) => write!(f, "Document({}, app: {})", c.database, c.app_user),
        }
    }
}

impl Credentials {
    pub fn database(&self) -> &Identifier {
        match self {
            Credentials::Relational(c) => &c.database,
            Credentials::Document(c) => &c.database,
        }
    }

    /// Minimal delimited form.
    pub fn ledger_line(&self) -> String {
        match self {
            Credentials::Relational(c) => format!(
                "{};{};{};{};{}",
                c.database, c.owner_user, c.owner_password, c.app_user, c.app_password
            ),
            Credentials::Document(c) => {
                format!("{};{};{}", c.database, c.app_user, c.app_password)
            }
        }
    }

    /// Human-readable block.
    pub fn render(&self) -> String {
        match self {
            Credentials::Relational(c) => formatdoc! {"
                Database:       {database}
                  Owner user:     {owner_user}
                  Owner password: {owner_password}
                  Owner role:     {owner_role}
                  App user:       {app_user}
                  App password:   {app_password}
                  App role:       {app_role}
                  Schema:         {owner_user}
                ",
                database = c.database,
                owner_user = c.owner_user,
                owner_password = c.owner_password,
                owner_role = c.owner_role,
                app_user = c.app_user,
                app_password = c.app_password,
                app_role = c.app_role,
            },
            Credentials::Document(c) => formatdoc! {"
                Database:       {database}
                  App user:       {app_user}
                  App password:   {app_password}
                  Auth database:  {database}
                  Role:           readWrite@{database}
                ",
                database = c.database,
                app_user = c.app_user,
                app_password = c.app_password,
            },
        }
    }
}

/// Credentials generated during a run, in provisioning order. Flushed once
/// into the run summary.
#[derive(Debug, Default)]
pub struct CredentialLedger {
    entries: Vec<Credentials>,
}

impl CredentialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, credentials: Credentials) {
        self.entries.push(credentials);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the summary of every recorded database. Nothing is written when
    /// no database was provisioned.
    pub fn flush(
        self,
        directory: &Path,
        engine: EngineKind,
        now: DateTime<Local>,
        endpoint: &[(String, String)],
    ) -> Result<Option<PathBuf>> {
        if self.is_empty() {
            info!("No database provisioned, no credentials summary written");
            return Ok(None);
        }

        let path = directory.join(format!(
            "credentials_{}_{}.txt",
            engine,
            now.format("%Y%m%d_%H%M%S")
        ));

        let mut content = formatdoc! {"
            ==================================================
            Credentials summary ({engine}) - {date}
            {count} database(s) provisioned
            ==================================================

            ",
            engine = engine,
            date = now.format("%Y-%m-%d %H:%M:%S"),
            count = self.len(),
        };
        for entry in &self.entries {
            content.push_str(&entry.render());
            content.push('\n');
        }
        // one `;` delimited line per database, for scripts
        content.push_str(RULE);
        for entry in &self.entries {
            content.push_str(&entry.ledger_line());
            content.push('\n');
        }
        content.push_str(&render_footer(endpoint));

        write_private(&path, &content)?;
        info!("Credentials summary written to {}", path.display());

        Ok(Some(path))
    }
}

/// Write the secrets file of one database right after provisioning it.
pub fn write_secrets_file(
    directory: &Path,
    credentials: &Credentials,
    endpoint: &[(String, String)],
) -> Result<PathBuf> {
    let path = directory.join(format!("{}_credentials.txt", credentials.database()));

    let content = format!("{}\n{}", credentials.render(), render_footer(endpoint));
    write_private(&path, &content)?;

    Ok(path)
}

fn render_footer(endpoint: &[(String, String)]) -> String {
    let mut footer = String::from(RULE);
    for (key, value) in endpoint {
        footer.push_str(&format!("{}: {}\n", key, value));
    }
    footer
}

// Plain text, readable by the owner only
fn write_private(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}
