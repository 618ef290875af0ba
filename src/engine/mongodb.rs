use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::config::{Config, EngineKind, MongoConfig};
use crate::engine::{CloneRequest, Engine, Provisioned};
use crate::gen::gen_password;
use crate::ident::{js_string, Identifier};
use crate::ledger::{AppCredential, Credentials};
use ansi_term::Colour::{Green, Purple, Yellow};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

const MONGODUMP: &str = "mongodump";
const MONGORESTORE: &str = "mongorestore";

/// Prefix of transient dump directories.
pub const STAGING_PREFIX: &str = "dbclone-dump-";

/// Prefix of the private files passwords are handed over in.
const SECRET_PREFIX: &str = "dbclone-secret-";

/// Staging directories older than this are leftovers of a killed run.
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// MongoDB shells, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellClient {
    Mongosh,
    Legacy,
}

impl ShellClient {
    pub const RANKED: [ShellClient; 2] = [ShellClient::Mongosh, ShellClient::Legacy];

    pub fn program(&self) -> &'static str {
        match self {
            ShellClient::Mongosh => "mongosh",
            ShellClient::Legacy => "mongo",
        }
    }
}

/// External programs, located once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoTools {
    pub shell: ShellClient,
    pub dump: PathBuf,
    pub restore: PathBuf,
}

impl MongoTools {
    pub fn detect(runner: &dyn CommandRunner) -> Result<Self> {
        let shell = ShellClient::RANKED
            .iter()
            .copied()
            .find(|shell| runner.locate(shell.program()).is_some())
            .ok_or_else(|| {
                anyhow!("no MongoDB shell client found on PATH (tried: mongosh, mongo)")
            })?;

        if shell == ShellClient::Legacy {
            warn!(
                "{}: `mongosh` not found, falling back to the legacy `mongo` shell",
                Yellow.paint("Warning")
            );
        }

        let dump = runner
            .locate(MONGODUMP)
            .ok_or_else(|| anyhow!("`{}` was not found on PATH", MONGODUMP))?;
        let restore = runner
            .locate(MONGORESTORE)
            .ok_or_else(|| anyhow!("`{}` was not found on PATH", MONGORESTORE))?;

        debug!("using {} and {}", shell.program(), dump.display());

        Ok(Self {
            shell,
            dump,
            restore,
        })
    }
}

/// Admin password from the config, or asked on the terminal without echo.
pub fn admin_password(config: &MongoConfig) -> Result<String> {
    match &config.password {
        Some(password) if !password.is_empty() => Ok(password.clone()),
        _ => confirm_password(&config.username, |prompt| rpassword::prompt_password(prompt)),
    }
}

/// Same as the terminal prompt, answers read from `input`.
pub fn prompt_password(
    user: &str,
    mut input: &mut dyn BufRead,
    mut output: &mut dyn Write,
) -> Result<String> {
    confirm_password(user, |prompt| {
        rpassword::prompt_password_from_bufread(&mut input, &mut output, prompt)
    })
}

/// Ask twice and require both answers to match.
fn confirm_password(
    user: &str,
    mut ask: impl FnMut(&str) -> io::Result<String>,
) -> Result<String> {
    let password = ask(&format!("MongoDB password for {}: ", user))
        .context("no MongoDB admin password provided")?;
    if password.is_empty() {
        return Err(anyhow!("no MongoDB admin password provided"));
    }

    let confirm = ask("Confirm password: ").context("no MongoDB admin password provided")?;
    if password != confirm {
        return Err(anyhow!("passwords do not match"));
    }

    Ok(password)
}

/// Remove staging directories left by runs that were killed.
pub fn sweep_stale_staging(parent: &Path) -> Result<usize> {
    let mut removed = 0;
    if !parent.is_dir() {
        return Ok(removed);
    }

    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let is_staging = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(STAGING_PREFIX))
            .unwrap_or(false);
        if !is_staging || !entry.path().is_dir() {
            continue;
        }

        let age = entry
            .metadata()?
            .modified()?
            .elapsed()
            .unwrap_or_default();
        if age >= STALE_AFTER {
            fs::remove_dir_all(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
            info!("Removed stale staging directory {}", entry.path().display());
            removed += 1;
        }
    }

    Ok(removed)
}

/// MongoDB variant: dump and restore with namespace rewrite, then one
/// `readWrite` user scoped to the target.
pub struct MongoEngine {
    config: MongoConfig,
    password: String,
    password_length: u8,
    tools: MongoTools,
    runner: Box<dyn CommandRunner>,
    dryrun: bool,
}

/// Who a shell script authenticates as.
struct Login<'a> {
    database: &'a str,
    user: &'a str,
    password: &'a str,
}

/// Private (0600) temp file holding a secret for the duration of one call,
/// so passwords never appear in a process's arguments.
fn secret_file(suffix: &str, contents: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(SECRET_PREFIX)
        .suffix(suffix)
        .tempfile()
        .context("failed to create a private temp file")?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;

    Ok(file)
}

/// `script` preceded by authentication; a rejected login exits 1 in both shells.
fn authenticated(login: &Login, script: &str) -> String {
    format!(
        "if (!db.getSiblingDB({}).auth({}, {})) {{ quit(1); }}\n{}\n",
        js_string(login.database),
        js_string(login.user),
        js_string(login.password),
        script
    )
}

impl MongoEngine {
    pub fn new(
        config: &Config,
        tools: MongoTools,
        runner: Box<dyn CommandRunner>,
        password: String,
        dryrun: bool,
    ) -> Result<Self> {
        let engine = Self {
            config: config.mongodb()?.clone(),
            password,
            password_length: config.password_length,
            tools,
            runner,
            dryrun,
        };

        if !dryrun {
            if let Err(e) = sweep_stale_staging(&engine.staging_parent()) {
                warn!(
                    "{}: could not sweep stale staging directories: {:#}",
                    Yellow.paint("Warning"),
                    e
                );
            }
        }

        Ok(engine)
    }

    fn staging_parent(&self) -> PathBuf {
        self.config
            .staging_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    fn admin_login(&self) -> Login<'_> {
        Login {
            database: &self.config.auth_database,
            user: &self.config.username,
            password: &self.password,
        }
    }

    fn admin_address(&self) -> Vec<String> {
        vec![
            "--host".to_string(),
            self.config.host.clone(),
            "--port".to_string(),
            self.config.port.to_string(),
            self.config.auth_database.clone(),
        ]
    }

    /// Run `script` through the shell and return the last line it printed.
    fn shell(&self, address: Vec<String>, login: &Login, script: &str) -> Result<String> {
        let file = secret_file(".js", &authenticated(login, script))?;
        let invocation = Invocation::new(self.tools.shell.program())
            .arg("--quiet")
            .args(address)
            .arg(file.path().display().to_string());

        let output = self.runner.run(&invocation)?;
        check(&invocation, &output)?;

        output
            .last_line()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("`{}` printed nothing", self.tools.shell.program()))
    }

    /// Run a script as admin.
    fn eval(&self, script: &str) -> Result<String> {
        self.shell(self.admin_address(), &self.admin_login(), script)
    }

    /// Dump/restore call; the admin password goes through `--config`.
    fn run_tool(&self, program: &Path, args: Vec<String>) -> Result<()> {
        let invocation = Invocation::new(&program.display().to_string())
            .args(["--host", self.config.host.as_str()])
            .args(["--port".to_string(), self.config.port.to_string()])
            .args(["--username", self.config.username.as_str()])
            .args(["--authenticationDatabase", self.config.auth_database.as_str()]);

        if self.dryrun {
            let invocation = invocation.arg("--config=<password file>").args(args);
            info!("{}: {}", Purple.paint("Dry-run"), invocation);
            return Ok(());
        }

        let mut password = BTreeMap::new();
        password.insert("password", self.password.as_str());
        let file = secret_file(".yaml", &serde_yaml::to_string(&password)?)?;
        let invocation = invocation
            .arg(format!("--config={}", file.path().display()))
            .args(args);

        let output = self.runner.run(&invocation)?;
        check(&invocation, &output)?;
        info!("{}: {}", Green.paint("Success"), invocation);

        Ok(())
    }
}

fn check(invocation: &Invocation, output: &CommandOutput) -> Result<()> {
    if !output.success() {
        return Err(anyhow!(
            "`{}` failed: {}",
            invocation.program,
            output.reason()
        ));
    }

    Ok(())
}

/// Script creating, or updating, the app user with `readWrite` on the target only.
pub fn app_user_script(database: &Identifier, user: &Identifier, password: &str) -> String {
    let db = js_string(database.as_str());
    let user = js_string(user.as_str());
    let pwd = js_string(password);

    format!(
        "var target = db.getSiblingDB({db}); \
         var roles = [{{ role: \"readWrite\", db: {db} }}]; \
         if (target.getUser({user}) === null) {{ \
         target.createUser({{ user: {user}, pwd: {pwd}, roles: roles }}); print(\"created\"); \
         }} else {{ \
         target.updateUser({user}, {{ pwd: {pwd}, roles: roles }}); print(\"updated\"); \
         }}",
        db = db,
        user = user,
        pwd = pwd
    )
}

fn ping_script(database: &str) -> String {
    format!(
        "print(db.getSiblingDB({}).runCommand({{ ping: 1 }}).ok)",
        js_string(database)
    )
}

impl Engine for MongoEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::MongoDb
    }

    fn dryrun(&self) -> bool {
        self.dryrun
    }

    fn check_connection(&mut self) -> Result<()> {
        let ok = self
            .eval(&ping_script(&self.config.auth_database))
            .with_context(|| {
                format!(
                    "ping failed on mongodb://{}@{}:{}",
                    self.config.username, self.config.host, self.config.port
                )
            })?;
        if ok != "1" {
            return Err(anyhow!("unexpected ping answer: {}", ok));
        }

        info!(
            "{}: connected to mongodb://{}@{}:{} with {}",
            Green.paint("Success"),
            self.config.username,
            self.config.host,
            self.config.port,
            self.tools.shell.program()
        );

        Ok(())
    }

    fn database_exists(&mut self, name: &Identifier) -> Result<bool> {
        let script = format!(
            "print(db.getMongo().getDBNames().indexOf({}) >= 0 ? 1 : 0)",
            js_string(name.as_str())
        );

        Ok(self.eval(&script)? == "1")
    }

    fn active_connections(&mut self, name: &Identifier) -> Result<u64> {
        let script = format!(
            "print(db.currentOp({{ active: true, ns: {{ $regex: {} }} }}).inprog.length)",
            js_string(&format!("^{}\\.", name))
        );

        let answer = self.eval(&script)?;
        answer
            .parse::<u64>()
            .with_context(|| format!("unexpected currentOp answer: {}", answer))
    }

    fn termination_hint(&self, name: &Identifier) -> Vec<String> {
        vec![
            format!(
                "db.currentOp({{ active: true, ns: /^{}\\./ }}).inprog.forEach(op => print(op.opid, op.client, op.desc))",
                name
            ),
            "db.killOp(<opid>)".to_string(),
        ]
    }

    fn backup_extension(&self) -> &'static str {
        "archive.gz"
    }

    fn backup(&mut self, source: &Identifier, destination: &Path) -> Result<()> {
        self.run_tool(
            &self.tools.dump,
            vec![
                "--db".to_string(),
                source.to_string(),
                format!("--archive={}", destination.display()),
                "--gzip".to_string(),
            ],
        )
    }

    fn clone_database(&mut self, request: &CloneRequest) -> Result<()> {
        let dump = |out: &str| {
            vec![
                "--db".to_string(),
                request.source.to_string(),
                "--out".to_string(),
                out.to_string(),
            ]
        };
        let restore = |out: &str| {
            vec![
                format!("--nsInclude={}.*", request.source),
                format!("--nsFrom={}.*", request.source),
                format!("--nsTo={}.*", request.target),
                out.to_string(),
            ]
        };

        if self.dryrun {
            self.run_tool(&self.tools.dump, dump("<staging>"))?;
            return self.run_tool(&self.tools.restore, restore("<staging>"));
        }

        // removed on drop, whatever happens below
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(self.staging_parent())
            .context("failed to create staging directory")?;
        let out = staging.path().display().to_string();

        self.run_tool(&self.tools.dump, dump(&out))?;
        self.run_tool(&self.tools.restore, restore(&out))?;

        debug!("removing staging directory {}", staging.path().display());
        staging.close()?;

        Ok(())
    }

    fn provision(&mut self, request: &CloneRequest) -> Result<Provisioned> {
        let app_user = request.target.derive("", &self.config.app_user_suffix)?;
        let password = gen_password(self.password_length);
        let script = app_user_script(&request.target, &app_user, &password);

        if self.dryrun {
            info!(
                "{}: {} --eval '{}'",
                Purple.paint("Dry-run"),
                self.tools.shell.program(),
                script.replace(password.as_str(), "********")
            );
        } else {
            let answer = self
                .eval(&script)
                .with_context(|| format!("failed to create user {}", app_user))?;
            info!(
                "{}: user {} {} with readWrite on {}",
                Green.paint("Success"),
                app_user,
                answer,
                request.target
            );
        }

        Ok(Provisioned {
            credentials: Credentials::Document(AppCredential {
                database: request.target.clone(),
                app_user,
                app_password: password,
            }),
            failed_statements: vec![],
        })
    }

    fn verify(&mut self, credentials: &Credentials) -> Result<()> {
        let Credentials::Document(credentials) = credentials else {
            return Err(anyhow!("not mongodb credentials: {:?}", credentials));
        };

        let uri = self.config.verify_uri();
        if self.dryrun {
            info!(
                "{}: ping {} through {} as {}",
                Purple.paint("Dry-run"),
                credentials.database,
                uri,
                credentials.app_user
            );
            return Ok(());
        }

        let login = Login {
            database: credentials.database.as_str(),
            user: credentials.app_user.as_str(),
            password: &credentials.app_password,
        };
        let ok = self.shell(
            vec![uri.clone()],
            &login,
            &ping_script(credentials.database.as_str()),
        )?;
        if ok != "1" {
            return Err(anyhow!("unexpected ping answer: {}", ok));
        }
        info!(
            "{}: {} can connect through {}",
            Green.paint("Success"),
            credentials.app_user,
            uri
        );

        Ok(())
    }

    fn endpoint_metadata(&self) -> Vec<(String, String)> {
        vec![
            ("Host".to_string(), self.config.host.clone()),
            ("Port".to_string(), self.config.port.to_string()),
            ("Connection string".to_string(), self.config.verify_uri()),
            (
                "Auth database".to_string(),
                "the user's own database".to_string(),
            ),
        ]
    }
}
