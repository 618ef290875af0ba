use anyhow::{Context, Result};
use log::debug;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

const MASK: &str = "********";

/// One external program call.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Environment values masked when the invocation is displayed
    secrets: Vec<String>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable holding a secret.
    pub fn secret_env(mut self, key: &str, secret: &str) -> Self {
        self.secrets.push(secret.to_string());
        self.env.push((key.to_string(), secret.to_string()));
        self
    }

    fn redact(&self, value: &str) -> String {
        let mut value = value.to_string();
        for secret in self.secrets.iter().filter(|s| !s.is_empty()) {
            value = value.replace(secret.as_str(), MASK);
        }
        value
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, self.redact(value))?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let arg = self.redact(arg);
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// What came back from a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stdout line, where `--eval` scripts print their answer.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
    }

    /// Short reason for a failure: stderr, or stdout when stderr is empty.
    pub fn reason(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };

        match self.code {
            Some(code) => format!("exit code {}: {}", code, text),
            None => format!("terminated by signal: {}", text),
        }
    }
}

/// Runs external programs. Blocking; there is no timeout beyond what the
/// program itself enforces.
pub trait CommandRunner {
    /// Find a program on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!("run: {}", invocation);

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn `{}`", invocation.program))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
