use crate::config::{EngineKind, LogPer, Output};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use env_logger::{Env, Logger};
use log::{Log, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Console logger that also appends every line, without colours, to the
/// run log file.
pub struct RunLogger {
    console: Logger,
    file: Mutex<File>,
}

impl Log for RunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }

        self.console.log(record);

        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(
                file,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                strip_ansi(&record.args().to_string())
            );
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn console() -> Logger {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).build()
}

/// Console only, for the subcommands that do not touch a database.
pub fn init_console() {
    let logger = console();
    let max_level = logger.filter();
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
}

/// `{engine}_{YYYY-MM-DD}.log`, or one file per run with the time appended.
pub fn log_file_name(engine: EngineKind, per: LogPer, now: DateTime<Local>) -> String {
    match per {
        LogPer::Day => format!("{}_{}.log", engine, now.format("%Y-%m-%d")),
        LogPer::Run => format!("{}_{}.log", engine, now.format("%Y-%m-%d_%H%M%S")),
    }
}

/// Install the console and file logger for a clone run.
pub fn init_run_logger(engine: EngineKind, output: &Output, now: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(&output.log_directory).with_context(|| {
        format!("failed to create {}", output.log_directory.display())
    })?;

    let path = output
        .log_directory
        .join(log_file_name(engine, output.log_per, now));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let console = console();
    let max_level = console.filter();
    log::set_boxed_logger(Box::new(RunLogger {
        console,
        file: Mutex::new(file),
    }))
    .context("logger already initialized")?;
    log::set_max_level(max_level);

    Ok(path)
}

/// Remove terminal colour sequences (`ESC [ ... m`).
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ansi_term::Colour::{Green, Red};
    use chrono::TimeZone;

    #[test]
    fn test_strip_ansi() {
        let text = format!("{}: cloned {}", Green.paint("Success"), Red.paint("x"));
        assert_eq!(strip_ansi(&text), "Success: cloned x");
        assert_eq!(strip_ansi("plain text"), "plain text");
        assert_eq!(strip_ansi(""), "");
    }

    #[test]
    fn test_log_file_name() {
        let now = Local.with_ymd_and_hms(2026, 10, 18, 7, 5, 9).unwrap();
        assert_eq!(
            log_file_name(EngineKind::Postgres, LogPer::Day, now),
            "postgres_2026-10-18.log"
        );
        assert_eq!(
            log_file_name(EngineKind::MongoDb, LogPer::Run, now),
            "mongodb_2026-10-18_070509.log"
        );
    }
}
