use crate::config::Backup;
use crate::engine::{CloneRequest, Engine};
use ansi_term::Colour::{Green, Yellow};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStatus {
    Cloned,
    /// Target was there already and was left untouched
    AlreadyExists,
}

/// `{directory}/{source}_{YYYYmmdd_HHMMSS}.{extension}`
pub fn backup_path(directory: &Path, source: &str, now: DateTime<Local>, extension: &str) -> PathBuf {
    directory.join(format!(
        "{}_{}.{}",
        source,
        now.format("%Y%m%d_%H%M%S"),
        extension
    ))
}

/// Clone the source into the target. An existing target is a no-op; a
/// requested backup that fails stops the clone.
pub fn execute(
    engine: &mut dyn Engine,
    request: &CloneRequest,
    backup: &Backup,
    now: DateTime<Local>,
) -> Result<CloneStatus> {
    if engine.database_exists(&request.target)? {
        warn!(
            "{}: target database {} already exists, not cloning",
            Yellow.paint("Warning"),
            request.target
        );
        return Ok(CloneStatus::AlreadyExists);
    }

    if backup.enabled {
        let path = backup_path(
            &backup.directory,
            request.source.as_str(),
            now,
            engine.backup_extension(),
        );
        if !engine.dryrun() {
            fs::create_dir_all(&backup.directory).with_context(|| {
                format!("failed to create {}", backup.directory.display())
            })?;
        }

        engine
            .backup(&request.source, &path)
            .with_context(|| format!("backup of {} failed, not cloning", request.source))?;
        info!(
            "{}: backup of {} written to {}",
            Green.paint("Success"),
            request.source,
            path.display()
        );
    }

    engine
        .clone_database(request)
        .with_context(|| format!("failed to clone {} into {}", request.source, request.target))?;
    info!(
        "{}: cloned {} into {}",
        Green.paint("Success"),
        request.source,
        request.target
    );

    Ok(CloneStatus::Cloned)
}
