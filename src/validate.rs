use crate::config::Config;
use ansi_term::Colour::{Green, Red};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Validate one config file, or every yaml file under a directory.
/// Returns the number of invalid files.
pub fn validate_target(target: &Path) -> Result<usize> {
    if !target.exists() {
        return Err(anyhow!(
            "{:?} ... {} - file/directory does not exist",
            target,
            Red.paint("Failed")
        ));
    }

    if !target.is_dir() {
        return Ok(report(target));
    }

    // Scan all files recursively that match *.yaml or *.yml
    let mut files: Vec<PathBuf> = vec![];
    for entry in WalkDir::new(target).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_yaml(entry.path()) {
            files.push(entry.into_path());
        }
    }

    Ok(files.iter().map(|file| report(file)).sum())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

// Print the verdict, 1 when invalid
fn report(file: &Path) -> usize {
    match validate_file(file) {
        Ok(()) => {
            println!("{:?} ... {}", file, Green.paint("ok"));
            0
        }
        Err(e) => {
            println!("{:?} ... {} - {:#}", file, Red.paint("invalid"), e);
            1
        }
    }
}

/// Validate a config file: parse, check every rule, expand env variables.
pub fn validate_file(file: &Path) -> Result<()> {
    Config::new(file)?;

    Ok(())
}
