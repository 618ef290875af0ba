use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How log files are split.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogPer {
    /// One file per engine per day, appended by every run of that day.
    #[serde(rename = "day")]
    #[default]
    Day,
    /// One file per run.
    #[serde(rename = "run")]
    Run,
}

/// Where generated artifacts go.
///
/// ```yaml
/// output:
///   directory: ./output
///   log_directory: ./logs
///   log_per: day
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Output {
    /// Secrets files and the run summary
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default)]
    pub log_per: LogPer,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            log_directory: default_log_directory(),
            log_per: LogPer::default(),
        }
    }
}

/// Optional dump of the source taken before cloning it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Backup {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_directory")]
    pub directory: PathBuf,
}

impl Default for Backup {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_backup_directory(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("./output")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from("./backups")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_output_defaults() {
        let output: Output = serde_yaml::from_str("{}").unwrap();
        assert_eq!(output, Output::default());
        assert_eq!(output.log_per, LogPer::Day);
    }

    #[test]
    fn test_output_log_per_run() {
        let output: Output = serde_yaml::from_str(indoc! {"
            directory: /var/lib/dbclone
            log_per: run
        "})
        .unwrap();
        assert_eq!(output.directory, PathBuf::from("/var/lib/dbclone"));
        assert_eq!(output.log_per, LogPer::Run);
    }

    #[test]
    fn test_output_invalid_log_per() {
        assert!(serde_yaml::from_str::<Output>("log_per: week").is_err());
    }
}
