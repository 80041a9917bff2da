use crate::errors::{AppError, AppResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "FORMS_GRADING_DATA_DIR";
pub const LOG_DIR_ENV: &str = "FORMS_GRADING_LOG_DIR";
pub const BACKUPS_ENV: &str = "FORMS_GRADING_BACKUPS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Keep the previous generation of each document as `<id>.json.bak`.
    pub backups: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data").join("workspaces"),
            log_dir: PathBuf::from("data").join("logs"),
            backups: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreConfigFile {
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    backups: Option<bool>,
}

impl StoreConfig {
    /// Defaults, then the optional YAML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `NotFound` for a missing file, `Io` when it cannot be read, `Internal` for bad YAML.
    pub fn from_yaml_file(path: &Path) -> AppResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("store config {}", path.display())))
            }
            Err(error) => {
                return Err(AppError::Io(format!("reading store config {}: {}", path.display(), error)))
            }
        };
        Ok(parse_config_file(path, &raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let file: StoreConfigFile = if raw.trim().is_empty() {
            StoreConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        Ok(Self::default().overlay(file))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|value| !value.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(LOG_DIR_ENV).filter(|value| !value.trim().is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup(BACKUPS_ENV) {
            self.backups = !matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut problems = Vec::new();
        if self.data_dir.as_os_str().is_empty() {
            problems.push("dataDir must not be empty".to_string());
        }
        if self.log_dir.as_os_str().is_empty() {
            problems.push("logDir must not be empty".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(problems))
        }
    }

    fn overlay(mut self, file: StoreConfigFile) -> Self {
        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if let Some(dir) = file.log_dir {
            self.log_dir = dir;
        }
        if let Some(backups) = file.backups {
            self.backups = backups;
        }
        self
    }
}

fn parse_config_file(path: &Path, raw: &str) -> anyhow::Result<StoreConfig> {
    StoreConfig::from_yaml_str(raw).with_context(|| format!("parsing store config {}", path.display()))
}
