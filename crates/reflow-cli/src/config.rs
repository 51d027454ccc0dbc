//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Workflow file used when a command is given no path.
    #[serde(default = "default_workflow")]
    pub workflow: PathBuf,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prefix for secret environment variables (`<prefix>_<NAME>`).
    pub secret_env_prefix: Option<String>,
    /// Run summary format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_workflow() -> PathBuf {
    PathBuf::from("reflow.yaml")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            workflow: default_workflow(),
            log_format: LogFormat::default(),
            secret_env_prefix: None,
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

impl CliConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "reflow", "reflow")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "workflow" => self.workflow = PathBuf::from(value),
            "log_format" => {
                self.log_format = LogFormat::from_str(value, true)
                    .map_err(|_| anyhow!("Invalid log format: {value}"))?;
            }
            "secret_env_prefix" => {
                self.secret_env_prefix = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            "output_format" => {
                self.output_format = OutputFormat::from_str(value, true)
                    .map_err(|_| anyhow!("Invalid output format: {value}"))?;
            }
            _ => bail!("Unknown config key: {key}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.workflow, PathBuf::from("reflow.yaml"));
        assert_eq!(config.output_format, OutputFormat::Text);
    }

    #[test]
    fn test_set_and_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = CliConfig::default();
        config.set("output_format", "markdown").unwrap();
        config.set("log_format", "JSON").unwrap();
        config.set("secret_env_prefix", "CI").unwrap();
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded.output_format, OutputFormat::Markdown);
        assert_eq!(loaded.log_format, LogFormat::Json);
        assert_eq!(loaded.secret_env_prefix.as_deref(), Some("CI"));
    }

    #[test]
    fn test_set_rejects_unknown_values() {
        let mut config = CliConfig::default();
        assert!(config.set("output_format", "yaml").is_err());
        assert!(config.set("api_url", "http://localhost").is_err());
    }
}
