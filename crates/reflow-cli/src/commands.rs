//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow definition
    Validate {
        /// Path to the workflow file
        path: Option<PathBuf>,
    },

    /// Show which jobs an event would run, without running them
    Plan {
        /// Path to the workflow file
        path: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Dispatch a run against scripted job outcomes
    Dispatch {
        /// Path to the workflow file
        path: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,

        /// YAML or JSON file mapping job ids to outcomes (default: all succeed)
        #[arg(long)]
        outcomes: Option<PathBuf>,

        /// YAML or JSON file of secrets, consulted before the environment
        #[arg(long)]
        secrets_file: Option<PathBuf>,

        /// Directory that receives forwarded scanner reports
        #[arg(long)]
        reports_dir: Option<PathBuf>,

        /// Summary format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Print the JSON schema of a document type
    Schema {
        #[arg(value_enum, default_value = "workflow")]
        kind: SchemaKind,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Describes the inbound event, either from a file or from flags.
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// YAML or JSON event context file; the flags below are ignored when set
    #[arg(long)]
    pub event: Option<PathBuf>,

    /// Trigger kind (push, pull_request, schedule, workflow_dispatch)
    #[arg(long, default_value = "push")]
    pub trigger: String,

    /// Git ref
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Pull request number
    #[arg(long)]
    pub pr: Option<u64>,

    /// Mark the pull request as draft
    #[arg(long)]
    pub draft: bool,

    /// User that triggered the event
    #[arg(long)]
    pub actor: Option<String>,

    /// Manual-dispatch input (repeatable)
    #[arg(long = "input", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    pub inputs: Vec<(String, String)>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw}"))
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaKind {
    Workflow,
    Event,
    Outcomes,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("release-tag=v1.2.0").unwrap(),
            ("release-tag".to_string(), "v1.2.0".to_string())
        );
        assert_eq!(
            parse_key_val("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("no-separator").is_err());
        assert!(parse_key_val("=value").is_err());
    }
}
