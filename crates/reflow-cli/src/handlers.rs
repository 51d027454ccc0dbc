//! Command handlers.

use crate::commands::{EventArgs, SchemaKind};
use crate::config::{CliConfig, OutputFormat};
use crate::runner::{ConsoleEvents, DirectoryReportSink, OutcomeFile, ScriptedRunner};
use anyhow::{Context, Result, anyhow};
use console::style;
use reflow_core::context::{EventContext, TriggerKind};
use reflow_core::ids::JobId;
use reflow_core::run::{JobStatus, RunStatus};
use reflow_core::workflow::WorkflowDefinition;
use reflow_scheduler::{WorkflowDispatcher, WorkflowValidator, group_key};
use reflow_secrets::{EnvProvider, FileProvider, SecretManager};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Read a YAML or JSON document, chosen by file extension.
pub async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML in {}", path.display()))
    }
}

fn workflow_path(config: &CliConfig, path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| config.workflow.clone())
}

/// Build the event context from `--event` or from the individual flags.
pub async fn build_context(args: &EventArgs) -> Result<EventContext> {
    let mut context = match &args.event {
        Some(path) => read_document::<EventContext>(path).await?,
        None => {
            let trigger: TriggerKind = args.trigger.parse().map_err(|e: String| anyhow!(e))?;
            let mut context = match trigger {
                TriggerKind::PullRequest => {
                    let number = args
                        .pr
                        .ok_or_else(|| anyhow!("--pr is required for pull_request events"))?;
                    EventContext::pull_request(number, args.draft)
                }
                other => EventContext::new(other, "refs/heads/main"),
            };
            if let Some(git_ref) = &args.git_ref {
                context.git_ref = git_ref.clone();
            }
            context.actor = args.actor.clone();
            context
        }
    };

    for (name, value) in &args.inputs {
        context
            .inputs
            .insert(name.clone(), serde_json::Value::String(value.clone()));
    }
    Ok(context)
}

async fn secret_store(config: &CliConfig, secrets_file: Option<&Path>) -> Result<Arc<SecretManager>> {
    let mut manager = SecretManager::default();
    if let Some(path) = secrets_file {
        let provider = FileProvider::load_from_file(path)
            .await
            .with_context(|| format!("failed to load secrets from {}", path.display()))?;
        manager.register_provider(Arc::new(provider));
    }
    manager.register_provider(Arc::new(EnvProvider::new(config.secret_env_prefix.clone())));
    Ok(Arc::new(manager))
}

/// Validate a workflow definition.
pub async fn validate(config: &CliConfig, path: Option<PathBuf>) -> Result<()> {
    let path = workflow_path(config, path);
    println!("Validating {}...", style(path.display()).bold());

    let workflow: WorkflowDefinition = read_document(&path).await?;
    let compiled = WorkflowValidator::new().validate(&workflow)?;

    println!("{} Workflow is valid", style("✓").green());
    println!("  Name: {}", workflow.name);
    let triggers: Vec<&str> = workflow.on.iter().map(TriggerKind::as_str).collect();
    println!("  Triggers: {}", triggers.join(", "));
    println!("  Fail-fast: {}", workflow.fail_fast);
    if let Some(matrix) = &workflow.matrix {
        println!(
            "  Matrix: {} on pull requests, {} otherwise",
            matrix.pr_versions.join(", "),
            matrix.comprehensive_versions.join(", ")
        );
    }
    println!("  Jobs: {}", compiled.jobs.len());

    for id in compiled.graph.topological_order()? {
        let Some(job) = compiled.job(id) else {
            continue;
        };
        let needs: Vec<&str> = compiled
            .graph
            .dependencies(id)
            .into_iter()
            .map(JobId::as_str)
            .collect();
        let mut line = format!("    {} {} ({})", style("•").dim(), id, job.spec.uses);
        if !needs.is_empty() {
            line.push_str(&format!(" needs {}", needs.join(", ")));
        }
        if !job.blocking {
            line.push_str(" [advisory]");
        }
        println!("{line}");
    }
    Ok(())
}

/// Show the plan for an event without running anything.
pub async fn plan(config: &CliConfig, path: Option<PathBuf>, event: &EventArgs) -> Result<()> {
    let path = workflow_path(config, path);
    let workflow: WorkflowDefinition = read_document(&path).await?;
    let context = build_context(event).await?;
    let secrets = secret_store(config, None).await?;

    let dispatcher = WorkflowDispatcher::new(Arc::new(ScriptedRunner::succeed_all()), secrets);
    let plan = dispatcher.plan(&workflow, &context).await?;

    println!(
        "{} {} on {} ({})",
        style("▶").cyan(),
        style(&workflow.name).bold(),
        context.trigger,
        context.git_ref
    );
    println!("  Group: {}", group_key(&workflow, &context));
    println!("  Scan mode: {}", plan.scan_mode);
    if !plan.applicable {
        println!(
            "{} Workflow does not run on {}",
            style("i").blue(),
            context.trigger
        );
    }

    for job in &plan.jobs {
        let record = &job.record;
        match (&record.status, &record.skip_reason) {
            (JobStatus::Pending, _) => println!("  {} {}", style("✓").green(), record.id),
            (_, Some(reason)) => {
                println!("  {} {} skipped: {reason}", style("-").dim(), record.id)
            }
            (status, None) => println!("  {} {} {status}", style("-").dim(), record.id),
        }
    }
    println!("{} of {} jobs will run", plan.runnable().count(), plan.jobs.len());
    Ok(())
}

/// Options for [`dispatch`].
pub struct DispatchOptions {
    pub outcomes: Option<PathBuf>,
    pub secrets_file: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub format: Option<OutputFormat>,
}

/// Dispatch a run against scripted outcomes and print its summary.
pub async fn dispatch(
    config: &CliConfig,
    path: Option<PathBuf>,
    event: &EventArgs,
    options: DispatchOptions,
) -> Result<ExitCode> {
    let path = workflow_path(config, path);
    let workflow: WorkflowDefinition = read_document(&path).await?;
    let context = build_context(event).await?;
    let secrets = secret_store(config, options.secrets_file.as_deref()).await?;

    let runner = match &options.outcomes {
        Some(file) => ScriptedRunner::load(file).await?,
        None => ScriptedRunner::succeed_all(),
    };

    let mut dispatcher = WorkflowDispatcher::new(Arc::new(runner), secrets)
        .with_event_bus(Arc::new(ConsoleEvents));
    if let Some(dir) = &options.reports_dir {
        dispatcher = dispatcher.with_report_sink(Arc::new(DirectoryReportSink::new(dir)?));
    }

    let result = dispatcher.dispatch(&workflow, context).await?;

    match options.format.unwrap_or(config.output_format) {
        OutputFormat::Text => print!("{}", result.render_text()),
        OutputFormat::Markdown => print!("{}", result.render_markdown()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(match result.status {
        RunStatus::Success | RunStatus::Skipped => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Print the JSON schema of a document type.
pub fn schema(kind: SchemaKind) -> Result<()> {
    let schema = match kind {
        SchemaKind::Workflow => schemars::schema_for!(WorkflowDefinition),
        SchemaKind::Event => schemars::schema_for!(EventContext),
        SchemaKind::Outcomes => schemars::schema_for!(OutcomeFile),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig, config_path: Option<&Path>) -> Result<()> {
    println!("Current configuration:");
    println!("  workflow: {}", config.workflow.display());
    println!("  log_format: {:?}", config.log_format);
    println!(
        "  secret_env_prefix: {}",
        config.secret_env_prefix.as_deref().unwrap_or("(not set)")
    );
    println!("  output_format: {:?}", config.output_format);

    let path = match config_path {
        Some(p) => Ok(p.to_path_buf()),
        None => CliConfig::config_path(),
    };
    if let Ok(path) = path {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

/// Set configuration.
pub fn set_config(config_path: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => CliConfig::config_path()?,
    };
    let mut config = CliConfig::load_from(&path)?;
    config.set(key, value)?;
    config.save_to(&path)?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
