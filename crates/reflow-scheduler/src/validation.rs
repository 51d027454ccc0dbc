//! Eager workflow validation.
//!
//! Everything that can be wrong with a workflow definition is caught here,
//! before a run is created.

use crate::condition::JobGate;
use crate::dag::{DagBuilder, JobGraph};
use crate::matrix::{MatrixCell, MatrixSelector};
use reflow_core::context::TriggerKind;
use reflow_core::ids::JobId;
use reflow_core::params::{ParamValues, resolve_params};
use reflow_core::workflow::{JobSpec, WorkflowDefinition};
use reflow_core::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// A job spec with its gate parsed and its options resolved.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub spec: JobSpec,
    pub gate: JobGate,
    pub options: ParamValues,
    pub blocking: bool,
}

impl CompiledJob {
    pub fn id(&self) -> &JobId {
        &self.spec.id
    }
}

/// A workflow that passed validation.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    pub graph: JobGraph,
    /// In declaration order.
    pub jobs: Vec<CompiledJob>,
}

impl CompiledWorkflow {
    pub fn job(&self, id: &JobId) -> Option<&CompiledJob> {
        self.jobs.iter().find(|j| j.id() == id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<CompiledWorkflow> {
        if workflow.name.as_str().trim().is_empty() {
            return Err(Error::InvalidWorkflow("workflow name is empty".into()));
        }
        if let Some(job) = workflow.jobs.iter().find(|j| j.id.as_str().trim().is_empty()) {
            return Err(Error::InvalidWorkflow(format!(
                "job {} has an empty id",
                job.display_name()
            )));
        }

        let graph = DagBuilder::new().build(workflow)?;
        self.check_instance_ids(workflow)?;

        for (name, spec) in &workflow.inputs {
            spec.validate_default(name)?;
        }

        let mut jobs = Vec::with_capacity(workflow.jobs.len());
        for spec in &workflow.jobs {
            jobs.push(self.compile_job(workflow, spec)?);
        }

        debug!(workflow = %workflow.name, jobs = jobs.len(), "Workflow validated");

        Ok(CompiledWorkflow {
            definition: workflow.clone(),
            graph,
            jobs,
        })
    }

    /// Matrix expansion must not produce an instance id twice, on either tier.
    fn check_instance_ids(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let selector = MatrixSelector::new();
        for trigger in [TriggerKind::PullRequest, TriggerKind::Push] {
            let mut owners: HashMap<JobId, &JobId> = HashMap::new();
            for spec in &workflow.jobs {
                let cells = match (&workflow.matrix, spec.matrix) {
                    (Some(config), true) => selector.select(trigger, config),
                    _ => vec![MatrixCell::empty()],
                };
                for cell in cells {
                    let instance = cell.instance_id(&spec.id);
                    if let Some(owner) = owners.insert(instance.clone(), &spec.id) {
                        return Err(Error::InvalidWorkflow(format!(
                            "job instance '{instance}' is produced by both {owner} and {}",
                            spec.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_job(&self, workflow: &WorkflowDefinition, spec: &JobSpec) -> Result<CompiledJob> {
        if spec.matrix && workflow.matrix.is_none() {
            return Err(Error::EmptyMatrix(spec.id.to_string()));
        }
        if let Some(secret) = spec.secrets.iter().find(|s| s.trim().is_empty()) {
            return Err(Error::InvalidWorkflow(format!(
                "job {} declares an empty secret name '{secret}'",
                spec.id
            )));
        }

        let recognised = spec.uses.options();
        for (name, option) in &recognised {
            option.validate_default(&format!("{}.{name}", spec.id))?;
        }
        let options = resolve_params(&recognised, &spec.with, spec.id.as_str())?;
        let gate = JobGate::compile(spec)?;
        let blocking = spec.is_blocking(&options);

        Ok(CompiledJob {
            spec: spec.clone(),
            gate,
            options,
            blocking,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::params::{ParamSpec, ParamValue};
    use reflow_core::workflow::{Integration, MatrixConfig};
    use serde_json::json;

    fn fuzz_job() -> JobSpec {
        let mut job = JobSpec::new("fuzz");
        job.uses = Integration::Fuzz;
        job
    }

    #[test]
    fn test_options_are_resolved_with_defaults() {
        let mut job = fuzz_job();
        job.with.insert("fuzz-seconds".into(), json!("300"));
        let wf = WorkflowDefinition::new("ci", vec![job]);

        let compiled = WorkflowValidator::new().validate(&wf).unwrap();
        let options = &compiled.jobs[0].options;
        assert_eq!(options["fuzz-seconds"], ParamValue::Number(300.0));
        assert_eq!(options["sanitizer"].as_str(), Some("address"));
        assert_eq!(options["dry-run"], ParamValue::Bool(false));
        assert!(compiled.jobs[0].blocking);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let mut job = fuzz_job();
        job.with.insert("fuzz-minutes".into(), json!(5));
        let wf = WorkflowDefinition::new("ci", vec![job]);

        assert!(matches!(
            WorkflowValidator::new().validate(&wf),
            Err(Error::UnknownInput(name)) if name == "fuzz.fuzz-minutes"
        ));
    }

    #[test]
    fn test_mistyped_option_is_rejected() {
        let mut job = fuzz_job();
        job.with.insert("sanitizer".into(), json!("thread"));
        let wf = WorkflowDefinition::new("ci", vec![job]);

        let err = WorkflowValidator::new().validate(&wf).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn test_matrix_job_requires_matrix() {
        let mut job = JobSpec::new("test");
        job.matrix = true;
        let mut wf = WorkflowDefinition::new("ci", vec![job]);

        assert!(matches!(
            WorkflowValidator::new().validate(&wf),
            Err(Error::EmptyMatrix(_))
        ));

        wf.matrix = Some(MatrixConfig::new(&["3.12"], &["3.12"]));
        assert!(WorkflowValidator::new().validate(&wf).is_ok());
    }

    #[test]
    fn test_bad_input_default_is_rejected() {
        let mut wf = WorkflowDefinition::new("ci", vec![JobSpec::new("lint")]);
        let mut spec = ParamSpec::boolean(false);
        spec.default = Some(json!("sometimes"));
        wf.inputs.insert("dry-run".into(), spec);

        assert!(matches!(
            WorkflowValidator::new().validate(&wf),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_malformed_condition_is_rejected() {
        let mut job = JobSpec::new("publish");
        job.condition = Some("${{ github.ref == }}".into());
        let wf = WorkflowDefinition::new("ci", vec![job]);

        assert!(matches!(
            WorkflowValidator::new().validate(&wf),
            Err(Error::InvalidPredicate { job, .. }) if job == "publish"
        ));
    }

    #[test]
    fn test_structural_errors() {
        let wf = WorkflowDefinition::new("ci", vec![JobSpec::new("")]);
        assert!(matches!(
            WorkflowValidator::new().validate(&wf),
            Err(Error::InvalidWorkflow(_))
        ));

        let mut a = JobSpec::new("a");
        a.needs = vec![JobId::new("b")];
        let mut b = JobSpec::new("b");
        b.needs = vec![JobId::new("a")];
        let wf = WorkflowDefinition::new("ci", vec![a, b]);
        assert!(matches!(
            WorkflowValidator::new().validate(&wf),
            Err(Error::CycleDetected)
        ));
    }

    #[test]
    fn test_sonarcloud_blocking_follows_quality_gate() {
        let mut sonar = JobSpec::new("sonar");
        sonar.uses = Integration::Sonarcloud;
        let wf = WorkflowDefinition::new("ci", vec![sonar.clone()]);
        assert!(!WorkflowValidator::new().validate(&wf).unwrap().jobs[0].blocking);

        sonar.with.insert("fail-on-quality-gate".into(), json!(true));
        let wf = WorkflowDefinition::new("ci", vec![sonar]);
        assert!(WorkflowValidator::new().validate(&wf).unwrap().jobs[0].blocking);
    }

    #[test]
    fn test_colliding_instance_ids_are_rejected() {
        let mut test = JobSpec::new("test");
        test.matrix = true;
        let mut wf = WorkflowDefinition::new("ci", vec![test, JobSpec::new("test (3.12)")]);
        wf.matrix = Some(MatrixConfig::new(&["3.11"], &["3.12"]));

        let err = WorkflowValidator::new().validate(&wf).unwrap_err();
        assert!(matches!(&err, Error::InvalidWorkflow(msg) if msg.contains("test (3.12)")));

        wf.matrix = Some(MatrixConfig::new(&["3.11"], &["3.13"]));
        assert!(WorkflowValidator::new().validate(&wf).is_ok());
    }
}
