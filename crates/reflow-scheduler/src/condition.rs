//! Job gating.
//!
//! Every job instance passes through the same gates before it is scheduled:
//! the draft pull request gate, the scan mode gate, the job's `if:`
//! expression and finally the credential gate.

use crate::expr::{Expr, Scope};
use reflow_core::context::EventContext;
use reflow_core::ids::JobId;
use reflow_core::params::ParamValues;
use reflow_core::ports::CredentialSet;
use reflow_core::run::SkipReason;
use reflow_core::workflow::{JobSpec, ScanMode};
use reflow_core::{Error, Result};
use tracing::debug;

/// Name of the manual input that selects the scan mode.
pub const SCAN_MODE_INPUT: &str = "scan-mode";

/// A parsed `if:` expression together with its source text.
#[derive(Debug, Clone)]
pub struct Condition {
    pub source: String,
    pub expr: Expr,
}

impl Condition {
    pub fn parse(job: &JobId, source: &str) -> Result<Self> {
        let expr = Expr::parse(source).map_err(|e| Error::InvalidPredicate {
            job: job.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }
}

/// The gating predicates declared by one job, compiled once per workflow.
#[derive(Debug, Clone)]
pub struct JobGate {
    pub job: JobId,
    pub skip_on_draft: bool,
    pub skip_if_no_token: bool,
    pub secrets: Vec<String>,
    pub requires_scan_mode: Option<ScanMode>,
    pub condition: Option<Condition>,
}

impl JobGate {
    pub fn compile(spec: &JobSpec) -> Result<Self> {
        let condition = spec
            .condition
            .as_deref()
            .map(|source| Condition::parse(&spec.id, source))
            .transpose()?;

        Ok(Self {
            job: spec.id.clone(),
            skip_on_draft: spec.skips_on_draft(),
            skip_if_no_token: spec.skip_if_no_token,
            secrets: spec.secrets.clone(),
            requires_scan_mode: spec.requires_scan_mode,
            condition,
        })
    }

    /// Jobs whose `if:` calls `always()` run whatever their dependencies did.
    pub fn run_regardless(&self) -> bool {
        self.condition
            .as_ref()
            .is_some_and(|c| c.expr.uses_always())
    }
}

/// Outcome of gating one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip(SkipReason),
    /// A credential is missing and the job does not tolerate it.
    CredentialRequired { secret: String },
}

impl Decision {
    pub fn is_run(&self) -> bool {
        matches!(self, Decision::Run)
    }
}

/// Scan mode requested for a run: the `scan-mode` input if present,
/// otherwise the workflow default.
pub fn requested_scan_mode(inputs: &ParamValues, default: ScanMode) -> ScanMode {
    match inputs.get(SCAN_MODE_INPUT) {
        Some(value) => ScanMode::parse_or_essential(&value.to_string()),
        None => default,
    }
}

/// Evaluates job gates against an event. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        context: &EventContext,
        inputs: &ParamValues,
        gate: &JobGate,
        credentials: &CredentialSet,
        scan_mode: ScanMode,
    ) -> Decision {
        let decision = self.decide(context, inputs, gate, credentials, scan_mode);
        debug!(job = %gate.job, ?decision, "Gate evaluated");
        decision
    }

    fn decide(
        &self,
        context: &EventContext,
        inputs: &ParamValues,
        gate: &JobGate,
        credentials: &CredentialSet,
        scan_mode: ScanMode,
    ) -> Decision {
        if gate.skip_on_draft && context.is_draft_pull_request() {
            return Decision::Skip(SkipReason::DraftPullRequest);
        }

        if gate
            .requires_scan_mode
            .is_some_and(|required| required != scan_mode)
        {
            return Decision::Skip(SkipReason::ScanMode {
                requested: scan_mode.to_string(),
            });
        }

        if let Some(condition) = &gate.condition {
            let scope = Scope::new(context, inputs);
            if !condition.expr.evaluate(&scope).is_truthy() {
                return Decision::Skip(SkipReason::Condition {
                    expression: condition.source.clone(),
                });
            }
        }

        if let Some(missing) = gate.secrets.iter().find(|s| !credentials.contains(s.as_str())) {
            let secret = missing.clone();
            return if gate.skip_if_no_token {
                Decision::Skip(SkipReason::MissingCredential { secret })
            } else {
                Decision::CredentialRequired { secret }
            };
        }

        Decision::Run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::params::ParamValue;
    use reflow_core::workflow::CostClass;

    fn gate(spec: &JobSpec) -> JobGate {
        JobGate::compile(spec).unwrap()
    }

    fn evaluate(ctx: &EventContext, spec: &JobSpec, credentials: &CredentialSet) -> Decision {
        ConditionEvaluator::new().evaluate(
            ctx,
            &ParamValues::new(),
            &gate(spec),
            credentials,
            ScanMode::Essential,
        )
    }

    #[test]
    fn test_draft_skips_expensive_jobs_only() {
        let mut fuzz = JobSpec::new("fuzz");
        fuzz.cost = CostClass::Expensive;
        let lint = JobSpec::new("lint");
        let none = CredentialSet::new();

        let draft = EventContext::pull_request(3, true);
        assert_eq!(
            evaluate(&draft, &fuzz, &none),
            Decision::Skip(SkipReason::DraftPullRequest)
        );
        assert_eq!(evaluate(&draft, &lint, &none), Decision::Run);

        let ready = EventContext::pull_request(3, false);
        assert_eq!(evaluate(&ready, &fuzz, &none), Decision::Run);
    }

    #[test]
    fn test_draft_flag_ignored_outside_pull_requests() {
        let mut fuzz = JobSpec::new("fuzz");
        fuzz.skip_on_draft = Some(true);
        let mut push = EventContext::push("refs/heads/main");
        push.draft = true;

        assert_eq!(evaluate(&push, &fuzz, &CredentialSet::new()), Decision::Run);
    }

    #[test]
    fn test_missing_token_skips_when_tolerated() {
        let mut publish = JobSpec::new("publish");
        publish.secrets = vec!["PYPI_API_TOKEN".into()];
        publish.skip_if_no_token = true;
        let ctx = EventContext::push("refs/heads/main");

        assert_eq!(
            evaluate(&ctx, &publish, &CredentialSet::new()),
            Decision::Skip(SkipReason::MissingCredential {
                secret: "PYPI_API_TOKEN".into()
            })
        );

        let present: CredentialSet = ["PYPI_API_TOKEN"].into_iter().collect();
        assert_eq!(evaluate(&ctx, &publish, &present), Decision::Run);
    }

    #[test]
    fn test_missing_token_escalates_when_not_tolerated() {
        let mut sonar = JobSpec::new("sonar");
        sonar.secrets = vec!["SONAR_TOKEN".into()];
        let ctx = EventContext::push("refs/heads/main");

        assert_eq!(
            evaluate(&ctx, &sonar, &CredentialSet::new()),
            Decision::CredentialRequired {
                secret: "SONAR_TOKEN".into()
            }
        );
    }

    #[test]
    fn test_false_condition_wins_over_missing_token() {
        let mut publish = JobSpec::new("publish");
        publish.secrets = vec!["PYPI_API_TOKEN".into()];
        publish.condition = Some("github.ref == 'refs/heads/main'".into());
        let ctx = EventContext::push("refs/heads/feature");

        assert!(matches!(
            evaluate(&ctx, &publish, &CredentialSet::new()),
            Decision::Skip(SkipReason::Condition { .. })
        ));
    }

    #[test]
    fn test_scan_mode_gate() {
        let mut deep = JobSpec::new("codeql");
        deep.requires_scan_mode = Some(ScanMode::Comprehensive);
        let g = gate(&deep);
        let ctx = EventContext::manual("refs/heads/main");
        let evaluator = ConditionEvaluator::new();
        let none = CredentialSet::new();

        let mut inputs = ParamValues::new();
        inputs.insert(SCAN_MODE_INPUT.into(), ParamValue::String("exhaustive".into()));
        let mode = requested_scan_mode(&inputs, ScanMode::Comprehensive);
        assert_eq!(mode, ScanMode::Essential);
        assert!(!evaluator.evaluate(&ctx, &inputs, &g, &none, mode).is_run());

        inputs.insert(SCAN_MODE_INPUT.into(), ParamValue::String("comprehensive".into()));
        let mode = requested_scan_mode(&inputs, ScanMode::Essential);
        assert!(evaluator.evaluate(&ctx, &inputs, &g, &none, mode).is_run());

        let mode = requested_scan_mode(&ParamValues::new(), ScanMode::Comprehensive);
        assert_eq!(mode, ScanMode::Comprehensive);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let mut job = JobSpec::new("docs");
        job.condition = Some("contains(github.ref, 'docs')".into());
        let ctx = EventContext::push("refs/heads/docs-refresh");
        let none = CredentialSet::new();

        let first = evaluate(&ctx, &job, &none);
        let second = evaluate(&ctx, &job, &none);
        assert_eq!(first, second);
        assert_eq!(first, Decision::Run);
    }

    #[test]
    fn test_malformed_condition_is_rejected() {
        let mut job = JobSpec::new("broken");
        job.condition = Some("github.ref = 'main'".into());

        assert!(matches!(
            JobGate::compile(&job),
            Err(Error::InvalidPredicate { .. })
        ));
    }

    #[test]
    fn test_always_marks_run_regardless() {
        let mut report = JobSpec::new("report");
        report.condition = Some("${{ always() }}".into());
        assert!(gate(&report).run_regardless());
        assert!(!gate(&JobSpec::new("lint")).run_regardless());
    }
}
