//! Workflow dispatch.
//!
//! The dispatcher turns a workflow definition and an event into a run:
//! it validates, plans (inputs, credentials, matrix, gates), admits the run
//! to its concurrency group and then drives job execution on the external
//! runner until every job instance has a terminal outcome.

use crate::concurrency::{Admission, ConcurrencyController, RunHandle, group_key};
use crate::condition::{ConditionEvaluator, Decision, requested_scan_mode};
use crate::matrix::{MatrixCell, MatrixSelector};
use crate::report::{ReportAggregator, RunResult};
use crate::validation::{CompiledWorkflow, WorkflowValidator};
use chrono::Utc;
use reflow_core::context::{EventContext, TriggerKind};
use reflow_core::events::{
    Event, JobCompletedPayload, RunCancelledPayload, RunCompletedPayload, RunQueuedPayload,
};
use reflow_core::ids::{JobId, RunId, WorkflowId};
use reflow_core::params::{ParamSpec, ParamValues, resolve_params};
use reflow_core::ports::{
    Conclusion, CredentialSet, EventBus, ExternalOutcome, JobRequest, JobRunner, ReportSink,
    SecretStore,
};
use reflow_core::run::{CancelReason, JobRecord, JobStatus, Run, RunStatus, SkipReason};
use reflow_core::workflow::{ScanMode, WorkflowDefinition};
use reflow_core::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

/// Runs kept for [`WorkflowDispatcher::run`] lookups unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// One planned job instance.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub record: JobRecord,
    pub needs: Vec<JobId>,
    pub run_regardless: bool,
    pub secrets: Vec<String>,
}

/// Everything decided about a run before any job executes.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub workflow: WorkflowId,
    pub group: String,
    /// False when the workflow does not handle the event's trigger.
    pub applicable: bool,
    pub scan_mode: ScanMode,
    pub inputs: ParamValues,
    pub credentials: CredentialSet,
    /// Declaration order, then matrix order.
    pub jobs: Vec<PlannedJob>,
}

impl RunPlan {
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.record.id.clone()).collect()
    }

    pub fn runnable(&self) -> impl Iterator<Item = &PlannedJob> {
        self.jobs
            .iter()
            .filter(|j| j.record.status == JobStatus::Pending)
    }
}

/// Orchestrates workflow runs on an external runner.
pub struct WorkflowDispatcher {
    runner: Arc<dyn JobRunner>,
    secrets: Arc<dyn SecretStore>,
    reports: Option<Arc<dyn ReportSink>>,
    events: Option<Arc<dyn EventBus>>,
    concurrency: Arc<ConcurrencyController>,
    validator: WorkflowValidator,
    evaluator: ConditionEvaluator,
    matrix: MatrixSelector,
    history: RwLock<VecDeque<RunHandle>>,
    history_limit: usize,
}

impl WorkflowDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            runner,
            secrets,
            reports: None,
            events: None,
            concurrency: Arc::new(ConcurrencyController::new()),
            validator: WorkflowValidator::new(),
            evaluator: ConditionEvaluator::new(),
            matrix: MatrixSelector::new(),
            history: RwLock::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.reports = Some(sink);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Keep at most `limit` runs in history. Finished runs are evicted
    /// oldest first; runs still in progress are never evicted.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn concurrency(&self) -> &Arc<ConcurrencyController> {
        &self.concurrency
    }

    /// Snapshot of a run dispatched by this dispatcher.
    pub async fn run(&self, id: RunId) -> Result<Run> {
        let handle = self
            .history
            .read()
            .await
            .iter()
            .find(|h| h.id() == id)
            .cloned()
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
        Ok(handle.snapshot().await)
    }

    /// Drop a run from history. Returns false if it was not there.
    pub async fn forget(&self, id: RunId) -> bool {
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|h| h.id() != id);
        history.len() != before
    }

    /// Evict the oldest finished runs until history fits its limit.
    async fn prune_history(&self) {
        let mut history = self.history.write().await;
        let mut excess = history.len().saturating_sub(self.history_limit);
        if excess == 0 {
            return;
        }
        let mut kept = VecDeque::with_capacity(history.len());
        for handle in history.drain(..) {
            if excess > 0 && handle.state().read().await.status.is_terminal() {
                excess -= 1;
                debug!(run_id = %handle.id(), "Evicting run from history");
                continue;
            }
            kept.push_back(handle);
        }
        *history = kept;
    }

    /// Snapshots of every retained run, in dispatch order.
    pub async fn runs(&self) -> Vec<Run> {
        let handles = self.history.read().await.clone();
        let mut runs = Vec::with_capacity(handles.len());
        for handle in handles {
            runs.push(handle.snapshot().await);
        }
        runs
    }

    /// Validate and plan a run without executing anything.
    pub async fn plan(&self, workflow: &WorkflowDefinition, context: &EventContext) -> Result<RunPlan> {
        let compiled = self.validator.validate(workflow)?;
        let inputs = resolve_inputs(workflow, context)?;
        let scan_mode = requested_scan_mode(&inputs, workflow.scan_mode);
        let credentials = self.resolve_credentials(&compiled).await?;
        let applicable = workflow.applies_to(context.trigger);

        let mut jobs = Vec::new();
        for job in &compiled.jobs {
            let decision = if applicable {
                self.evaluator
                    .evaluate(context, &inputs, &job.gate, &credentials, scan_mode)
            } else {
                Decision::Skip(SkipReason::TriggerNotHandled {
                    trigger: context.trigger.to_string(),
                })
            };

            let skip = match decision {
                Decision::Run => None,
                Decision::Skip(reason) => Some(reason),
                Decision::CredentialRequired { secret } => {
                    return Err(Error::CredentialAbsent {
                        job: job.id().to_string(),
                        secret,
                    });
                }
            };

            let cells = match (&workflow.matrix, job.spec.matrix) {
                (Some(config), true) => self.matrix.select(context.trigger, config),
                _ => vec![MatrixCell::empty()],
            };

            for cell in cells {
                let mut record =
                    JobRecord::pending(cell.instance_id(job.id()), job.id().clone(), job.spec.uses);
                record.matrix = cell.to_map();
                record.options = job.options.clone();
                record.blocking = job.blocking;
                if let Some(reason) = &skip {
                    record.skip(reason.clone())?;
                }
                jobs.push(PlannedJob {
                    record,
                    needs: job.spec.needs.clone(),
                    run_regardless: job.gate.run_regardless(),
                    secrets: job.spec.secrets.clone(),
                });
            }
        }

        Ok(RunPlan {
            workflow: workflow.name.clone(),
            group: group_key(workflow, context),
            applicable,
            scan_mode,
            inputs,
            credentials,
            jobs,
        })
    }

    async fn resolve_credentials(&self, compiled: &CompiledWorkflow) -> Result<CredentialSet> {
        let mut present = CredentialSet::new();
        let names: HashSet<&String> = compiled
            .jobs
            .iter()
            .flat_map(|j| j.spec.secrets.iter())
            .collect();
        for name in names {
            if self.secrets.has_secret(name).await? {
                present.insert(name.clone());
            } else {
                debug!(secret = %name, store = self.secrets.name(), "Secret not configured");
            }
        }
        Ok(present)
    }

    /// Dispatch a run and wait for its result.
    pub async fn dispatch(
        &self,
        workflow: &WorkflowDefinition,
        context: EventContext,
    ) -> Result<RunResult> {
        let plan = self.plan(workflow, &context).await?;

        let mut run = Run::new(workflow.name.clone(), plan.group.clone(), context.clone());
        run.inputs = plan.inputs.clone();
        run.jobs = plan.jobs.iter().map(|j| j.record.clone()).collect();
        let handle = RunHandle::new(run);
        self.history.write().await.push_back(handle.clone());

        info!(
            run_id = %handle.id(),
            workflow = %workflow.name,
            group = %plan.group,
            trigger = %context.trigger,
            jobs = plan.jobs.len(),
            runnable = plan.runnable().count(),
            "Run queued"
        );
        self.publish(Event::RunQueued(RunQueuedPayload {
            run_id: handle.id(),
            workflow: workflow.name.clone(),
            group: plan.group.clone(),
            trigger: context.trigger,
            git_ref: context.git_ref.clone(),
            actor: context.actor.clone(),
            job_count: u32::try_from(plan.jobs.len()).unwrap_or(u32::MAX),
            queued_at: Utc::now(),
        }))
        .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = ReportAggregator::new(handle.id(), workflow.name.clone(), plan.job_ids());
        let aggregation = tokio::spawn(aggregator.consume(rx));

        let mut execution = Execution::new(self, &handle, workflow, &plan, context, tx);

        if plan.applicable {
            let admission = self
                .concurrency
                .admit(&handle, workflow.cancel_in_progress())
                .await;
            match admission {
                Ok(Admission::Active { .. }) => {
                    {
                        let mut run = handle.state().write().await;
                        if !run.status.is_terminal() {
                            run.status = RunStatus::Running;
                            run.started_at = Some(Utc::now());
                        }
                    }
                    let driven = execution.drive().await;
                    self.concurrency.release(&handle).await;
                    driven?;
                }
                Ok(Admission::Stale { active }) => {
                    info!(run_id = %handle.id(), %active, "Run superseded before it started");
                }
                Err(err) => {
                    warn!(run_id = %handle.id(), group = %plan.group, error = %err, "Run rejected");
                    self.forget(handle.id()).await;
                    return Err(err);
                }
            }
        }

        execution.flush().await;
        drop(execution);

        let aggregator = aggregation
            .await
            .map_err(|e| Error::Internal(format!("report aggregation failed: {e}")))?;
        let cancel_reason = handle.state().read().await.cancel_reason.clone();
        let result = aggregator.finish(cancel_reason.clone());

        {
            let mut run = handle.state().write().await;
            if !run.status.is_terminal() {
                run.status = result.status;
                run.completed_at = Some(Utc::now());
            }
        }

        if let Some(reason) = cancel_reason {
            let cancelled_jobs = result
                .jobs
                .iter()
                .filter(|j| j.cancel_reason.as_ref() == Some(&reason))
                .map(|j| j.job_id.clone())
                .collect();
            self.publish(Event::RunCancelled(RunCancelledPayload {
                run_id: handle.id(),
                reason,
                cancelled_jobs,
                cancelled_at: Utc::now(),
            }))
            .await;
        }

        let counts = result.counts;
        info!(
            run_id = %handle.id(),
            status = %result.status,
            passed = counts.passed,
            failed = counts.failed,
            skipped = counts.skipped,
            cancelled = counts.cancelled,
            "Run completed"
        );
        self.prune_history().await;
        self.publish(Event::RunCompleted(RunCompletedPayload {
            run_id: handle.id(),
            workflow: workflow.name.clone(),
            status: result.status,
            jobs_passed: counts.passed,
            jobs_failed: counts.failed + counts.advisory_failed,
            jobs_skipped: counts.skipped,
            jobs_cancelled: counts.cancelled,
            completed_at: Utc::now(),
        }))
        .await;

        Ok(result)
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.events {
            let subject = event.subject();
            if let Err(e) = bus.publish(event).await {
                warn!(%subject, error = %e, "Failed to publish event");
            }
        }
    }
}

/// Manual inputs are only required on manual dispatch; other triggers get
/// the declared defaults.
fn resolve_inputs(workflow: &WorkflowDefinition, context: &EventContext) -> Result<ParamValues> {
    if context.trigger == TriggerKind::WorkflowDispatch {
        return resolve_params(&workflow.inputs, &context.inputs, "");
    }
    let specs: BTreeMap<String, ParamSpec> = workflow
        .inputs
        .iter()
        .map(|(name, spec)| {
            let mut spec = spec.clone();
            spec.required = false;
            (name.clone(), spec)
        })
        .collect();
    resolve_params(&specs, &context.inputs, "")
}

type JobOutput = (JobId, Result<ExternalOutcome>);

/// State of one run while it executes.
struct Execution<'a> {
    dispatcher: &'a WorkflowDispatcher,
    handle: &'a RunHandle,
    workflow: &'a WorkflowDefinition,
    context: EventContext,
    /// Instance id to the instance ids it waits on.
    dependencies: HashMap<JobId, Vec<JobId>>,
    run_regardless: HashSet<JobId>,
    secrets: HashMap<JobId, Vec<String>>,
    in_flight: HashMap<JobId, AbortHandle>,
    emitted: HashSet<JobId>,
    outcomes: mpsc::UnboundedSender<JobCompletedPayload>,
}

impl<'a> Execution<'a> {
    fn new(
        dispatcher: &'a WorkflowDispatcher,
        handle: &'a RunHandle,
        workflow: &'a WorkflowDefinition,
        plan: &RunPlan,
        context: EventContext,
        outcomes: mpsc::UnboundedSender<JobCompletedPayload>,
    ) -> Self {
        let mut instances: HashMap<&JobId, Vec<JobId>> = HashMap::new();
        for job in &plan.jobs {
            instances
                .entry(&job.record.job)
                .or_default()
                .push(job.record.id.clone());
        }

        let dependencies = plan
            .jobs
            .iter()
            .map(|job| {
                let deps = job
                    .needs
                    .iter()
                    .flat_map(|need| instances.get(need).cloned().unwrap_or_default())
                    .collect();
                (job.record.id.clone(), deps)
            })
            .collect();

        Self {
            dispatcher,
            handle,
            workflow,
            context,
            dependencies,
            run_regardless: plan
                .jobs
                .iter()
                .filter(|j| j.run_regardless)
                .map(|j| j.record.id.clone())
                .collect(),
            secrets: plan
                .jobs
                .iter()
                .map(|j| (j.record.id.clone(), j.secrets.clone()))
                .collect(),
            in_flight: HashMap::new(),
            emitted: HashSet::new(),
            outcomes,
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let mut cancelled = self.handle.subscribe();
        let mut tasks: JoinSet<JobOutput> = JoinSet::new();

        loop {
            if cancelled.borrow().is_some() {
                self.abandon(&mut tasks).await;
                break;
            }

            self.schedule(&mut tasks).await?;
            self.flush().await;

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((job_id, result))) => self.record(job_id, result).await?,
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => {
                        return Err(Error::Internal(format!("job task failed: {e}")));
                    }
                    None => {}
                },
                _ = cancelled.changed() => {}
            }
        }

        Ok(())
    }

    /// Start every job whose dependencies are settled; skip those whose
    /// dependencies did not succeed. Repeats until nothing changes, so
    /// skips cascade through the graph.
    async fn schedule(&mut self, tasks: &mut JoinSet<JobOutput>) -> Result<()> {
        loop {
            let mut started = Vec::new();
            let mut progressed = false;
            {
                let mut run = self.handle.state().write().await;
                if run.status.is_terminal() {
                    return Ok(());
                }
                for idx in 0..run.jobs.len() {
                    if run.jobs[idx].status != JobStatus::Pending {
                        continue;
                    }
                    let id = run.jobs[idx].id.clone();
                    let deps = self.dependencies.get(&id).map(Vec::as_slice).unwrap_or(&[]);

                    let mut waiting = false;
                    let mut unsatisfied = None;
                    for dep in deps {
                        let Some(record) = run.job(dep) else { continue };
                        if !record.status.is_terminal() {
                            waiting = true;
                            break;
                        }
                        if record.status != JobStatus::Success && unsatisfied.is_none() {
                            unsatisfied = Some(record.job.clone());
                        }
                    }
                    if waiting {
                        continue;
                    }

                    progressed = true;
                    if let Some(dependency) = unsatisfied
                        && !self.run_regardless.contains(&id)
                    {
                        debug!(run_id = %run.id, job = %id, %dependency, "Dependency not satisfied");
                        run.jobs[idx].skip(SkipReason::DependencyNotSatisfied { dependency })?;
                        continue;
                    }

                    run.jobs[idx].mark_running()?;
                    started.push(self.request(&run.jobs[idx]));
                }
            }

            for request in started {
                let runner = Arc::clone(&self.dispatcher.runner);
                let job_id = request.job_id.clone();
                info!(run_id = %request.run_id, job = %job_id, uses = %request.uses, "Job started");
                let abort = tasks.spawn(async move {
                    let result = runner.execute(&request).await;
                    (request.job_id, result)
                });
                self.in_flight.insert(job_id, abort);
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn request(&self, record: &JobRecord) -> JobRequest {
        JobRequest {
            run_id: self.handle.id(),
            workflow: self.workflow.name.clone(),
            job_id: record.id.clone(),
            job: record.job.clone(),
            uses: record.uses,
            matrix: record.matrix.clone(),
            options: record.options.clone(),
            context: self.context.clone(),
            secrets: self.secrets.get(&record.id).cloned().unwrap_or_default(),
        }
    }

    /// Record the outcome reported by the runner for one job.
    async fn record(&mut self, job_id: JobId, result: Result<ExternalOutcome>) -> Result<()> {
        self.in_flight.remove(&job_id);

        let (status, skip_reason, report, message) = match result {
            Ok(outcome) => {
                let status = match outcome.conclusion {
                    Conclusion::Success => JobStatus::Success,
                    Conclusion::Failure => JobStatus::Failure,
                    Conclusion::Skipped => JobStatus::Skipped,
                };
                (status, outcome.skip_reason(), outcome.report, outcome.message)
            }
            Err(e) => (JobStatus::Failure, None, None, Some(e.to_string())),
        };
        let error = match message {
            Some(text) => Some(self.dispatcher.secrets.mask(&text).await),
            None => None,
        };

        let mut fail_fast_targets = Vec::new();
        {
            let mut run = self.handle.state().write().await;
            let run_id = run.id;
            let Some(job) = run.job_mut(&job_id) else {
                return Ok(());
            };
            if job.status.is_terminal() {
                debug!(%run_id, job = %job_id, %status, "Discarding late outcome");
                return Ok(());
            }

            job.report = report.clone();
            job.error = error;
            if let Some(reason) = skip_reason {
                job.skip(reason)?;
            } else {
                job.complete(status)?;
            }
            let blocking = job.blocking;
            info!(%run_id, job = %job_id, %status, blocking, "Job completed");
            if let Some(error) = &job.error {
                debug!(%run_id, job = %job_id, %error, "Runner message");
            }

            if status == JobStatus::Failure && blocking && self.workflow.fail_fast {
                let reason = CancelReason::FailFast {
                    failed_job: job_id.clone(),
                };
                for other in run.jobs.iter_mut() {
                    if other.status.is_terminal() || self.run_regardless.contains(&other.id) {
                        continue;
                    }
                    let was_running = other.status == JobStatus::Running;
                    other.cancel(reason.clone())?;
                    if was_running {
                        fail_fast_targets.push(other.id.clone());
                    }
                }
                warn!(%run_id, failed = %job_id, "Fail-fast cancelling remaining jobs");
            }
        }

        if let (Some(sink), Some(report)) = (&self.dispatcher.reports, &report) {
            if let Err(e) = sink.publish(self.handle.id(), &job_id, report).await {
                warn!(run_id = %self.handle.id(), job = %job_id, error = %e, "Report forwarding failed");
            }
        }

        for target in fail_fast_targets {
            self.stop(&target).await;
        }
        Ok(())
    }

    /// Request termination of a running job and stop waiting for it.
    async fn stop(&mut self, job_id: &JobId) {
        if let Some(abort) = self.in_flight.remove(job_id) {
            abort.abort();
        }
        if let Err(e) = self.dispatcher.runner.cancel(self.handle.id(), job_id).await {
            warn!(run_id = %self.handle.id(), job = %job_id, error = %e, "Runner cancel failed");
        }
    }

    /// The run was cancelled from outside: stop everything still running.
    async fn abandon(&mut self, tasks: &mut JoinSet<JobOutput>) {
        let running: Vec<JobId> = self.in_flight.keys().cloned().collect();
        for job_id in &running {
            self.stop(job_id).await;
        }
        tasks.abort_all();
        info!(run_id = %self.handle.id(), stopped = running.len(), "Run cancelled");
    }

    /// Stream every newly terminal job to the aggregator and event bus.
    async fn flush(&mut self) {
        let fresh: Vec<JobCompletedPayload> = {
            let run = self.handle.state().read().await;
            run.jobs
                .iter()
                .filter(|j| j.status.is_terminal() && !self.emitted.contains(&j.id))
                .map(|j| JobCompletedPayload {
                    run_id: run.id,
                    job_id: j.id.clone(),
                    status: j.status,
                    blocking: j.blocking,
                    skip_reason: j.skip_reason.clone(),
                    cancel_reason: j.cancel_reason.clone(),
                    report: j.report.clone(),
                    completed_at: j.completed_at.unwrap_or_else(Utc::now),
                })
                .collect()
        };

        for payload in fresh {
            self.emitted.insert(payload.job_id.clone());
            if self.outcomes.send(payload.clone()).is_err() {
                warn!(run_id = %payload.run_id, job = %payload.job_id, "Aggregator closed");
            }
            self.dispatcher.publish(Event::JobCompleted(payload)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reflow_core::ports::SecretValue;
    use reflow_core::workflow::{CostClass, JobSpec, MatrixConfig};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Runner {
        failing: Vec<&'static str>,
        executed: Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl JobRunner for Runner {
        async fn execute(&self, request: &JobRequest) -> Result<ExternalOutcome> {
            self.executed.lock().unwrap().push(request.job_id.clone());
            if self.failing.iter().any(|f| *f == request.job_id.as_str()) {
                return Ok(ExternalOutcome::failure("exit 1"));
            }
            Ok(ExternalOutcome::success())
        }

        async fn cancel(&self, _run_id: RunId, _job_id: &JobId) -> Result<()> {
            Ok(())
        }
    }

    struct Secrets(Vec<&'static str>);

    #[async_trait]
    impl SecretStore for Secrets {
        async fn get_secret(&self, name: &str) -> Result<Option<SecretValue>> {
            Ok(self
                .0
                .iter()
                .any(|s| *s == name)
                .then(|| SecretValue::new("value")))
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    fn dispatcher(runner: Runner, secrets: &[&'static str]) -> (WorkflowDispatcher, Arc<Runner>) {
        let runner = Arc::new(runner);
        let dispatcher = WorkflowDispatcher::new(runner.clone(), Arc::new(Secrets(secrets.to_vec())));
        (dispatcher, runner)
    }

    fn job(id: &str, needs: &[&str]) -> JobSpec {
        let mut spec = JobSpec::new(id);
        spec.needs = needs.iter().map(|n| JobId::new(*n)).collect();
        spec
    }

    #[tokio::test]
    async fn test_plan_expands_matrix_and_gates() {
        let mut test = job("test", &[]);
        test.matrix = true;
        let mut fuzz = job("fuzz", &[]);
        fuzz.cost = CostClass::Expensive;
        let mut wf = WorkflowDefinition::new("ci", vec![test, fuzz]);
        wf.matrix = Some(MatrixConfig::new(&["3.11", "3.12"], &["3.10"]));

        let (dispatcher, _) = dispatcher(Runner::default(), &[]);
        let plan = dispatcher
            .plan(&wf, &EventContext::pull_request(9, true))
            .await
            .unwrap();

        let ids: Vec<String> = plan.job_ids().iter().map(|j| j.to_string()).collect();
        assert_eq!(ids, vec!["test (3.11)", "test (3.12)", "fuzz"]);
        assert_eq!(plan.runnable().count(), 2);
        assert_eq!(plan.group, "ci::9");
        assert_eq!(
            plan.jobs[2].record.skip_reason,
            Some(SkipReason::DraftPullRequest)
        );
    }

    #[tokio::test]
    async fn test_dependency_failure_cascades() {
        let wf = WorkflowDefinition::new(
            "ci",
            vec![job("build", &[]), job("test", &["build"]), job("publish", &["test"])],
        );
        let (dispatcher, runner) = dispatcher(
            Runner {
                failing: vec!["build"],
                ..Default::default()
            },
            &[],
        );

        let result = dispatcher
            .dispatch(&wf, EventContext::push("refs/heads/main"))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.status_of("test"), Some(JobStatus::Skipped));
        assert_eq!(result.status_of("publish"), Some(JobStatus::Skipped));
        assert_eq!(
            result.job(&JobId::new("publish")).unwrap().skip_reason,
            Some(SkipReason::DependencyNotSatisfied {
                dependency: JobId::new("test")
            })
        );
        assert_eq!(runner.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_always_job_runs_after_failure() {
        let mut report = job("report", &["test"]);
        report.condition = Some("${{ always() }}".into());
        let wf = WorkflowDefinition::new("ci", vec![job("test", &[]), report]);
        let (dispatcher, _) = dispatcher(
            Runner {
                failing: vec!["test"],
                ..Default::default()
            },
            &[],
        );

        let result = dispatcher
            .dispatch(&wf, EventContext::push("refs/heads/main"))
            .await
            .unwrap();

        assert_eq!(result.status_of("report"), Some(JobStatus::Success));
        assert_eq!(result.status, RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_missing_required_credential_rejects_run() {
        let mut sonar = job("sonar", &[]);
        sonar.secrets = vec!["SONAR_TOKEN".into()];
        let wf = WorkflowDefinition::new("ci", vec![job("lint", &[]), sonar]);
        let (dispatcher, runner) = dispatcher(Runner::default(), &[]);

        let err = dispatcher
            .dispatch(&wf, EventContext::push("refs/heads/main"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CredentialAbsent { .. }));
        assert!(err.is_configuration());
        assert!(runner.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_trigger_skips_run() {
        let mut wf = WorkflowDefinition::new("release", vec![job("publish", &[])]);
        wf.on = vec![TriggerKind::Push];
        let (dispatcher, runner) = dispatcher(Runner::default(), &[]);

        let result = dispatcher
            .dispatch(&wf, EventContext::schedule("refs/heads/main"))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Skipped);
        assert!(runner.executed.lock().unwrap().is_empty());
        let run = dispatcher.run(result.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn test_manual_inputs_are_validated() {
        let mut wf = WorkflowDefinition::new("fuzz", vec![job("fuzz", &[])]);
        wf.inputs
            .insert("release-tag".into(), ParamSpec::string().required());
        wf.inputs
            .insert("fuzz-seconds".into(), ParamSpec::number(600.0));
        let (dispatcher, _) = dispatcher(Runner::default(), &[]);

        let missing = dispatcher
            .dispatch(&wf, EventContext::manual("refs/heads/main"))
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::MissingInput(name) if name == "release-tag"));

        let ctx = EventContext::manual("refs/heads/main")
            .with_input("release-tag", serde_json::json!("v1.0.0"))
            .with_input("fuzz-seconds", serde_json::json!("soon"));
        let invalid = dispatcher.dispatch(&wf, ctx).await.unwrap_err();
        assert!(matches!(invalid, Error::InvalidInput { .. }));

        let ok = dispatcher
            .dispatch(&wf, EventContext::push("refs/heads/main"))
            .await
            .unwrap();
        assert_eq!(ok.status, RunStatus::Success);
    }
}
