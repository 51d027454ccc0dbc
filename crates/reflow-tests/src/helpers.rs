//! Test helper functions and scripted collaborators.

use crate::fixtures::secret_store;
use async_trait::async_trait;
use reflow_core::events::Event;
use reflow_core::ids::{JobId, RunId};
use reflow_core::ports::{Conclusion, EventBus, ExternalOutcome, JobRequest, JobRunner, ReportSink};
use reflow_core::run::{ReportArtifact, ReportFormat};
use reflow_core::{Error, Result};
use reflow_scheduler::WorkflowDispatcher;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// What the mock runner does for one execution of a job.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(String),
    Skip,
    /// The runner itself errors.
    Error(String),
    /// Never completes; the job stays running until it is cancelled.
    Hold,
    /// Succeed after a delay.
    Delay(std::time::Duration),
    /// Complete with a structured report attached.
    Report(Conclusion, ReportArtifact),
}

/// Job runner replaying scripted steps.
///
/// Scripts are keyed by instance id or job id; the instance id wins. Each
/// execution consumes one step and the last step repeats. Unscripted jobs
/// succeed.
#[derive(Default)]
pub struct MockRunner {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    executed: Mutex<Vec<JobId>>,
    cancelled: Mutex<Vec<JobId>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, job: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job.to_string(), steps.into_iter().collect());
        self
    }

    pub fn fail(self, job: &str) -> Self {
        self.script(job, [Step::Fail("exit status 1".into())])
    }

    pub fn hold(self, job: &str) -> Self {
        self.script(job, [Step::Hold])
    }

    /// Job instances executed so far, in start order.
    pub fn executed(&self) -> Vec<JobId> {
        self.executed.lock().unwrap().clone()
    }

    pub fn was_executed(&self, id: &str) -> bool {
        self.executed.lock().unwrap().iter().any(|j| j.as_str() == id)
    }

    /// Job instances the dispatcher asked to cancel.
    pub fn cancelled(&self) -> Vec<JobId> {
        self.cancelled.lock().unwrap().clone()
    }

    fn next_step(&self, request: &JobRequest) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        let key = if scripts.contains_key(request.job_id.as_str()) {
            request.job_id.as_str()
        } else {
            request.job.as_str()
        };
        match scripts.get_mut(key) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or(Step::Succeed),
            Some(steps) => steps.front().cloned().unwrap_or(Step::Succeed),
            None => Step::Succeed,
        }
    }
}

#[async_trait]
impl JobRunner for MockRunner {
    async fn execute(&self, request: &JobRequest) -> Result<ExternalOutcome> {
        self.executed.lock().unwrap().push(request.job_id.clone());
        match self.next_step(request) {
            Step::Succeed => Ok(ExternalOutcome::success()),
            Step::Fail(message) => Ok(ExternalOutcome::failure(message)),
            Step::Skip => Ok(ExternalOutcome::skipped()),
            Step::Error(message) => Err(Error::Runner(message)),
            Step::Hold => std::future::pending().await,
            Step::Delay(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ExternalOutcome::success())
            }
            Step::Report(conclusion, report) => Ok(ExternalOutcome {
                conclusion,
                report: Some(report),
                message: None,
            }),
        }
    }

    async fn cancel(&self, _run_id: RunId, job_id: &JobId) -> Result<()> {
        self.cancelled.lock().unwrap().push(job_id.clone());
        Ok(())
    }
}

/// Report sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(RunId, JobId, ReportArtifact)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(RunId, JobId, ReportArtifact)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn publish(&self, run_id: RunId, job_id: &JobId, report: &ReportArtifact) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((run_id, job_id.clone(), report.clone()));
        Ok(())
    }
}

/// Event bus that keeps everything published to it.
#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<Event>>,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(Event::subject).collect()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// A dispatcher wired to recording collaborators.
pub struct Harness {
    pub dispatcher: Arc<WorkflowDispatcher>,
    pub runner: Arc<MockRunner>,
    pub sink: Arc<RecordingSink>,
    pub bus: Arc<RecordingBus>,
}

pub fn harness(runner: MockRunner, secrets: &[(&str, &str)]) -> Harness {
    let runner = Arc::new(runner);
    let sink = Arc::new(RecordingSink::default());
    let bus = Arc::new(RecordingBus::default());
    let dispatcher = WorkflowDispatcher::new(runner.clone(), secret_store(secrets))
        .with_report_sink(sink.clone())
        .with_event_bus(bus.clone());
    Harness {
        dispatcher: Arc::new(dispatcher),
        runner,
        sink,
        bus,
    }
}

/// A SARIF report with a single finding.
pub fn sarif_report(name: &str) -> ReportArtifact {
    ReportArtifact {
        name: name.to_string(),
        format: ReportFormat::Sarif,
        content: serde_json::json!({
            "version": "2.1.0",
            "runs": [{
                "tool": {"driver": {"name": "bandit"}},
                "results": [{"ruleId": "B101", "level": "warning"}]
            }]
        }),
    }
}

/// Wait for a condition to become true, polling at the given interval.
pub async fn wait_for<F, Fut>(
    timeout: std::time::Duration,
    interval: std::time::Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: std::time::Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("future did not complete in time")
}
