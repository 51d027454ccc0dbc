//! Run and job execution types.

use crate::context::EventContext;
use crate::ids::{JobId, RunId, WorkflowId};
use crate::params::ParamValues;
use crate::workflow::Integration;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Cancelled | RunStatus::Skipped
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled | JobStatus::Skipped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a job was not executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    DraftPullRequest,
    MissingCredential { secret: String },
    ScanMode { requested: String },
    Condition { expression: String },
    DependencyNotSatisfied { dependency: JobId },
    TriggerNotHandled { trigger: String },
    ExternallySkipped,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DraftPullRequest => f.write_str("draft pull request"),
            SkipReason::MissingCredential { secret } => write!(f, "secret {secret} not configured"),
            SkipReason::ScanMode { requested } => write!(f, "scan mode is {requested}"),
            SkipReason::Condition { expression } => write!(f, "condition false: {expression}"),
            SkipReason::DependencyNotSatisfied { dependency } => {
                write!(f, "dependency {dependency} did not succeed")
            }
            SkipReason::TriggerNotHandled { trigger } => {
                write!(f, "workflow does not run on {trigger}")
            }
            SkipReason::ExternallySkipped => f.write_str("skipped by integration"),
        }
    }
}

/// Why a job or run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CancelReason {
    Superseded { by: RunId },
    FailFast { failed_job: JobId },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Superseded { .. } => f.write_str("superseded"),
            CancelReason::FailFast { .. } => f.write_str("fail-fast"),
        }
    }
}

/// Structured report produced by an external scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportArtifact {
    pub name: String,
    pub format: ReportFormat,
    /// Opaque payload, forwarded unmodified.
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Sarif,
    Json,
}

/// Record of one job instance within a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub id: JobId,
    /// Job spec this instance was expanded from.
    pub job: JobId,
    pub uses: Integration,
    pub matrix: BTreeMap<String, String>,
    pub options: ParamValues,
    pub blocking: bool,
    pub status: JobStatus,
    pub skip_reason: Option<SkipReason>,
    pub cancel_reason: Option<CancelReason>,
    pub error: Option<String>,
    pub report: Option<ReportArtifact>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn pending(id: JobId, job: JobId, uses: Integration) -> Self {
        Self {
            id,
            job,
            uses,
            matrix: BTreeMap::new(),
            options: ParamValues::new(),
            blocking: true,
            status: JobStatus::Pending,
            skip_reason: None,
            cancel_reason: None,
            error: None,
            report: None,
            started_at: None,
            completed_at: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::OutcomeAlreadyRecorded(self.id.to_string()));
        }
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a terminal outcome. Outcomes are write-once.
    pub fn complete(&mut self, status: JobStatus) -> Result<()> {
        self.ensure_open()?;
        if !status.is_terminal() {
            return Err(Error::Internal(format!(
                "{status} is not a terminal status for job {}",
                self.id
            )));
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn skip(&mut self, reason: SkipReason) -> Result<()> {
        self.complete(JobStatus::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }

    pub fn cancel(&mut self, reason: CancelReason) -> Result<()> {
        self.complete(JobStatus::Cancelled)?;
        self.cancel_reason = Some(reason);
        Ok(())
    }
}

/// A single dispatch of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub id: RunId,
    pub workflow: WorkflowId,
    pub group: String,
    pub context: EventContext,
    pub inputs: ParamValues,
    pub status: RunStatus,
    pub cancel_reason: Option<CancelReason>,
    pub jobs: Vec<JobRecord>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(workflow: WorkflowId, group: String, context: EventContext) -> Self {
        Self {
            id: RunId::new(),
            workflow,
            group,
            context,
            inputs: ParamValues::new(),
            status: RunStatus::Queued,
            cancel_reason: None,
            jobs: vec![],
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn job(&self, id: &JobId) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| &j.id == id)
    }

    pub fn job_mut(&mut self, id: &JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|j| &j.id == id)
    }

    /// Whether `self` should replace `other` as the active run of a group.
    pub fn supersedes(&self, other: &Run) -> bool {
        (self.queued_at, self.id) > (other.queued_at, other.id)
    }

    /// Cancel the run and every job that has not reached a terminal state.
    ///
    /// Jobs that already finished keep their outcome. Returns the ids of the
    /// jobs that were cancelled.
    pub fn cancel(&mut self, reason: CancelReason) -> Vec<JobId> {
        let mut cancelled = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
            if job.cancel(reason.clone()).is_ok() {
                cancelled.push(job.id.clone());
            }
        }
        if !self.status.is_terminal() {
            self.status = RunStatus::Cancelled;
            self.cancel_reason = Some(reason);
            self.completed_at = Some(Utc::now());
        }
        cancelled
    }
}
