//! Lifecycle events emitted while a run progresses.

use crate::context::TriggerKind;
use crate::ids::*;
use crate::run::{CancelReason, JobStatus, ReportArtifact, RunStatus, SkipReason};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All events in the Reflow system.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunQueued(RunQueuedPayload),
    RunCompleted(RunCompletedPayload),
    RunCancelled(RunCancelledPayload),
    JobCompleted(JobCompletedPayload),
}

impl Event {
    /// Hierarchical subject for routing, e.g. `run.<id>.job.<job>.completed`.
    pub fn subject(&self) -> String {
        match self {
            Event::RunQueued(p) => format!("run.queued.{}", p.workflow),
            Event::RunCompleted(p) => format!("run.completed.{}.{}", p.workflow, p.run_id),
            Event::RunCancelled(p) => format!("run.cancelled.{}", p.run_id),
            Event::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job_id),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunQueued(p) => p.run_id,
            Event::RunCompleted(p) => p.run_id,
            Event::RunCancelled(p) => p.run_id,
            Event::JobCompleted(p) => p.run_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunQueuedPayload {
    pub run_id: RunId,
    pub workflow: WorkflowId,
    pub group: String,
    pub trigger: TriggerKind,
    pub git_ref: String,
    pub actor: Option<String>,
    pub job_count: u32,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow: WorkflowId,
    pub status: RunStatus,
    pub jobs_passed: u32,
    pub jobs_failed: u32,
    pub jobs_skipped: u32,
    pub jobs_cancelled: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCancelledPayload {
    pub run_id: RunId,
    pub reason: CancelReason,
    pub cancelled_jobs: Vec<JobId>,
    pub cancelled_at: DateTime<Utc>,
}

/// Terminal outcome of one job instance, streamed as it happens.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub status: JobStatus,
    pub blocking: bool,
    pub skip_reason: Option<SkipReason>,
    pub cancel_reason: Option<CancelReason>,
    pub report: Option<ReportArtifact>,
    pub completed_at: DateTime<Utc>,
}
