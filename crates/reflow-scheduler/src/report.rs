//! Run verdicts and summaries.
//!
//! The aggregator folds the stream of terminal job outcomes into a
//! [`RunResult`]. Run status precedence is cancelled, then failure, then
//! success, then skipped.

use reflow_core::events::JobCompletedPayload;
use reflow_core::ids::{JobId, RunId, WorkflowId};
use reflow_core::run::{CancelReason, JobStatus, ReportArtifact, RunStatus, SkipReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use tokio::sync::mpsc;
use tracing::debug;

/// How a job is presented in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    FailedAdvisory,
    Skipped,
    Cancelled,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub blocking: bool,
    pub skip_reason: Option<SkipReason>,
    pub cancel_reason: Option<CancelReason>,
    pub report: Option<ReportArtifact>,
}

impl JobSummary {
    fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            blocking: true,
            skip_reason: None,
            cancel_reason: None,
            report: None,
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self.status {
            JobStatus::Success => Verdict::Passed,
            JobStatus::Failure if self.blocking => Verdict::Failed,
            JobStatus::Failure => Verdict::FailedAdvisory,
            JobStatus::Skipped => Verdict::Skipped,
            JobStatus::Cancelled => Verdict::Cancelled,
            JobStatus::Pending | JobStatus::Running => Verdict::Pending,
        }
    }

    /// Human-readable outcome, e.g. `skipped (not applicable: draft pull request)`.
    pub fn label(&self) -> String {
        match self.verdict() {
            Verdict::Passed => "passed".to_string(),
            Verdict::Failed => "failed".to_string(),
            Verdict::FailedAdvisory => "failed (advisory)".to_string(),
            Verdict::Skipped => match &self.skip_reason {
                Some(reason) => format!("skipped (not applicable: {reason})"),
                None => "skipped".to_string(),
            },
            Verdict::Cancelled => match &self.cancel_reason {
                Some(reason) => format!("cancelled ({reason})"),
                None => "cancelled".to_string(),
            },
            Verdict::Pending => "pending".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: u32,
    pub failed: u32,
    pub advisory_failed: u32,
    pub skipped: u32,
    pub cancelled: u32,
}

/// Final verdict of a run with its ordered per-job summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub workflow: WorkflowId,
    pub status: RunStatus,
    pub cancel_reason: Option<CancelReason>,
    pub jobs: Vec<JobSummary>,
    pub counts: OutcomeCounts,
}

impl RunResult {
    pub fn job(&self, id: &JobId) -> Option<&JobSummary> {
        self.jobs.iter().find(|j| &j.job_id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.jobs
            .iter()
            .find(|j| j.job_id.as_str() == id)
            .map(|j| j.status)
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (&JobId, &ReportArtifact)> {
        self.jobs
            .iter()
            .filter_map(|j| j.report.as_ref().map(|r| (&j.job_id, r)))
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Workflow {} ({}): {}", self.workflow, self.run_id, self.status);
        let width = self
            .jobs
            .iter()
            .map(|j| j.job_id.as_str().len())
            .max()
            .unwrap_or(0);
        for job in &self.jobs {
            let _ = writeln!(out, "  {:<width$}  {}", job.job_id.as_str(), job.label());
        }
        let c = &self.counts;
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} advisory failures, {} skipped, {} cancelled",
            c.passed, c.failed, c.advisory_failed, c.skipped, c.cancelled
        );
        out
    }

    /// Markdown table suitable for a CI step summary.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## {} · {}", self.workflow, self.status);
        let _ = writeln!(out);
        let _ = writeln!(out, "| Job | Outcome |");
        let _ = writeln!(out, "| --- | --- |");
        for job in &self.jobs {
            let _ = writeln!(out, "| `{}` | {} |", job.job_id, job.label());
        }
        out
    }
}

/// Folds terminal job outcomes into a [`RunResult`].
#[derive(Debug)]
pub struct ReportAggregator {
    run_id: RunId,
    workflow: WorkflowId,
    order: Vec<JobId>,
    outcomes: HashMap<JobId, JobSummary>,
}

impl ReportAggregator {
    /// `order` is the summary order: declaration order, then matrix order.
    pub fn new(run_id: RunId, workflow: WorkflowId, order: Vec<JobId>) -> Self {
        Self {
            run_id,
            workflow,
            order,
            outcomes: HashMap::new(),
        }
    }

    /// Record one terminal outcome. The first outcome for a job wins.
    pub fn record(&mut self, outcome: &JobCompletedPayload) {
        if self.outcomes.contains_key(&outcome.job_id) {
            debug!(run_id = %self.run_id, job = %outcome.job_id, "Duplicate outcome ignored");
            return;
        }
        if !self.order.contains(&outcome.job_id) {
            self.order.push(outcome.job_id.clone());
        }
        self.outcomes.insert(
            outcome.job_id.clone(),
            JobSummary {
                job_id: outcome.job_id.clone(),
                status: outcome.status,
                blocking: outcome.blocking,
                skip_reason: outcome.skip_reason.clone(),
                cancel_reason: outcome.cancel_reason.clone(),
                report: outcome.report.clone(),
            },
        );
    }

    /// Drain a stream of outcomes until every sender is dropped.
    pub async fn consume(mut self, mut rx: mpsc::UnboundedReceiver<JobCompletedPayload>) -> Self {
        while let Some(outcome) = rx.recv().await {
            self.record(&outcome);
        }
        self
    }

    /// Produce the verdict. `run_cancel` is the run-level cancellation, if any.
    pub fn finish(self, run_cancel: Option<CancelReason>) -> RunResult {
        let mut outcomes = self.outcomes;
        let jobs: Vec<JobSummary> = self
            .order
            .into_iter()
            .map(|id| {
                outcomes
                    .remove(&id)
                    .unwrap_or_else(|| JobSummary::pending(id))
            })
            .collect();

        let mut counts = OutcomeCounts::default();
        for job in &jobs {
            match job.verdict() {
                Verdict::Passed => counts.passed += 1,
                Verdict::Failed => counts.failed += 1,
                Verdict::FailedAdvisory => counts.advisory_failed += 1,
                Verdict::Skipped => counts.skipped += 1,
                Verdict::Cancelled => counts.cancelled += 1,
                Verdict::Pending => {}
            }
        }

        let superseded = matches!(run_cancel, Some(CancelReason::Superseded { .. }));
        let status = if superseded {
            RunStatus::Cancelled
        } else if counts.failed > 0 {
            RunStatus::Failure
        } else if counts.passed > 0 || counts.advisory_failed > 0 {
            RunStatus::Success
        } else if counts.cancelled > 0 {
            RunStatus::Cancelled
        } else {
            RunStatus::Skipped
        };

        RunResult {
            run_id: self.run_id,
            workflow: self.workflow,
            status,
            cancel_reason: run_cancel,
            jobs,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn outcome(run_id: RunId, job: &str, status: JobStatus) -> JobCompletedPayload {
        JobCompletedPayload {
            run_id,
            job_id: JobId::new(job),
            status,
            blocking: true,
            skip_reason: None,
            cancel_reason: None,
            report: None,
            completed_at: Utc::now(),
        }
    }

    fn aggregator(jobs: &[&str]) -> ReportAggregator {
        ReportAggregator::new(
            RunId::new(),
            WorkflowId::new("python-ci"),
            jobs.iter().map(|j| JobId::new(*j)).collect(),
        )
    }

    #[test]
    fn test_summary_follows_declaration_order() {
        let mut agg = aggregator(&["lint", "test", "fuzz"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "fuzz", JobStatus::Success));
        agg.record(&outcome(run_id, "lint", JobStatus::Success));
        agg.record(&outcome(run_id, "test", JobStatus::Success));

        let result = agg.finish(None);
        let order: Vec<&str> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(order, vec!["lint", "test", "fuzz"]);
        assert_eq!(result.status, RunStatus::Success);
    }

    #[test]
    fn test_blocking_failure_fails_run() {
        let mut agg = aggregator(&["lint", "test"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "lint", JobStatus::Success));
        agg.record(&outcome(run_id, "test", JobStatus::Failure));

        let result = agg.finish(None);
        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.counts.failed, 1);
    }

    #[test]
    fn test_advisory_failure_does_not_fail_run() {
        let mut agg = aggregator(&["lint", "sonar"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "lint", JobStatus::Success));
        let mut sonar = outcome(run_id, "sonar", JobStatus::Failure);
        sonar.blocking = false;
        agg.record(&sonar);

        let result = agg.finish(None);
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.job(&JobId::new("sonar")).unwrap().label(), "failed (advisory)");
    }

    #[test]
    fn test_all_skipped_is_skipped_not_success() {
        let mut agg = aggregator(&["fuzz"]);
        let run_id = agg.run_id;
        let mut fuzz = outcome(run_id, "fuzz", JobStatus::Skipped);
        fuzz.skip_reason = Some(SkipReason::DraftPullRequest);
        agg.record(&fuzz);

        let result = agg.finish(None);
        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(
            result.jobs[0].label(),
            "skipped (not applicable: draft pull request)"
        );
    }

    #[test]
    fn test_supersession_overrides_job_outcomes() {
        let mut agg = aggregator(&["lint", "test"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "lint", JobStatus::Failure));
        let by = RunId::new();
        let mut test = outcome(run_id, "test", JobStatus::Cancelled);
        test.cancel_reason = Some(CancelReason::Superseded { by });
        agg.record(&test);

        let result = agg.finish(Some(CancelReason::Superseded { by }));
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.jobs[1].label(), "cancelled (superseded)");
    }

    #[test]
    fn test_fail_fast_cancellation_reports_failure() {
        let mut agg = aggregator(&["test", "fuzz"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "test", JobStatus::Failure));
        let mut fuzz = outcome(run_id, "fuzz", JobStatus::Cancelled);
        fuzz.cancel_reason = Some(CancelReason::FailFast {
            failed_job: JobId::new("test"),
        });
        agg.record(&fuzz);

        let result = agg.finish(None);
        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.jobs[1].label(), "cancelled (fail-fast)");
    }

    #[test]
    fn test_first_outcome_wins() {
        let mut agg = aggregator(&["lint"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "lint", JobStatus::Success));
        agg.record(&outcome(run_id, "lint", JobStatus::Failure));

        assert_eq!(agg.finish(None).status_of("lint"), Some(JobStatus::Success));
    }

    #[test]
    fn test_render_text() {
        let mut agg = aggregator(&["lint", "publish"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "lint", JobStatus::Success));
        let mut publish = outcome(run_id, "publish", JobStatus::Skipped);
        publish.skip_reason = Some(SkipReason::MissingCredential {
            secret: "PYPI_API_TOKEN".into(),
        });
        agg.record(&publish);

        let text = agg.finish(None).render_text();
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "  lint     passed",
                "  publish  skipped (not applicable: secret PYPI_API_TOKEN not configured)",
                "1 passed, 0 failed, 0 advisory failures, 1 skipped, 0 cancelled",
            ]
        );
    }

    #[test]
    fn test_render_markdown() {
        let mut agg = aggregator(&["lint"]);
        let run_id = agg.run_id;
        agg.record(&outcome(run_id, "lint", JobStatus::Success));

        let md = agg.finish(None).render_markdown();
        assert!(md.starts_with("## python-ci · success"));
        assert!(md.contains("| `lint` | passed |"));
    }

    #[tokio::test]
    async fn test_consume_stream() {
        let agg = aggregator(&["a", "b"]);
        let run_id = agg.run_id;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(agg.consume(rx));

        tx.send(outcome(run_id, "b", JobStatus::Skipped)).unwrap();
        tx.send(outcome(run_id, "a", JobStatus::Success)).unwrap();
        drop(tx);

        let result = task.await.unwrap().finish(None);
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.counts.skipped, 1);
    }
}
