//! Concurrency groups.
//!
//! At most one run is active per group key. A newer run for the same key
//! cancels the older one; completed jobs of the cancelled run keep their
//! outcomes.

use reflow_core::context::EventContext;
use reflow_core::ids::{JobId, RunId};
use reflow_core::run::{CancelReason, Run};
use reflow_core::workflow::WorkflowDefinition;
use reflow_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

/// Group key for a run: `<workflow or custom group>::<pr number or ref>`.
pub fn group_key(workflow: &WorkflowDefinition, context: &EventContext) -> String {
    let prefix = workflow
        .concurrency
        .as_ref()
        .and_then(|c| c.group.as_deref())
        .unwrap_or(workflow.name.as_str());
    match context.pr_number {
        Some(number) => format!("{prefix}::{number}"),
        None => format!("{prefix}::{}", context.git_ref),
    }
}

/// Shared handle on a run's state plus its cancellation signal.
#[derive(Debug, Clone)]
pub struct RunHandle {
    id: RunId,
    run: Arc<RwLock<Run>>,
    cancel_tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl RunHandle {
    pub fn new(run: Run) -> Self {
        let (cancel_tx, _) = watch::channel(None);
        Self {
            id: run.id,
            run: Arc::new(RwLock::new(run)),
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn state(&self) -> &Arc<RwLock<Run>> {
        &self.run
    }

    pub async fn snapshot(&self) -> Run {
        self.run.read().await.clone()
    }

    /// Receiver that observes cancellation of this run.
    pub fn subscribe(&self) -> watch::Receiver<Option<CancelReason>> {
        self.cancel_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.borrow().is_some()
    }

    /// Cancel the run and its unfinished jobs, then signal observers.
    pub async fn cancel(&self, reason: CancelReason) -> Vec<JobId> {
        let cancelled = self.run.write().await.cancel(reason.clone());
        self.cancel_tx.send_replace(Some(reason));
        cancelled
    }
}

/// Result of admitting a run to its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The run is now the active run of its group.
    Active { superseded: Option<RunId> },
    /// A newer run already holds the group; the arriving run was cancelled.
    Stale { active: RunId },
}

/// Tracks the active run per concurrency group.
#[derive(Debug, Default)]
pub struct ConcurrencyController {
    groups: RwLock<HashMap<String, RunHandle>>,
}

impl ConcurrencyController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` as the active run of its group.
    ///
    /// Replacement is compare-and-swap on `(queued_at, id)`: only a run that
    /// supersedes the recorded one takes the slot.
    pub async fn admit(&self, handle: &RunHandle, cancel_in_progress: bool) -> Result<Admission> {
        let arriving = handle.snapshot().await;
        let key = arriving.group.clone();
        let mut groups = self.groups.write().await;

        let Some(current) = groups.get(&key).cloned() else {
            groups.insert(key.clone(), handle.clone());
            debug!(group = %key, run_id = %arriving.id, "Run admitted");
            return Ok(Admission::Active { superseded: None });
        };

        if current.id() == arriving.id {
            return Ok(Admission::Active { superseded: None });
        }

        let recorded = current.snapshot().await;
        if recorded.status.is_terminal() {
            groups.insert(key.clone(), handle.clone());
            debug!(group = %key, run_id = %arriving.id, "Run admitted after finished run");
            return Ok(Admission::Active { superseded: None });
        }

        if !cancel_in_progress {
            return Err(Error::ConcurrencyConflict {
                group: key,
                active: recorded.id.to_string(),
            });
        }

        if arriving.supersedes(&recorded) {
            let cancelled = current
                .cancel(CancelReason::Superseded { by: arriving.id })
                .await;
            groups.insert(key.clone(), handle.clone());
            warn!(
                group = %key,
                run_id = %arriving.id,
                superseded = %recorded.id,
                cancelled_jobs = cancelled.len(),
                "Superseded active run"
            );
            return Ok(Admission::Active {
                superseded: Some(recorded.id),
            });
        }

        handle
            .cancel(CancelReason::Superseded { by: recorded.id })
            .await;
        info!(group = %key, run_id = %arriving.id, active = %recorded.id, "Stale run cancelled on arrival");
        Ok(Admission::Stale {
            active: recorded.id,
        })
    }

    /// Clear the group slot if `handle` still holds it.
    pub async fn release(&self, handle: &RunHandle) -> bool {
        let key = handle.run.read().await.group.clone();
        let mut groups = self.groups.write().await;
        match groups.get(&key) {
            Some(current) if current.id() == handle.id() => {
                groups.remove(&key);
                debug!(group = %key, run_id = %handle.id(), "Run released");
                true
            }
            _ => false,
        }
    }

    pub async fn active(&self, key: &str) -> Option<RunId> {
        self.groups.read().await.get(key).map(RunHandle::id)
    }
}
