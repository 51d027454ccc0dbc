//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and the
//! external collaborators: the runner fabric, the secret store and the sink
//! for scanner reports.

use crate::context::EventContext;
use crate::events::Event;
use crate::ids::{JobId, RunId, WorkflowId};
use crate::params::ParamValues;
use crate::run::{ReportArtifact, SkipReason};
use crate::workflow::Integration;
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Sink for lifecycle events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Request to execute one job instance on the external fabric.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub run_id: RunId,
    pub workflow: WorkflowId,
    pub job_id: JobId,
    /// Job spec the instance was expanded from.
    pub job: JobId,
    pub uses: Integration,
    pub matrix: BTreeMap<String, String>,
    pub options: ParamValues,
    pub context: EventContext,
    /// Names of the secrets the job declared; values stay in the store.
    pub secrets: Vec<String>,
}

/// Conclusion reported by the external fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conclusion {
    Success,
    Failure,
    Skipped,
}

/// What an external job reported back.
#[derive(Debug, Clone)]
pub struct ExternalOutcome {
    pub conclusion: Conclusion,
    pub report: Option<ReportArtifact>,
    pub message: Option<String>,
}

impl ExternalOutcome {
    pub fn success() -> Self {
        Self {
            conclusion: Conclusion::Success,
            report: None,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            conclusion: Conclusion::Failure,
            report: None,
            message: Some(message.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            conclusion: Conclusion::Skipped,
            report: None,
            message: None,
        }
    }

    pub fn with_report(mut self, report: ReportArtifact) -> Self {
        self.report = Some(report);
        self
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        (self.conclusion == Conclusion::Skipped).then_some(SkipReason::ExternallySkipped)
    }
}

/// The external compute fabric that actually runs job payloads.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute a job and wait for its conclusion.
    async fn execute(&self, request: &JobRequest) -> Result<ExternalOutcome>;

    /// Request termination of a running job. Best effort.
    async fn cancel(&self, run_id: RunId, job_id: &JobId) -> Result<()>;
}

/// A secret value. The value is never printed.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Lookup capability for credentials. Absence is `Ok(None)`, not an error.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Option<SecretValue>>;

    async fn has_secret(&self, name: &str) -> Result<bool> {
        Ok(self
            .get_secret(name)
            .await?
            .is_some_and(|value| !value.is_empty()))
    }

    /// Hide resolved secret values in text that will be recorded or printed.
    async fn mask(&self, text: &str) -> String {
        text.to_string()
    }

    /// Store name for logging.
    fn name(&self) -> &str;
}

/// Names of the credentials that were present when a run was planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    present: BTreeSet<String>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.present.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.present.contains(name)
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            present: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Downstream consumer of scanner reports (SARIF upload, artifact store).
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, run_id: RunId, job_id: &JobId, report: &ReportArtifact) -> Result<()>;
}
