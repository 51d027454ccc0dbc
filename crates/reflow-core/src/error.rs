//! Error types for Reflow.
//!
//! Gating skips, job failures and cancellations are job statuses, not errors.
//! Everything here either rejects a run before any job executes (the
//! configuration family) or reports an infrastructure problem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Invalid predicate on job {job}: {message}")]
    InvalidPredicate { job: String, message: String },

    #[error("Job {0} expands over a matrix but the workflow declares none")]
    EmptyMatrix(String),

    #[error("Job {job} needs unknown job {dependency}")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in job dependencies")]
    CycleDetected,

    #[error("Invalid value for parameter {name}: expected {expected}, got {actual}")]
    InvalidInput {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown parameter: {0}")]
    UnknownInput(String),

    #[error("Missing required parameter: {0}")]
    MissingInput(String),

    #[error("Job {job} requires secret {secret}, which is not configured")]
    CredentialAbsent { job: String, secret: String },

    // Run errors
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Concurrency group {group} already has active run {active}")]
    ConcurrencyConflict { group: String, active: String },

    #[error("Outcome for job {0} is already recorded")]
    OutcomeAlreadyRecorded(String),

    // Collaborator errors
    #[error("Job runner error: {0}")]
    Runner(String),

    #[error("Report sink error: {0}")]
    ReportSink(String),

    #[error("Secret provider error: {0}")]
    Secret(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error belongs to the configuration family, which is
    /// raised before any job runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidWorkflow(_)
                | Error::InvalidPredicate { .. }
                | Error::EmptyMatrix(_)
                | Error::UnknownDependency { .. }
                | Error::CycleDetected
                | Error::InvalidInput { .. }
                | Error::UnknownInput(_)
                | Error::MissingInput(_)
                | Error::CredentialAbsent { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_family() {
        assert!(Error::CycleDetected.is_configuration());
        assert!(
            Error::CredentialAbsent {
                job: "publish".into(),
                secret: "PYPI_TOKEN".into()
            }
            .is_configuration()
        );
        assert!(!Error::Runner("boom".into()).is_configuration());
        assert!(!Error::OutcomeAlreadyRecorded("lint".into()).is_configuration());
    }
}
