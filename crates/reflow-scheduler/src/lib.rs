//! Workflow orchestration for Reflow.
//!
//! - [`condition`]: job gating (draft, scan mode, `if:`, credentials)
//! - [`matrix`]: tiered version/OS matrix selection
//! - [`concurrency`]: one active run per concurrency group
//! - [`dispatcher`]: planning and execution of runs
//! - [`report`]: run verdicts and summaries

pub mod concurrency;
pub mod condition;
pub mod dag;
pub mod dispatcher;
pub mod expr;
pub mod matrix;
pub mod report;
pub mod validation;

pub use concurrency::{Admission, ConcurrencyController, RunHandle, group_key};
pub use condition::{ConditionEvaluator, Decision, JobGate};
pub use dispatcher::{PlannedJob, RunPlan, WorkflowDispatcher};
pub use matrix::{MatrixCell, MatrixSelector};
pub use report::{JobSummary, ReportAggregator, RunResult, Verdict};
pub use validation::{CompiledWorkflow, WorkflowValidator};
