//! Integration test infrastructure for Reflow.
//!
//! Provides workflow fixtures and scripted stand-ins for the external
//! collaborators (job runner, report sink, event bus) so that whole runs can
//! be dispatched in-process.
//!
//! # Usage
//!
//! ```ignore
//! use reflow_tests::{MockRunner, WorkflowFixture, harness};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let runner = MockRunner::new().fail("lint");
//!     let (dispatcher, _) = harness(runner, &[]);
//!     let result = dispatcher.dispatch(&WorkflowFixture::python_ci(), ctx).await?;
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,reflow_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
