//! Reflow Core
//!
//! Core domain types, traits, and error handling for Reflow.
//! This crate has no async runtime dependency and defines the shared
//! vocabulary used by the scheduler, the secret providers and the CLI.

pub mod context;
pub mod error;
pub mod events;
pub mod ids;
pub mod params;
pub mod ports;
pub mod run;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
