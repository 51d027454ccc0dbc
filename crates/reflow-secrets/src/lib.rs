//! Secret providers and credential lookup for Reflow.

pub mod manager;
pub mod providers;

pub use manager::{SecretManager, SecretManagerConfig};
pub use providers::{EnvProvider, FileProvider, SecretProvider};
