//! Secret provider trait and implementations.

use async_trait::async_trait;
use reflow_core::ports::SecretValue;
use reflow_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// A source of secrets. A missing secret is `Ok(None)`.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>>;

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.get(name).await?.is_some())
    }

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Environment variable secret provider.
pub struct EnvProvider {
    prefix: Option<String>,
}

impl EnvProvider {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    fn resolve_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}_{name}"),
            None => name.to_string(),
        }
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SecretProvider for EnvProvider {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        Ok(std::env::var(self.resolve_name(name))
            .ok()
            .map(SecretValue::new))
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// File-based secret provider (local runs and tests).
pub struct FileProvider {
    secrets: HashMap<String, String>,
}

impl FileProvider {
    pub fn new() -> Self {
        Self {
            secrets: HashMap::new(),
        }
    }

    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    /// Load a flat `NAME: value` map from a YAML or JSON file.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let secrets: HashMap<String, String> = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Secret(format!("failed to parse {}: {e}", path.display()))
            })?
        };

        Ok(Self { secrets })
    }
}

impl Default for FileProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretProvider for FileProvider {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        Ok(self.secrets.get(name).map(SecretValue::new))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.secrets.contains_key(name))
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_env_provider_with_prefix() {
        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var("REFLOW_TEST_PROVIDER_TOKEN", "pypi-123") };
        let provider = EnvProvider::new(Some("REFLOW_TEST".into()));

        let value = provider.get("PROVIDER_TOKEN").await.unwrap().unwrap();
        assert_eq!(value.expose(), "pypi-123");
        assert!(provider.exists("PROVIDER_TOKEN").await.unwrap());
        assert!(provider.get("NONEXISTENT_TOKEN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_provider_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "SONAR_TOKEN: squ_abc\nCFL_TOKEN: ''").unwrap();

        let provider = FileProvider::load_from_file(file.path()).await.unwrap();
        assert_eq!(
            provider.get("SONAR_TOKEN").await.unwrap().unwrap().expose(),
            "squ_abc"
        );
        assert!(provider.exists("CFL_TOKEN").await.unwrap());
        assert!(!provider.exists("PYPI_API_TOKEN").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_provider_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"PYPI_API_TOKEN": "pypi-xyz"}}"#).unwrap();

        let provider = FileProvider::load_from_file(file.path()).await.unwrap();
        assert!(provider.exists("PYPI_API_TOKEN").await.unwrap());
        assert!(!provider.exists("SONAR_TOKEN").await.unwrap());
    }
}
