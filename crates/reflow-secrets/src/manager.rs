//! Secret manager: ordered provider lookup with a TTL cache.

use crate::providers::SecretProvider;
use async_trait::async_trait;
use reflow_core::Result;
use reflow_core::ports::{SecretStore, SecretValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SecretManagerConfig {
    pub cache_ttl: Duration,
    /// Replace resolved values with `***` in [`SecretManager::mask_string`].
    pub mask_in_logs: bool,
}

impl Default for SecretManagerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            mask_in_logs: true,
        }
    }
}

struct CachedSecret {
    value: SecretValue,
    cached_at: Instant,
}

/// Resolves secrets from the first provider that has them.
pub struct SecretManager {
    config: SecretManagerConfig,
    providers: Vec<Arc<dyn SecretProvider>>,
    cache: RwLock<HashMap<String, CachedSecret>>,
}

impl SecretManager {
    pub fn new(config: SecretManagerConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider. Earlier providers take precedence.
    pub fn register_provider(&mut self, provider: Arc<dyn SecretProvider>) {
        info!(provider = %provider.name(), "Registering secret provider");
        self.providers.push(provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.register_provider(provider);
        self
    }

    pub async fn resolve(&self, name: &str) -> Result<Option<SecretValue>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(name)
                && cached.cached_at.elapsed() < self.config.cache_ttl
            {
                debug!(secret = %name, "Secret cache hit");
                return Ok(Some(cached.value.clone()));
            }
        }

        for provider in &self.providers {
            if let Some(value) = provider.get(name).await? {
                debug!(secret = %name, provider = %provider.name(), "Secret resolved");
                self.cache.write().await.insert(
                    name.to_string(),
                    CachedSecret {
                        value: value.clone(),
                        cached_at: Instant::now(),
                    },
                );
                return Ok(Some(value));
            }
        }

        debug!(secret = %name, "Secret not found in any provider");
        Ok(None)
    }

    /// Replace every cached secret value in `input` with `***`.
    pub async fn mask_string(&self, input: &str) -> String {
        if !self.config.mask_in_logs {
            return input.to_string();
        }

        let cache = self.cache.read().await;
        let mut output = input.to_string();
        for cached in cache.values() {
            let value = cached.value.expose();
            if value.len() > 3 {
                output = output.replace(value, "***");
            }
        }
        output
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
        info!("Secret cache cleared");
    }

    pub async fn cache_size(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl Default for SecretManager {
    fn default() -> Self {
        Self::new(SecretManagerConfig::default())
    }
}

#[async_trait]
impl SecretStore for SecretManager {
    async fn get_secret(&self, name: &str) -> Result<Option<SecretValue>> {
        self.resolve(name).await
    }

    async fn mask(&self, text: &str) -> String {
        self.mask_string(text).await
    }

    fn name(&self) -> &str {
        "secret-manager"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FileProvider;

    fn file(entries: &[(&str, &str)]) -> Arc<dyn SecretProvider> {
        Arc::new(FileProvider::from_map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let manager = SecretManager::default()
            .with_provider(file(&[("SONAR_TOKEN", "first")]))
            .with_provider(file(&[("SONAR_TOKEN", "second"), ("CFL_TOKEN", "cfl")]));

        let sonar = manager.resolve("SONAR_TOKEN").await.unwrap().unwrap();
        assert_eq!(sonar.expose(), "first");
        let cfl = manager.resolve("CFL_TOKEN").await.unwrap().unwrap();
        assert_eq!(cfl.expose(), "cfl");
        assert!(manager.resolve("PYPI_API_TOKEN").await.unwrap().is_none());
        assert_eq!(manager.cache_size().await, 2);
    }

    #[tokio::test]
    async fn test_empty_value_is_not_present() {
        let manager = SecretManager::default().with_provider(file(&[("CFL_TOKEN", "")]));

        assert!(manager.get_secret("CFL_TOKEN").await.unwrap().is_some());
        assert!(!manager.has_secret("CFL_TOKEN").await.unwrap());
        assert!(!manager.has_secret("MISSING").await.unwrap());
    }

    #[tokio::test]
    async fn test_mask_string() {
        let manager = SecretManager::default().with_provider(file(&[("PYPI_API_TOKEN", "pypi-AgEI")]));
        manager.resolve("PYPI_API_TOKEN").await.unwrap();

        let masked = manager.mask_string("twine upload -p pypi-AgEI").await;
        assert_eq!(masked, "twine upload -p ***");

        manager.clear_cache().await;
        assert_eq!(manager.cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_store_mask_hides_resolved_values() {
        let manager = SecretManager::default().with_provider(file(&[("SONAR_TOKEN", "squ_4f2a9")]));
        let store: &dyn SecretStore = &manager;

        assert_eq!(store.mask("token squ_4f2a9").await, "token squ_4f2a9");
        assert!(store.has_secret("SONAR_TOKEN").await.unwrap());
        assert_eq!(store.mask("token squ_4f2a9").await, "token ***");
    }
}
