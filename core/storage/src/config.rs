//! Driver configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cloudstorage_common::{Error, Result, Secret};

use crate::service::ObjectService;

/// Connection parameters for one provider account.
///
/// The meaning of `key` and `secret` is provider-specific: an access key
/// pair for S3 and Google Cloud Storage, an account name and key for Azure,
/// a username and API key for Cloud Files, and the root directory for the
/// local driver. Nothing here is ever persisted by the drivers.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Account identifier (access key, account name, username or root path).
    #[serde(default)]
    pub key: Option<String>,
    /// Account secret.
    #[serde(default)]
    pub secret: Option<Secret>,
    /// Provider region.
    #[serde(default)]
    pub region: Option<String>,
    /// Provider-specific options (`endpoint`, `account`, `temp_url_key`, ...).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Per-call timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Override for the provider's upload chunk size, in bytes.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Collaborator performing the provider's network calls.
    #[serde(skip)]
    service: Option<Arc<dyn ObjectService>>,
}

impl DriverConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    ///
    /// # Errors
    /// - Returns a `CloudStorage` error if the value does not describe a
    ///   configuration
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::cloud_with("Invalid driver configuration", e))
    }

    /// Set the account key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the account secret.
    pub fn with_secret(mut self, secret: impl Into<Secret>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set a provider-specific option.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Override the upload chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Attach the object service used for network calls.
    pub fn with_service(mut self, service: Arc<dyn ObjectService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Per-call timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Look up a provider-specific option.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Attached object service, if any.
    pub fn service(&self) -> Option<Arc<dyn ObjectService>> {
        self.service.clone()
    }

    /// Chunk size to use given the provider's default.
    pub(crate) fn chunk_size_or(&self, default: usize) -> usize {
        self.chunk_size.filter(|size| *size > 0).unwrap_or(default)
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("key", &self.key)
            .field("secret", &self.secret)
            .field("region", &self.region)
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("timeout_ms", &self.timeout_ms)
            .field("chunk_size", &self.chunk_size)
            .field("service", &self.service.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let config = DriverConfig::from_value(json!({
            "key": "AKIDEXAMPLE",
            "secret": "wJalrXUtnFEMI",
            "region": "eu-west-1",
            "options": { "endpoint": "http://localhost:9000" },
            "timeout_ms": 1500
        }))
        .unwrap();

        assert_eq!(config.key.as_deref(), Some("AKIDEXAMPLE"));
        assert_eq!(config.secret.as_ref().unwrap().expose(), "wJalrXUtnFEMI");
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.option("endpoint"), Some("http://localhost:9000"));
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert!(config.service().is_none());
    }

    #[test]
    fn test_from_value_rejects_garbage() {
        let err = DriverConfig::from_value(json!({ "key": 42 })).unwrap_err();
        assert!(err.to_string().contains("Invalid driver configuration"));
    }

    #[test]
    fn test_debug_hides_secret_and_option_values() {
        let config = DriverConfig::new()
            .with_secret("top-secret")
            .with_option("temp_url_key", "also-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("also-secret"));
        assert!(debug.contains("temp_url_key"));
    }

    #[test]
    fn test_chunk_size_override() {
        assert_eq!(DriverConfig::new().chunk_size_or(1024), 1024);
        assert_eq!(DriverConfig::new().with_chunk_size(8).chunk_size_or(1024), 8);
        assert_eq!(DriverConfig::new().with_chunk_size(0).chunk_size_or(1024), 1024);
    }
}
