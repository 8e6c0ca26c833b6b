//! Driver registry: resolves a provider identifier to its driver.
//!
//! The set of providers is closed ([`DriverName`]). Each provider sits behind
//! a cargo feature and a constructor function that only runs when that
//! provider is asked for, so resolving one never touches another's
//! dependencies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use cloudstorage_common::{DriverName, Error, Result};

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::storage::Storage;

/// Constructor building a driver from its configuration.
pub type DriverConstructor = fn(&DriverConfig) -> Result<Arc<dyn Driver>>;

/// Handle on one provider's driver implementation.
#[derive(Clone, Copy)]
pub struct DriverFactory {
    name: DriverName,
    type_name: &'static str,
    construct: DriverConstructor,
}

impl DriverFactory {
    pub fn new(name: DriverName, type_name: &'static str, construct: DriverConstructor) -> Self {
        Self {
            name,
            type_name,
            construct,
        }
    }

    /// Provider identifier.
    pub fn name(&self) -> DriverName {
        self.name
    }

    /// Name of the concrete driver type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Build a driver bound to the account described by `config`.
    ///
    /// # Postconditions
    /// - The returned handle applies `config.timeout_ms` to every call
    ///
    /// # Errors
    /// - Returns an error if the configuration is unusable for the provider
    pub fn connect(&self, config: DriverConfig) -> Result<Storage> {
        let timeout = config.timeout();
        let driver = (self.construct)(&config)?;
        debug!(driver = %self.name, implementation = self.type_name, "Driver connected");
        Ok(Storage::new(driver).with_timeout(timeout))
    }
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactory")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Registry of driver factories keyed by provider.
pub struct DriverRegistry {
    factories: HashMap<DriverName, DriverFactory>,
}

impl DriverRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a driver factory.
    ///
    /// # Errors
    /// - `Conflict` if the provider is already registered
    pub fn register(&mut self, factory: DriverFactory) -> Result<()> {
        if self.factories.contains_key(&factory.name) {
            return Err(Error::Conflict(format!(
                "Driver '{}' is already registered",
                factory.name
            )));
        }
        self.factories.insert(factory.name, factory);
        Ok(())
    }

    /// Look up the factory for `name`.
    ///
    /// # Errors
    /// - `CloudStorage` error naming the provider if it is not registered
    pub fn factory(&self, name: DriverName) -> Result<DriverFactory> {
        self.factories
            .get(&name)
            .copied()
            .ok_or_else(|| Error::cloud(format!("Driver '{}' is not registered", name)))
    }

    /// Resolve a provider and connect it with `config`.
    pub fn resolve(&self, name: DriverName, config: DriverConfig) -> Result<Storage> {
        self.factory(name)?.connect(config)
    }

    /// Registered providers, sorted.
    pub fn providers(&self) -> Vec<DriverName> {
        let mut names: Vec<DriverName> = self.factories.keys().copied().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: DriverName) -> bool {
        self.factories.contains_key(&name)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "local")]
fn connect_local(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(crate::local::LocalDriver::connect(config)?))
}

#[cfg(feature = "s3")]
fn connect_s3(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(crate::s3::S3Driver::connect(config)?))
}

#[cfg(feature = "azure")]
fn connect_azure(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(crate::azure::AzureDriver::connect(config)?))
}

#[cfg(feature = "google")]
fn connect_google(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(crate::google::GoogleStorageDriver::connect(config)?))
}

#[cfg(feature = "rackspace")]
fn connect_cloudfiles(config: &DriverConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(crate::rackspace::CloudFilesDriver::connect(config)?))
}

/// Factory for a built-in provider.
///
/// # Errors
/// - `CloudStorage` error naming the provider if its feature is disabled
pub fn get_driver(name: DriverName) -> Result<DriverFactory> {
    use std::any::type_name;

    match name {
        #[cfg(feature = "local")]
        DriverName::Local => Ok(DriverFactory::new(
            name,
            type_name::<crate::local::LocalDriver>(),
            connect_local,
        )),
        #[cfg(feature = "s3")]
        DriverName::S3 => Ok(DriverFactory::new(
            name,
            type_name::<crate::s3::S3Driver>(),
            connect_s3,
        )),
        #[cfg(feature = "azure")]
        DriverName::Azure => Ok(DriverFactory::new(
            name,
            type_name::<crate::azure::AzureDriver>(),
            connect_azure,
        )),
        #[cfg(feature = "google")]
        DriverName::GoogleStorage => Ok(DriverFactory::new(
            name,
            type_name::<crate::google::GoogleStorageDriver>(),
            connect_google,
        )),
        #[cfg(feature = "rackspace")]
        DriverName::CloudFiles => Ok(DriverFactory::new(
            name,
            type_name::<crate::rackspace::CloudFilesDriver>(),
            connect_cloudfiles,
        )),
        #[allow(unreachable_patterns)]
        other => Err(Error::cloud(format!(
            "Driver '{}' is not enabled in this build",
            other
        ))),
    }
}

/// Factory for a built-in provider given its identifier (`"S3"`, `"LOCAL"`, ...).
///
/// # Errors
/// - `CloudStorage` error naming the identifier if it is unknown
pub fn get_driver_by_name(name: &str) -> Result<DriverFactory> {
    get_driver(name.parse()?)
}

/// Create a registry with every provider enabled in this build.
pub fn create_default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    for name in DriverName::ALL {
        if let Ok(factory) = get_driver(name) {
            registry
                .register(factory)
                .expect("DriverName::ALL lists each provider once");
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudstorage_common::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_by_enum_and_string_agree() {
        for name in DriverName::ALL {
            let by_enum = get_driver(name).unwrap();
            let by_str = get_driver_by_name(name.as_str()).unwrap();
            assert_eq!(by_enum.name(), by_str.name());
            assert_eq!(by_enum.type_name(), by_str.type_name());
        }
        assert!(get_driver_by_name("LOCAL")
            .unwrap()
            .type_name()
            .ends_with("LocalDriver"));
    }

    #[test]
    fn test_unknown_name_is_named_in_error() {
        let err = get_driver_by_name("DROPBOX").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudStorage);
        assert!(err.to_string().contains("DROPBOX"));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(get_driver_by_name("s3").is_err());
    }

    #[test]
    fn test_default_registry_has_every_provider() {
        let registry = create_default_registry();
        assert_eq!(registry.providers(), DriverName::ALL.to_vec());
        assert!(registry.has_provider(DriverName::S3));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = DriverRegistry::new();
        registry.register(get_driver(DriverName::Local).unwrap()).unwrap();
        let err = registry
            .register(get_driver(DriverName::Local).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_resolve_unregistered_fails() {
        let registry = DriverRegistry::new();
        let err = registry
            .resolve(DriverName::S3, DriverConfig::new())
            .unwrap_err();
        assert!(err.to_string().contains("S3"));
    }

    #[test]
    fn test_resolve_applies_timeout() {
        let temp = TempDir::new().unwrap();
        let storage = create_default_registry()
            .resolve(
                DriverName::Local,
                DriverConfig::new()
                    .with_key(temp.path().to_string_lossy())
                    .with_timeout(std::time::Duration::from_millis(1500)),
            )
            .unwrap();
        assert_eq!(storage.name(), DriverName::Local);
        assert_eq!(storage.timeout(), Some(std::time::Duration::from_millis(1500)));
    }

    #[test]
    fn test_custom_factory() {
        fn refuse(_config: &DriverConfig) -> Result<Arc<dyn Driver>> {
            Err(Error::Credentials("refused".to_string()))
        }

        let mut registry = DriverRegistry::new();
        registry
            .register(DriverFactory::new(DriverName::S3, "Refusing", refuse))
            .unwrap();
        let err = registry
            .resolve(DriverName::S3, DriverConfig::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }
}
