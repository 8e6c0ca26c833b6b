//! Caller-facing driver handle.

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use cloudstorage_common::{Acl, DriverName, Error, ErrorKind, Result};

use crate::container::Container;
use crate::driver::Driver;

/// A driver bound to one provider account.
///
/// This is the entry point of the layer: containers are created, fetched,
/// listed and deleted here, and every [`Container`] and [`Blob`](crate::Blob)
/// obtained through it shares the same driver.
///
/// Names are validated against the provider's rules before the driver is
/// called. When a timeout is configured, every unary call is bounded by it;
/// listings are lazy and are not.
#[derive(Clone)]
pub struct Storage {
    driver: Arc<dyn Driver>,
    timeout: Option<Duration>,
}

impl Storage {
    /// Wrap a driver.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            timeout: None,
        }
    }

    /// Bound every unary call by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Provider identifier.
    pub fn name(&self) -> DriverName {
        self.driver.name()
    }

    /// Region the driver is bound to.
    pub fn region(&self) -> Option<&str> {
        self.driver.region()
    }

    /// Configured per-call timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Underlying driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Confirm the credentials are usable.
    ///
    /// # Errors
    /// - `Credentials` on rejection
    pub async fn validate_credentials(&self) -> Result<()> {
        self.call("validate_credentials", self.driver.validate_credentials())
            .await
    }

    /// Create a container, or return the existing one if its ACL is
    /// compatible.
    ///
    /// # Preconditions
    /// - `name` satisfies the provider's naming rules (checked before any
    ///   provider call)
    ///
    /// # Errors
    /// - `InvalidName` if the name is rejected locally
    /// - `Conflict` if the container exists with a different ACL
    pub async fn create_container(&self, name: &str, acl: Option<Acl>) -> Result<Container> {
        self.driver.validate_container_name(name)?;
        let info = self
            .call("create_container", self.driver.create_container(name, acl))
            .await?;
        info!(driver = %self.name(), container = %name, "Container ready");
        Ok(Container::new(info, self.clone()))
    }

    /// Fetch a container.
    ///
    /// # Errors
    /// - `InvalidName` if the name is rejected locally
    /// - `NotFound` if absent
    pub async fn get_container(&self, name: &str) -> Result<Container> {
        self.driver.validate_container_name(name)?;
        let info = self
            .call("get_container", self.driver.get_container(name))
            .await?;
        Ok(Container::new(info, self.clone()))
    }

    /// Whether a container exists.
    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        match self.get_container(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lazily list containers.
    ///
    /// The stream fetches provider pages as it is polled; calling this again
    /// restarts the listing from the beginning.
    pub fn list_containers(&self) -> BoxStream<'_, Result<Container>> {
        self.driver
            .list_containers()
            .map_ok(move |info| Container::new(info, self.clone()))
            .boxed()
    }

    /// Delete a container.
    ///
    /// With `cascade`, every blob is deleted first. Blobs that fail to delete
    /// are reported and the container is left in place.
    ///
    /// # Errors
    /// - `InvalidName` if the name is rejected locally
    /// - `NotFound` if absent
    /// - `NotEmpty` if blobs remain; after a cascade, the error lists the
    ///   blobs that could not be removed and carries the first failure
    pub async fn delete_container(&self, name: &str, cascade: bool) -> Result<()> {
        self.driver.validate_container_name(name)?;
        if cascade {
            self.purge(name).await?;
        }
        self.call("delete_container", self.driver.delete_container(name))
            .await?;
        info!(driver = %self.name(), container = %name, "Container deleted");
        Ok(())
    }

    async fn purge(&self, container: &str) -> Result<()> {
        let names: Vec<String> = self
            .driver
            .list_blobs(container, None)
            .map_ok(|blob| blob.name)
            .try_collect()
            .await?;
        debug!(container = %container, count = names.len(), "Cascading delete");

        let mut remaining = Vec::new();
        let mut first_error = None;
        for name in names {
            match self
                .call("delete_blob", self.driver.delete_blob(container, &name))
                .await
            {
                Ok(()) => {}
                // Removed by someone else in the meantime.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(container = %container, blob = %name, error = %e, "Cascade delete failed");
                    first_error.get_or_insert(e);
                    remaining.push(name);
                }
            }
        }

        if remaining.is_empty() {
            return Ok(());
        }
        Err(Error::NotEmpty {
            container: container.to_string(),
            remaining,
            source: first_error.map(Box::new),
        })
    }

    /// Await a driver call, bounded by the configured timeout.
    pub(crate) async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::timeout(operation, limit))?,
            None => fut.await,
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("driver", &self.driver.name())
            .field("region", &self.driver.region())
            .field("timeout", &self.timeout)
            .finish()
    }
}
