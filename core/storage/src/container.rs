//! Container handle.

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use cloudstorage_common::{Acl, Error, ErrorKind, Result};

use crate::blob::{guess_content_type, Blob, BlobSource, UploadOptions};
use crate::checksum;
use crate::signing::{validate_expiry, SignedUrl};
use crate::storage::Storage;

/// Container attributes as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name.
    pub name: String,
    /// Creation time, when the provider reports it.
    pub created_at: Option<DateTime<Utc>>,
    /// Access-control setting.
    pub acl: Acl,
    /// Public base URL when the container is served publicly.
    pub cdn_url: Option<String>,
}

impl ContainerInfo {
    /// Private container with no timestamp.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            acl: Acl::Private,
            cdn_url: None,
        }
    }
}

/// One namespace of blobs.
///
/// Holds a back-reference to its [`Storage`]; cloning is cheap.
#[derive(Debug, Clone)]
pub struct Container {
    info: ContainerInfo,
    storage: Storage,
}

impl Container {
    pub(crate) fn new(info: ContainerInfo, storage: Storage) -> Self {
        Self { info, storage }
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Attributes as last fetched.
    pub fn info(&self) -> &ContainerInfo {
        &self.info
    }

    /// Access-control setting.
    pub fn acl(&self) -> Acl {
        self.info.acl
    }

    /// Creation time.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.info.created_at
    }

    /// Owning storage handle.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Upload a blob, replacing any blob with the same name.
    ///
    /// # Preconditions
    /// - `name` satisfies the provider's blob naming rules
    /// - metadata fits the provider's limits
    ///
    /// # Postconditions
    /// - The returned blob's checksum is the lower-case hex MD5 of the content
    /// - If `options.checksum` was given and does not match, the uploaded blob
    ///   has been removed again
    ///
    /// # Errors
    /// - `InvalidName` for a name rejected locally
    /// - `NotFound` if the container no longer exists
    /// - `CloudStorage` on checksum mismatch or a malformed checksum
    pub async fn upload_blob(
        &self,
        name: &str,
        source: impl Into<BlobSource>,
        options: UploadOptions,
    ) -> Result<Blob> {
        let driver = self.storage.driver();
        driver.validate_blob_name(name)?;
        driver.validate_metadata(&options.metadata)?;
        let expected = options
            .checksum
            .as_deref()
            .map(checksum::normalize)
            .transpose()?;

        let mut options = options;
        if options.content_type.is_none() {
            options.content_type = Some(guess_content_type(name).to_string());
        }

        let source = source.into();
        debug!(container = %self.name(), blob = %name, source = ?source, "Uploading blob");
        let info = self
            .storage
            .call(
                "upload_blob",
                driver.upload_blob(self.name(), name, source, &options),
            )
            .await?;

        if let Some(expected) = expected {
            if info.checksum.as_deref() != Some(expected.as_str()) {
                warn!(
                    container = %self.name(),
                    blob = %name,
                    expected = %expected,
                    actual = ?info.checksum,
                    "Checksum mismatch, removing upload"
                );
                if let Err(e) = self
                    .storage
                    .call("delete_blob", driver.delete_blob(self.name(), name))
                    .await
                {
                    warn!(blob = %name, error = %e, "Failed to remove mismatched upload");
                }
                return Err(Error::cloud(format!(
                    "Checksum mismatch for '{}': expected {}, got {}",
                    name,
                    expected,
                    info.checksum.as_deref().unwrap_or("none")
                )));
            }
        }

        info!(container = %self.name(), blob = %name, size = info.size, "Blob uploaded");
        Ok(Blob::new(info, self.clone()))
    }

    /// Fetch a blob.
    ///
    /// # Errors
    /// - `InvalidName` for a name rejected locally
    /// - `NotFound` if absent
    pub async fn get_blob(&self, name: &str) -> Result<Blob> {
        let driver = self.storage.driver();
        driver.validate_blob_name(name)?;
        let info = self
            .storage
            .call("get_blob", driver.get_blob(self.name(), name))
            .await?;
        Ok(Blob::new(info, self.clone()))
    }

    /// Whether a blob exists.
    pub async fn blob_exists(&self, name: &str) -> Result<bool> {
        match self.get_blob(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lazily list blobs, optionally only those whose names start with
    /// `prefix`.
    ///
    /// Calling this again restarts the listing.
    pub fn list_blobs<'a>(&'a self, prefix: Option<&'a str>) -> BoxStream<'a, Result<Blob>> {
        self.storage
            .driver()
            .list_blobs(self.name(), prefix)
            .map_ok(move |info| Blob::new(info, self.clone()))
            .boxed()
    }

    /// Delete a blob.
    ///
    /// # Errors
    /// - `NotFound` if absent, on every provider
    pub async fn delete_blob(&self, name: &str) -> Result<()> {
        let driver = self.storage.driver();
        driver.validate_blob_name(name)?;
        self.storage
            .call("delete_blob", driver.delete_blob(self.name(), name))
            .await?;
        info!(container = %self.name(), blob = %name, "Blob deleted");
        Ok(())
    }

    /// Sign a URL a third party can upload `blob_name` to.
    ///
    /// `fields` are extra form fields (`Content-Type`, `x-amz-meta-*`, ...)
    /// the signature commits to.
    ///
    /// # Errors
    /// - `Unsupported` if the provider cannot sign URLs
    pub fn generate_upload_url(
        &self,
        blob_name: &str,
        expires_in: Duration,
        fields: Option<BTreeMap<String, String>>,
    ) -> Result<SignedUrl> {
        let driver = self.storage.driver();
        driver.validate_blob_name(blob_name)?;
        validate_expiry(expires_in, None)?;
        driver.generate_upload_url(&self.info, blob_name, expires_in, &fields.unwrap_or_default())
    }

    /// Public URL of a blob in this container.
    ///
    /// # Errors
    /// - `Unsupported` unless the container is publicly served
    pub fn cdn_url(&self, blob_name: &str) -> Result<String> {
        let driver = self.storage.driver();
        driver.validate_blob_name(blob_name)?;
        driver.cdn_url(&self.info, blob_name)
    }

    /// Serve the container publicly. Returns whether anything changed.
    pub async fn enable_cdn(&mut self) -> Result<bool> {
        self.set_cdn(true).await
    }

    /// Stop serving the container publicly. Returns whether anything changed.
    pub async fn disable_cdn(&mut self) -> Result<bool> {
        self.set_cdn(false).await
    }

    async fn set_cdn(&mut self, enabled: bool) -> Result<bool> {
        let driver = self.storage.driver();
        let before = self.info.clone();
        let after = match self
            .storage
            .call("set_container_cdn", driver.set_container_cdn(self.name(), enabled))
            .await
        {
            Ok(info) => info,
            Err(e) if e.kind() == ErrorKind::Unsupported => return Ok(false),
            Err(e) => return Err(e),
        };
        let changed = after.acl != before.acl || after.cdn_url != before.cdn_url;
        self.info = after;
        Ok(changed)
    }

    /// Delete this container.
    ///
    /// # Errors
    /// - Same as [`Storage::delete_container`]
    pub async fn delete(&self, cascade: bool) -> Result<()> {
        self.storage.delete_container(self.name(), cascade).await
    }

    /// Re-read the container's attributes.
    pub async fn refresh(&mut self) -> Result<()> {
        let driver = self.storage.driver();
        self.info = self
            .storage
            .call("get_container", driver.get_container(self.name()))
            .await?;
        Ok(())
    }
}
