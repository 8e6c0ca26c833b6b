//! Driver contract implemented by every storage provider.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use cloudstorage_common::{Acl, DriverName, Metadata, Result};

use crate::blob::{BlobInfo, BlobSource, UploadOptions};
use crate::container::ContainerInfo;
use crate::signing::SignedUrl;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// How a driver applies [`Driver::update_blob_metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataPolicy {
    /// The provider updates metadata without touching content.
    InPlace,
    /// The provider cannot; the driver transparently rewrites the object
    /// (server-side copy onto itself) with the new metadata.
    Rewrite,
}

/// Storage provider contract.
///
/// One implementation exists per provider. Implementations are bound to a
/// single account and translate every collaborator failure into the shared
/// error taxonomy before returning.
///
/// Drivers do not re-validate names: the [`Storage`](crate::Storage),
/// [`Container`](crate::Container) and [`Blob`](crate::Blob) handles call the
/// `validate_*` methods before any other operation, so invalid input never
/// reaches the provider.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Provider identifier.
    fn name(&self) -> DriverName;

    /// Region the driver is bound to, if the provider has regions.
    fn region(&self) -> Option<&str> {
        None
    }

    /// Check a container name against the provider's naming rules.
    ///
    /// # Errors
    /// - `InvalidName` describing the violated rule
    fn validate_container_name(&self, name: &str) -> Result<()>;

    /// Check a blob name against the provider's naming rules.
    ///
    /// # Errors
    /// - `InvalidName` describing the violated rule
    fn validate_blob_name(&self, name: &str) -> Result<()>;

    /// Check user metadata against the provider's limits.
    fn validate_metadata(&self, _metadata: &Metadata) -> Result<()> {
        Ok(())
    }

    /// How metadata updates are applied.
    fn metadata_policy(&self) -> MetadataPolicy;

    /// Confirm the credentials are usable with one lightweight call.
    ///
    /// # Errors
    /// - `Credentials` on rejection
    async fn validate_credentials(&self) -> Result<()>;

    /// Create a container.
    ///
    /// # Postconditions
    /// - Idempotent: an existing container with the same ACL (or when no ACL
    ///   is requested) is returned as is
    ///
    /// # Errors
    /// - `Conflict` if the container exists with a different ACL or the name
    ///   is taken by another account
    async fn create_container(&self, name: &str, acl: Option<Acl>) -> Result<ContainerInfo>;

    /// Fetch a container.
    ///
    /// # Errors
    /// - `NotFound` if absent
    async fn get_container(&self, name: &str) -> Result<ContainerInfo>;

    /// Lazily list containers, fetching pages as the stream is polled.
    fn list_containers(&self) -> BoxStream<'_, Result<ContainerInfo>>;

    /// Delete an empty container.
    ///
    /// # Errors
    /// - `NotFound` if absent
    /// - `NotEmpty` if it still holds blobs
    async fn delete_container(&self, name: &str) -> Result<()>;

    /// Make a container publicly served (`enabled`) or private again.
    ///
    /// Returns the container as it is afterwards.
    async fn set_container_cdn(&self, name: &str, enabled: bool) -> Result<ContainerInfo>;

    /// Store a blob, replacing any blob with the same name.
    ///
    /// Sources larger than the provider's chunk size are uploaded in parts.
    ///
    /// # Errors
    /// - `NotFound` if the container is absent
    async fn upload_blob(
        &self,
        container: &str,
        name: &str,
        source: BlobSource,
        options: &UploadOptions,
    ) -> Result<BlobInfo>;

    /// Fetch blob attributes.
    ///
    /// # Errors
    /// - `NotFound` if the container or blob is absent
    async fn get_blob(&self, container: &str, name: &str) -> Result<BlobInfo>;

    /// Lazily list blobs whose names start with `prefix`.
    fn list_blobs<'a>(
        &'a self,
        container: &'a str,
        prefix: Option<&'a str>,
    ) -> BoxStream<'a, Result<BlobInfo>>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - `NotFound` if the blob is absent
    async fn delete_blob(&self, container: &str, name: &str) -> Result<()>;

    /// Stream a blob's content.
    ///
    /// # Errors
    /// - `NotFound` if the blob is absent
    async fn download_blob(&self, container: &str, name: &str) -> Result<ByteStream>;

    /// Replace a blob's user metadata according to [`Self::metadata_policy`].
    async fn update_blob_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: &Metadata,
    ) -> Result<BlobInfo>;

    /// Sign a URL (and form fields) letting a third party upload `blob_name`.
    ///
    /// # Errors
    /// - `Unsupported` if the provider cannot sign URLs
    fn generate_upload_url(
        &self,
        container: &ContainerInfo,
        blob_name: &str,
        expires_in: Duration,
        fields: &BTreeMap<String, String>,
    ) -> Result<SignedUrl>;

    /// Sign a time-limited download URL.
    ///
    /// # Errors
    /// - `Unsupported` if the provider cannot sign URLs
    fn generate_download_url(
        &self,
        container: &ContainerInfo,
        blob_name: &str,
        expires_in: Duration,
    ) -> Result<String>;

    /// Public URL of a blob.
    ///
    /// # Errors
    /// - `Unsupported` unless the container is publicly readable
    fn cdn_url(&self, container: &ContainerInfo, blob_name: &str) -> Result<String>;
}
