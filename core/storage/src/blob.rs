//! Blob handle, upload sources and upload options.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use cloudstorage_common::{Acl, Error, ErrorKind, Metadata, Result};

use crate::container::Container;
use crate::driver::ByteStream;
use crate::signing::validate_expiry;

/// Upper bound on the buffer [`Blob::read`] reserves up front.
const READ_PREALLOC_MAX: u64 = 8 * 1024 * 1024;

/// Blob attributes as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Name of the owning container.
    pub container: String,
    /// Blob name (key).
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Lower-case hex MD5 of the content.
    pub checksum: Option<String>,
    /// Raw provider ETag.
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    /// User-defined metadata.
    pub metadata: Metadata,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Content to upload.
pub enum BlobSource {
    /// In-memory content.
    Bytes(Bytes),
    /// A local file, streamed in chunks.
    Path(PathBuf),
    /// Any byte stream.
    Stream(ByteStream),
}

impl BlobSource {
    /// Upload from a local file.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        BlobSource::Path(path.into())
    }

    /// Upload from a byte stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        BlobSource::Stream(Box::pin(stream))
    }

    /// Collect the whole source into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            BlobSource::Bytes(bytes) => Ok(bytes),
            BlobSource::Path(path) => tokio::fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|e| Error::cloud_with(format!("Failed to read {}", path.display()), e)),
            BlobSource::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }
}

impl fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            BlobSource::Path(path) => write!(f, "Path({})", path.display()),
            BlobSource::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for BlobSource {
    fn from(value: Bytes) -> Self {
        BlobSource::Bytes(value)
    }
}

impl From<Vec<u8>> for BlobSource {
    fn from(value: Vec<u8>) -> Self {
        BlobSource::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for BlobSource {
    fn from(value: &[u8]) -> Self {
        BlobSource::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for BlobSource {
    fn from(value: &[u8; N]) -> Self {
        BlobSource::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<PathBuf> for BlobSource {
    fn from(value: PathBuf) -> Self {
        BlobSource::Path(value)
    }
}

impl From<&Path> for BlobSource {
    fn from(value: &Path) -> Self {
        BlobSource::Path(value.to_path_buf())
    }
}

impl From<ByteStream> for BlobSource {
    fn from(value: ByteStream) -> Self {
        BlobSource::Stream(value)
    }
}

/// Optional attributes of an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Content type; guessed from the blob name when absent.
    pub content_type: Option<String>,
    /// User-defined metadata.
    pub metadata: Metadata,
    /// Expected MD5 (hex or base64), verified after upload.
    pub checksum: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    /// Per-blob ACL, on providers that have one.
    pub acl: Option<Acl>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_content_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = Some(acl);
        self
    }
}

/// Content type for a blob name, by extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// One stored object.
///
/// Obtained from a [`Container`]. Once [`Blob::delete`] succeeds, every
/// further operation on this handle (and its clones) fails with `NotFound`.
#[derive(Debug, Clone)]
pub struct Blob {
    info: BlobInfo,
    container: Container,
    deleted: Arc<AtomicBool>,
}

impl Blob {
    pub(crate) fn new(info: BlobInfo, container: Container) -> Self {
        Self {
            info,
            container,
            deleted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Lower-case hex MD5 of the content.
    pub fn checksum(&self) -> Option<&str> {
        self.info.checksum.as_deref()
    }

    /// Raw provider ETag.
    pub fn etag(&self) -> Option<&str> {
        self.info.etag.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.info.content_type.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.info.metadata
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.info.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.info.modified_at
    }

    /// Attributes as last fetched.
    pub fn info(&self) -> &BlobInfo {
        &self.info
    }

    /// Owning container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    fn ensure_live(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(Error::NotFound(format!(
                "Blob '{}' in container '{}' was deleted",
                self.info.name, self.info.container
            )));
        }
        Ok(())
    }

    async fn open(&self) -> Result<ByteStream> {
        self.ensure_live()?;
        let storage = self.container.storage();
        storage
            .call(
                "download_blob",
                storage.driver().download_blob(self.container.name(), self.name()),
            )
            .await
    }

    /// Stream the content into `writer`. Returns the number of bytes written.
    ///
    /// # Errors
    /// - `NotFound` if the blob was deleted, here or concurrently
    /// - `CloudStorage` if writing to the sink fails
    pub async fn download<W>(&self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stream = self.open().await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| Error::cloud_with("Failed to write downloaded content", e))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| Error::cloud_with("Failed to write downloaded content", e))?;
        debug!(blob = %self.name(), bytes = written, "Blob downloaded");
        Ok(written)
    }

    /// Download into a local file, replacing it. A partial file is removed
    /// on failure.
    pub async fn download_to_path(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::cloud_with(format!("Failed to create {}", path.display()), e))?;
        match self.download(&mut file).await {
            Ok(written) => Ok(written),
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), error = %cleanup, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Whole content in memory.
    pub async fn read(&self) -> Result<Bytes> {
        let mut stream = self.open().await?;
        // The reported size is a hint; the stream decides the length.
        let mut buffer = BytesMut::with_capacity(self.info.size.min(READ_PREALLOC_MAX) as usize);
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Delete the blob.
    ///
    /// # Postconditions
    /// - Every further operation on this handle fails with `NotFound`
    pub async fn delete(&self) -> Result<()> {
        self.ensure_live()?;
        self.container.delete_blob(self.name()).await?;
        self.deleted.store(true, Ordering::Release);
        Ok(())
    }

    /// Sign a time-limited download URL.
    ///
    /// # Errors
    /// - `Unsupported` if the provider cannot sign URLs
    pub fn generate_download_url(&self, expires_in: Duration) -> Result<String> {
        self.ensure_live()?;
        validate_expiry(expires_in, None)?;
        self.container.storage().driver().generate_download_url(
            self.container.info(),
            self.name(),
            expires_in,
        )
    }

    /// Public URL, if the container is publicly served.
    pub fn cdn_url(&self) -> Result<String> {
        self.ensure_live()?;
        self.container.cdn_url(self.name())
    }

    /// Replace the user-defined metadata.
    ///
    /// Providers without in-place metadata updates rewrite the object
    /// server-side; content and checksum are preserved either way.
    ///
    /// # Errors
    /// - `NotFound` if the blob was deleted
    /// - `CloudStorage` if the metadata exceeds the provider's limits
    pub async fn set_metadata(&mut self, metadata: Metadata) -> Result<()> {
        self.ensure_live()?;
        let storage = self.container.storage();
        let driver = storage.driver();
        driver.validate_metadata(&metadata)?;
        self.info = storage
            .call(
                "update_blob_metadata",
                driver.update_blob_metadata(self.container.name(), self.name(), &metadata),
            )
            .await?;
        info!(blob = %self.name(), policy = ?driver.metadata_policy(), "Blob metadata updated");
        Ok(())
    }

    /// Re-read the blob's attributes. A blob found missing is marked deleted.
    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure_live()?;
        let storage = self.container.storage();
        match storage
            .call(
                "get_blob",
                storage.driver().get_blob(self.container.name(), self.name()),
            )
            .await
        {
            Ok(info) => {
                self.info = info;
                Ok(())
            }
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    self.deleted.store(true, Ordering::Release);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md5_hex;
    use crate::memory::{Dialect, MemoryService};
    use crate::registry::get_driver;
    use crate::DriverConfig;
    use cloudstorage_common::DriverName;
    use futures::stream;
    use tempfile::TempDir;

    async fn uploaded(dialect: Dialect, driver: DriverName) -> Blob {
        let storage = get_driver(driver)
            .unwrap()
            .connect(
                DriverConfig::new()
                    .with_key("account")
                    .with_secret("c2VjcmV0LWtleS1mb3ItdGVzdHM=")
                    .with_option("account", "MossoCloudFS_test")
                    .with_option("temp_url_key", "tempkey")
                    .with_service(Arc::new(MemoryService::new(dialect))),
            )
            .unwrap();
        let container = storage.create_container("reports", None).await.unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("owner".into(), "finance".into());
        container
            .upload_blob(
                "report.csv",
                &b"a,b,c"[..],
                UploadOptions::new().with_metadata(metadata),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("report.csv"), "text/csv");
        assert_eq!(guess_content_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("archive.tar.gz"), "application/gzip");
        assert_eq!(guess_content_type("README"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_source_into_bytes() {
        let chunks = vec![Ok(Bytes::from_static(b"a,")), Ok(Bytes::from_static(b"b,c"))];
        let source = BlobSource::stream(stream::iter(chunks));
        assert_eq!(source.into_bytes().await.unwrap().as_ref(), b"a,b,c");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.csv");
        tokio::fs::write(&path, b"a,b,c").await.unwrap();
        let source = BlobSource::from(path.as_path());
        assert_eq!(source.into_bytes().await.unwrap().as_ref(), b"a,b,c");
    }

    #[tokio::test]
    async fn test_download_round_trip() {
        let blob = uploaded(Dialect::S3, DriverName::S3).await;
        let mut sink = Vec::new();
        let written = blob.download(&mut sink).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(sink, b"a,b,c");
        assert_eq!(md5_hex(&sink), blob.checksum().unwrap());
    }

    #[tokio::test]
    async fn test_read_ignores_inflated_size() {
        let mut blob = uploaded(Dialect::CloudFiles, DriverName::CloudFiles).await;
        blob.info.size = u64::MAX;
        assert_eq!(blob.read().await.unwrap().as_ref(), b"a,b,c");
    }

    #[tokio::test]
    async fn test_download_to_path() {
        let blob = uploaded(Dialect::Google, DriverName::GoogleStorage).await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        assert_eq!(blob.download_to_path(&path).await.unwrap(), 5);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"a,b,c");
    }

    #[tokio::test]
    async fn test_operations_after_delete_fail_not_found() {
        let blob = uploaded(Dialect::Azure, DriverName::Azure).await;
        let clone = blob.clone();
        blob.delete().await.unwrap();

        assert_eq!(blob.delete().await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(clone.read().await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            clone
                .generate_download_url(Duration::from_secs(60))
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_concurrent_delete_surfaces_not_found() {
        let blob = uploaded(Dialect::CloudFiles, DriverName::CloudFiles).await;
        blob.container().delete_blob("report.csv").await.unwrap();
        let mut sink = Vec::new();
        let err = blob.download(&mut sink).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_set_metadata_preserves_content() {
        for (dialect, driver) in [
            (Dialect::S3, DriverName::S3),
            (Dialect::Azure, DriverName::Azure),
            (Dialect::Google, DriverName::GoogleStorage),
            (Dialect::CloudFiles, DriverName::CloudFiles),
        ] {
            let mut blob = uploaded(dialect, driver).await;
            let checksum = blob.checksum().map(str::to_string);

            let mut metadata = Metadata::new();
            metadata.insert("owner".into(), "legal".into());
            blob.set_metadata(metadata.clone()).await.unwrap();
            assert_eq!(blob.metadata(), &metadata, "{}", driver);

            blob.refresh().await.unwrap();
            assert_eq!(blob.metadata(), &metadata, "{}", driver);
            assert_eq!(blob.checksum().map(str::to_string), checksum, "{}", driver);
            assert_eq!(blob.read().await.unwrap().as_ref(), b"a,b,c", "{}", driver);
        }
    }

    #[tokio::test]
    async fn test_download_url_is_signed() {
        let blob = uploaded(Dialect::S3, DriverName::S3).await;
        let url = blob.generate_download_url(Duration::from_secs(300)).unwrap();
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("report.csv"));
    }

    #[tokio::test]
    async fn test_refresh_marks_missing_blob_deleted() {
        let mut blob = uploaded(Dialect::S3, DriverName::S3).await;
        blob.container().delete_blob("report.csv").await.unwrap();
        assert_eq!(blob.refresh().await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(blob.cdn_url().unwrap_err().kind(), ErrorKind::NotFound);
    }
}
