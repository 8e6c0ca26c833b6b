//! Generic driver over an object service.
//!
//! S3, Azure, Google Cloud Storage and Cloud Files all expose the same
//! primitive bucket/object operations. [`ObjectDriver`] implements the
//! [`Driver`] contract once on top of an [`ObjectService`]; each provider
//! contributes only a [`CloudProvider`]: its naming rules, error
//! translation, checksum format, ACL vocabulary and URL signing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use cloudstorage_common::{Acl, DriverName, Error, ErrorKind, Metadata, Result};

use crate::blob::{BlobInfo, BlobSource, UploadOptions};
use crate::checksum::md5_base64;
use crate::chunk::ChunkReader;
use crate::config::DriverConfig;
use crate::container::ContainerInfo;
use crate::driver::{ByteStream, Driver, MetadataPolicy};
use crate::service::{
    BucketInfo, CompletedPart, ObjectInfo, ObjectService, PutOptions, ServiceError,
};
use crate::signing::{encode_path, SignedUrl};

/// How a provider publishes containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdnMode {
    /// Public-read containers are served from their public URL.
    Acl,
    /// A separate CDN is switched on per container.
    Toggle,
}

/// Provider-specific half of an [`ObjectDriver`].
///
/// Everything here is pure; network calls go through the service.
pub trait CloudProvider: Send + Sync + 'static {
    fn name(&self) -> DriverName;

    fn region(&self) -> Option<&str> {
        None
    }

    fn validate_container_name(&self, name: &str) -> Result<()>;

    fn validate_blob_name(&self, name: &str) -> Result<()>;

    fn validate_metadata(&self, metadata: &Metadata) -> Result<()>;

    /// Part size for multipart uploads.
    fn default_chunk_size(&self) -> usize;

    fn metadata_policy(&self) -> MetadataPolicy {
        MetadataPolicy::InPlace
    }

    /// Whether deleting a missing object fails on its own. When it does not,
    /// the driver checks existence first.
    fn delete_reports_missing(&self) -> bool {
        true
    }

    /// Map a service failure onto the error taxonomy.
    fn translate(&self, err: ServiceError) -> Error {
        translate_status(err)
    }

    /// Lower-case hex MD5 of the content, if the provider's attributes
    /// carry one.
    fn checksum(&self, object: &ObjectInfo) -> Option<String>;

    /// Native ACL value for `acl`.
    ///
    /// # Errors
    /// - `Unsupported` if the provider has no equivalent
    fn acl_value(&self, acl: Acl) -> Result<&'static str>;

    /// Parse a native ACL value; absent means private.
    fn parse_acl(&self, value: Option<&str>) -> Acl;

    fn cdn_mode(&self) -> CdnMode {
        CdnMode::Acl
    }

    /// Base URL anonymous readers fetch a public container's blobs from.
    fn public_url(&self, container: &str) -> String;

    /// Sign an upload URL.
    fn sign_upload(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl>;

    /// Sign a download URL.
    fn sign_download(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String>;
}

/// Default status-code translation shared by the cloud providers.
pub fn translate_status(err: ServiceError) -> Error {
    if err.timed_out {
        return Error::cloud_with("Provider call timed out", err);
    }
    match err.status {
        Some(401) | Some(403) => Error::Credentials(err.message),
        Some(404) => Error::NotFound(err.message),
        Some(409) | Some(412) => Error::Conflict(err.message),
        Some(501) => Error::Unsupported(err.message),
        _ => Error::cloud_with(err.message.clone(), err),
    }
}

/// A [`Driver`] for an object-storage provider.
pub struct ObjectDriver<P> {
    provider: Arc<P>,
    service: Option<Arc<dyn ObjectService>>,
    chunk_size: usize,
}

impl<P: CloudProvider> ObjectDriver<P> {
    /// Bind `provider` to the service and chunk size of `config`.
    pub fn new(provider: P, config: &DriverConfig) -> Self {
        let chunk_size = config.chunk_size_or(provider.default_chunk_size());
        Self {
            provider: Arc::new(provider),
            service: config.service(),
            chunk_size,
        }
    }

    /// Provider half.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Upload part size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn service(&self) -> Result<&dyn ObjectService> {
        self.service.as_deref().ok_or_else(|| {
            Error::cloud(format!(
                "{} driver has no object service attached",
                self.provider.name()
            ))
        })
    }

    fn translate(&self, err: ServiceError) -> Error {
        self.provider.translate(err)
    }

    fn container_info(&self, bucket: BucketInfo) -> ContainerInfo {
        let acl = self.provider.parse_acl(bucket.acl.as_deref());
        let cdn_url = match self.provider.cdn_mode() {
            CdnMode::Acl => acl.is_public().then(|| self.provider.public_url(&bucket.name)),
            CdnMode::Toggle => bucket.cdn_uri.filter(|_| bucket.cdn_enabled),
        };
        ContainerInfo {
            name: bucket.name,
            created_at: bucket.created_at,
            acl,
            cdn_url,
        }
    }

    fn blob_info(&self, container: &str, object: ObjectInfo) -> BlobInfo {
        let checksum = self.provider.checksum(&object);
        BlobInfo {
            container: container.to_string(),
            name: object.key,
            size: object.size,
            checksum,
            etag: object.etag,
            content_type: object.content_type,
            content_disposition: object.content_disposition,
            cache_control: object.cache_control,
            metadata: object.metadata,
            created_at: object.created_at,
            modified_at: object.modified_at,
        }
    }

    async fn create_bucket(&self, name: &str, acl: Option<Acl>) -> Result<ContainerInfo> {
        let service = self.service()?;
        let native = acl.map(|acl| self.provider.acl_value(acl)).transpose()?;
        let bucket = service
            .create_bucket(name, native, self.provider.region())
            .await
            .map_err(|e| self.translate(e))?;
        debug!(driver = %self.provider.name(), container = %name, "Container created");
        Ok(self.container_info(bucket))
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_parts(
        &self,
        service: &dyn ObjectService,
        container: &str,
        name: &str,
        upload_id: &str,
        first: Bytes,
        second: Bytes,
        reader: &mut ChunkReader,
    ) -> Result<ObjectInfo> {
        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut lookahead = Some(second);
        let mut next = Some(first);
        while let Some(chunk) = next {
            let number = parts.len() as u32 + 1;
            let part = service
                .upload_part(container, name, upload_id, number, chunk)
                .await
                .map_err(|e| self.translate(e))?;
            parts.push(part);
            next = match lookahead.take() {
                Some(chunk) => Some(chunk),
                None => reader.next_chunk().await?,
            };
        }
        debug!(blob = %name, parts = parts.len(), "Completing multipart upload");
        service
            .complete_multipart(container, name, upload_id, &parts)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn bucket_page(
        &self,
        marker: Option<String>,
    ) -> Result<(Vec<Result<ContainerInfo>>, Option<String>)> {
        let page = self
            .service()?
            .list_buckets(marker.as_deref())
            .await
            .map_err(|e| self.translate(e))?;
        let items = page
            .items
            .into_iter()
            .map(|bucket| Ok(self.container_info(bucket)))
            .collect();
        Ok((items, page.next_marker))
    }

    async fn object_page(
        &self,
        container: &str,
        prefix: Option<&str>,
        marker: Option<String>,
    ) -> Result<(Vec<Result<BlobInfo>>, Option<String>)> {
        let page = self
            .service()?
            .list_objects(container, prefix, marker.as_deref())
            .await
            .map_err(|e| self.translate(e))?;
        let items = page
            .items
            .into_iter()
            .map(|object| Ok(self.blob_info(container, object)))
            .collect();
        Ok((items, page.next_marker))
    }
}

#[async_trait]
impl<P: CloudProvider> Driver for ObjectDriver<P> {
    fn name(&self) -> DriverName {
        self.provider.name()
    }

    fn region(&self) -> Option<&str> {
        self.provider.region()
    }

    fn validate_container_name(&self, name: &str) -> Result<()> {
        self.provider.validate_container_name(name)
    }

    fn validate_blob_name(&self, name: &str) -> Result<()> {
        self.provider.validate_blob_name(name)
    }

    fn validate_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.provider.validate_metadata(metadata)
    }

    fn metadata_policy(&self) -> MetadataPolicy {
        self.provider.metadata_policy()
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.service()?
            .list_buckets(None)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(())
    }

    async fn create_container(&self, name: &str, acl: Option<Acl>) -> Result<ContainerInfo> {
        let existing = match self.service()?.head_bucket(name).await {
            Ok(bucket) => bucket,
            Err(e) => {
                let err = self.translate(e);
                if err.kind() != ErrorKind::NotFound {
                    return Err(err);
                }
                return self.create_bucket(name, acl).await;
            }
        };

        let info = self.container_info(existing);
        match acl {
            Some(requested) if requested != info.acl => Err(Error::Conflict(format!(
                "Container '{}' already exists with ACL {}",
                name, info.acl
            ))),
            _ => Ok(info),
        }
    }

    async fn get_container(&self, name: &str) -> Result<ContainerInfo> {
        let bucket = self
            .service()?
            .head_bucket(name)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(self.container_info(bucket))
    }

    fn list_containers(&self) -> BoxStream<'_, Result<ContainerInfo>> {
        // State: `None` once the last page was fetched, otherwise the marker
        // of the next page.
        stream::try_unfold(Some(None), move |state: Option<Option<String>>| async move {
            match state {
                None => Ok(None),
                Some(marker) => self.bucket_page(marker).await.map(|(items, next)| {
                    Some((stream::iter(items), next.map(Some)))
                }),
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        let service = self.service()?;
        let first = service
            .list_objects(name, None, None)
            .await
            .map_err(|e| self.translate(e))?;
        if !first.items.is_empty() {
            return Err(Error::not_empty(name));
        }
        service.delete_bucket(name).await.map_err(|e| {
            match self.translate(e) {
                // Objects appeared between the listing and the delete.
                err if err.kind() == ErrorKind::Conflict => Error::not_empty(name),
                err => err,
            }
        })
    }

    async fn set_container_cdn(&self, name: &str, enabled: bool) -> Result<ContainerInfo> {
        let service = self.service()?;
        let bucket = match self.provider.cdn_mode() {
            CdnMode::Acl => {
                let acl = if enabled { Acl::PublicRead } else { Acl::Private };
                service
                    .set_bucket_acl(name, self.provider.acl_value(acl)?)
                    .await
            }
            CdnMode::Toggle => service.set_bucket_cdn(name, enabled).await,
        }
        .map_err(|e| self.translate(e))?;
        Ok(self.container_info(bucket))
    }

    async fn upload_blob(
        &self,
        container: &str,
        name: &str,
        source: BlobSource,
        options: &UploadOptions,
    ) -> Result<BlobInfo> {
        let service = self.service()?;
        let mut put = PutOptions {
            content_type: options.content_type.clone(),
            content_disposition: options.content_disposition.clone(),
            cache_control: options.cache_control.clone(),
            metadata: options.metadata.clone(),
            acl: options
                .acl
                .map(|acl| self.provider.acl_value(acl))
                .transpose()?
                .map(str::to_string),
            content_md5: None,
        };

        let mut reader = ChunkReader::open(source, self.chunk_size).await?;
        let first = reader.next_chunk().await?.unwrap_or_default();
        let second = if first.len() == self.chunk_size {
            reader.next_chunk().await?
        } else {
            None
        };

        let object = match second {
            None => {
                put.content_md5 = Some(md5_base64(&first));
                service
                    .put_object(container, name, first, &put)
                    .await
                    .map_err(|e| self.translate(e))?
            }
            Some(second) => {
                let upload_id = service
                    .create_multipart(container, name, &put)
                    .await
                    .map_err(|e| self.translate(e))?;
                let result = self
                    .upload_parts(service, container, name, &upload_id, first, second, &mut reader)
                    .await;
                match result {
                    Ok(object) => object,
                    Err(err) => {
                        warn!(blob = %name, error = %err, "Multipart upload failed, aborting");
                        if let Err(abort) = service.abort_multipart(container, name, &upload_id).await {
                            warn!(blob = %name, error = %abort, "Failed to abort multipart upload");
                        }
                        return Err(err);
                    }
                }
            }
        };

        let mut blob = self.blob_info(container, object);
        if blob.checksum.is_none() {
            blob.checksum = Some(reader.hex_digest());
        }
        debug!(blob = %name, bytes = reader.len(), "Upload complete");
        Ok(blob)
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<BlobInfo> {
        let object = self
            .service()?
            .head_object(container, name)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(self.blob_info(container, object))
    }

    fn list_blobs<'a>(
        &'a self,
        container: &'a str,
        prefix: Option<&'a str>,
    ) -> BoxStream<'a, Result<BlobInfo>> {
        stream::try_unfold(Some(None), move |state: Option<Option<String>>| async move {
            match state {
                None => Ok(None),
                Some(marker) => self
                    .object_page(container, prefix, marker)
                    .await
                    .map(|(items, next)| Some((stream::iter(items), next.map(Some)))),
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<()> {
        let service = self.service()?;
        if !self.provider.delete_reports_missing() {
            service
                .head_object(container, name)
                .await
                .map_err(|e| self.translate(e))?;
        }
        service
            .delete_object(container, name)
            .await
            .map_err(|e| self.translate(e))
    }

    async fn download_blob(&self, container: &str, name: &str) -> Result<ByteStream> {
        let stream = self
            .service()?
            .get_object(container, name)
            .await
            .map_err(|e| self.translate(e))?;
        let provider = Arc::clone(&self.provider);
        Ok(stream.map_err(move |e| provider.translate(e)).boxed())
    }

    async fn update_blob_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: &Metadata,
    ) -> Result<BlobInfo> {
        let service = self.service()?;
        let object = match self.provider.metadata_policy() {
            MetadataPolicy::InPlace => service.set_object_metadata(container, name, metadata).await,
            MetadataPolicy::Rewrite => {
                let current = service
                    .head_object(container, name)
                    .await
                    .map_err(|e| self.translate(e))?;
                let replace = PutOptions {
                    content_type: current.content_type,
                    content_disposition: current.content_disposition,
                    cache_control: current.cache_control,
                    metadata: metadata.clone(),
                    acl: None,
                    content_md5: None,
                };
                service.copy_object(container, name, name, Some(&replace)).await
            }
        }
        .map_err(|e| self.translate(e))?;
        Ok(self.blob_info(container, object))
    }

    fn generate_upload_url(
        &self,
        container: &ContainerInfo,
        blob_name: &str,
        expires_in: Duration,
        fields: &BTreeMap<String, String>,
    ) -> Result<SignedUrl> {
        self.provider
            .sign_upload(&container.name, blob_name, expires_in, fields, Utc::now())
    }

    fn generate_download_url(
        &self,
        container: &ContainerInfo,
        blob_name: &str,
        expires_in: Duration,
    ) -> Result<String> {
        self.provider
            .sign_download(&container.name, blob_name, expires_in, Utc::now())
    }

    fn cdn_url(&self, container: &ContainerInfo, blob_name: &str) -> Result<String> {
        match &container.cdn_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                encode_path(blob_name)
            )),
            None => Err(Error::Unsupported(format!(
                "Container '{}' is not publicly served",
                container.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{etag_to_hex, md5_hex};
    use crate::memory::{Dialect, MemoryService};
    use crate::naming;
    use futures::TryStreamExt;

    struct Plain;

    impl CloudProvider for Plain {
        fn name(&self) -> DriverName {
            DriverName::S3
        }

        fn validate_container_name(&self, name: &str) -> Result<()> {
            naming::s3_bucket(name)
        }

        fn validate_blob_name(&self, name: &str) -> Result<()> {
            naming::object_key(name)
        }

        fn validate_metadata(&self, _metadata: &Metadata) -> Result<()> {
            Ok(())
        }

        fn default_chunk_size(&self) -> usize {
            4
        }

        fn delete_reports_missing(&self) -> bool {
            false
        }

        fn checksum(&self, object: &ObjectInfo) -> Option<String> {
            object.etag.as_deref().and_then(etag_to_hex)
        }

        fn acl_value(&self, acl: Acl) -> Result<&'static str> {
            Ok(match acl {
                Acl::Private => "private",
                Acl::PublicRead => "public-read",
                Acl::PublicReadWrite => "public-read-write",
            })
        }

        fn parse_acl(&self, value: Option<&str>) -> Acl {
            value.and_then(|v| v.parse().ok()).unwrap_or_default()
        }

        fn public_url(&self, container: &str) -> String {
            format!("https://{}.example.com", container)
        }

        fn sign_upload(
            &self,
            _container: &str,
            _blob: &str,
            _expires_in: Duration,
            _fields: &BTreeMap<String, String>,
            _now: DateTime<Utc>,
        ) -> Result<SignedUrl> {
            Err(Error::Unsupported("signing".into()))
        }

        fn sign_download(
            &self,
            _container: &str,
            _blob: &str,
            _expires_in: Duration,
            _now: DateTime<Utc>,
        ) -> Result<String> {
            Err(Error::Unsupported("signing".into()))
        }
    }

    fn driver() -> (ObjectDriver<Plain>, Arc<MemoryService>) {
        let service = Arc::new(MemoryService::new(Dialect::S3));
        let config = DriverConfig::new().with_service(service.clone());
        (ObjectDriver::new(Plain, &config), service)
    }

    #[tokio::test]
    async fn test_missing_service_is_cloud_error() {
        let driver = ObjectDriver::new(Plain, &DriverConfig::new());
        let err = driver.get_container("reports").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudStorage);
        assert!(err.to_string().contains("no object service attached"));
    }

    #[tokio::test]
    async fn test_exact_chunk_is_single_put() {
        let (driver, service) = driver();
        driver.create_container("reports", None).await.unwrap();
        let blob = driver
            .upload_blob("reports", "four", BlobSource::from(b"abcd"), &UploadOptions::new())
            .await
            .unwrap();
        assert_eq!(blob.checksum, Some(md5_hex(b"abcd")));
        assert!(!blob.etag.unwrap().contains('-'));
        assert_eq!(service.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_multipart_checksum_falls_back_to_local_digest() {
        let (driver, service) = driver();
        driver.create_container("reports", None).await.unwrap();
        let blob = driver
            .upload_blob("reports", "nine", BlobSource::from(b"abcdefghi"), &UploadOptions::new())
            .await
            .unwrap();
        assert!(blob.etag.as_deref().unwrap().ends_with("-3\""));
        assert_eq!(blob.checksum, Some(md5_hex(b"abcdefghi")));
        assert_eq!(blob.size, 9);
        assert_eq!(
            service.object_data("reports", "nine").unwrap().as_ref(),
            b"abcdefghi"
        );
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let (driver, service) = driver();
        driver.create_container("reports", None).await.unwrap();
        service.fail_part_uploads(true);
        let err = driver
            .upload_blob("reports", "nine", BlobSource::from(b"abcdefghi"), &UploadOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudStorage);
        assert_eq!(service.open_uploads(), 0);
        assert!(service.object_data("reports", "nine").is_none());
    }

    #[tokio::test]
    async fn test_upload_to_missing_container() {
        let (driver, _) = driver();
        let err = driver
            .upload_blob("missing", "a", BlobSource::from(b"a"), &UploadOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_head_before_delete_when_provider_is_silent() {
        let (driver, _) = driver();
        driver.create_container("reports", None).await.unwrap();
        let err = driver.delete_blob("reports", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_listing_spans_pages() {
        let (driver, service) = driver();
        service.set_page_size(3);
        driver.create_container("reports", None).await.unwrap();
        for i in 0..7 {
            driver
                .upload_blob(
                    "reports",
                    &format!("blob-{}", i),
                    BlobSource::from(b"x"),
                    &UploadOptions::new(),
                )
                .await
                .unwrap();
        }
        let names: Vec<String> = driver
            .list_blobs("reports", Some("blob-"))
            .map_ok(|b| b.name)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names.len(), 7);
        assert_eq!(names.first().map(String::as_str), Some("blob-0"));
        assert_eq!(names.last().map(String::as_str), Some("blob-6"));
    }

    #[tokio::test]
    async fn test_delete_container_checks_emptiness() {
        let (driver, _) = driver();
        driver.create_container("reports", None).await.unwrap();
        driver
            .upload_blob("reports", "a", BlobSource::from(b"a"), &UploadOptions::new())
            .await
            .unwrap();
        let err = driver.delete_container("reports").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        driver.delete_blob("reports", "a").await.unwrap();
        driver.delete_container("reports").await.unwrap();
        let err = driver.delete_container("reports").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_translate_status() {
        let kind = |status| translate_status(ServiceError::new(status, None, "x")).kind();
        assert_eq!(kind(401), ErrorKind::Credentials);
        assert_eq!(kind(403), ErrorKind::Credentials);
        assert_eq!(kind(404), ErrorKind::NotFound);
        assert_eq!(kind(409), ErrorKind::Conflict);
        assert_eq!(kind(501), ErrorKind::Unsupported);
        assert_eq!(kind(503), ErrorKind::CloudStorage);
        assert_eq!(
            translate_status(ServiceError::timeout("slow")).kind(),
            ErrorKind::CloudStorage
        );
    }
}
