//! Object service collaborator.
//!
//! Cloud drivers never talk to the network themselves. They issue primitive
//! bucket/object calls against an [`ObjectService`] (a provider SDK or HTTP
//! client supplied by the application) and translate its [`ServiceError`]s
//! into the shared error taxonomy. The vocabulary here is the provider's:
//! buckets and object keys, raw ETags, native ACL strings.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::fmt;

use cloudstorage_common::error::BoxError;
use cloudstorage_common::Metadata;

/// Failure reported by an object service.
///
/// Carries whatever the provider reported: the HTTP status, the provider's
/// error code (`NoSuchBucket`, `ContainerNotFound`, ...) and a message.
#[derive(Debug)]
pub struct ServiceError {
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Provider error code.
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Whether the call timed out in the transport.
    pub timed_out: bool,
    /// Underlying transport failure.
    pub source: Option<BoxError>,
}

impl ServiceError {
    /// Error decoded from a provider response.
    pub fn new(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.map(str::to_string),
            message: message.into(),
            timed_out: false,
            source: None,
        }
    }

    /// Transport-level failure with no response.
    pub fn transport(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: false,
            source: Some(source.into()),
        }
    }

    /// Transport timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: true,
            source: None,
        }
    }

    /// Whether the provider code equals `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "{} ({} {})", self.message, status, code),
            (Some(status), None) => write!(f, "{} ({})", self.message, status),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type for object service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Content stream returned by [`ObjectService::get_object`].
pub type ServiceStream = BoxStream<'static, ServiceResult<Bytes>>;

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items in provider order.
    pub items: Vec<T>,
    /// Marker to request the next page, `None` on the last page.
    pub next_marker: Option<String>,
}

/// Bucket as reported by the provider.
#[derive(Debug, Clone, Default)]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Creation time, when the provider reports it.
    pub created_at: Option<DateTime<Utc>>,
    /// Native ACL value.
    pub acl: Option<String>,
    /// Whether the provider's CDN serves this bucket.
    pub cdn_enabled: bool,
    /// CDN base URI when enabled.
    pub cdn_uri: Option<String>,
}

/// Object as reported by the provider.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Raw ETag.
    pub etag: Option<String>,
    /// Raw `Content-MD5` (base64), when the provider stores one.
    pub content_md5: Option<String>,
    /// Whether the object was assembled from parts, so its ETag is not a
    /// content digest.
    pub composite: bool,
    /// Content type.
    pub content_type: Option<String>,
    /// Content disposition.
    pub content_disposition: Option<String>,
    /// Cache control.
    pub cache_control: Option<String>,
    /// User metadata.
    pub metadata: Metadata,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Headers sent with an object write.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: Metadata,
    /// Native ACL value.
    pub acl: Option<String>,
    /// Expected base64 MD5; the provider rejects the write on mismatch.
    pub content_md5: Option<String>,
}

/// Receipt for one uploaded part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub number: u32,
    /// Part ETag as returned by the provider.
    pub etag: String,
}

/// Primitive bucket/object operations of one provider account.
///
/// Implementations perform exactly one provider request per call, with no
/// retries; the driver decides how calls compose.
#[async_trait]
pub trait ObjectService: Send + Sync {
    /// List buckets, one page at a time.
    async fn list_buckets(&self, marker: Option<&str>) -> ServiceResult<Page<BucketInfo>>;

    /// Fetch a bucket.
    async fn head_bucket(&self, bucket: &str) -> ServiceResult<BucketInfo>;

    /// Create a bucket.
    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        region: Option<&str>,
    ) -> ServiceResult<BucketInfo>;

    /// Delete a bucket.
    async fn delete_bucket(&self, bucket: &str) -> ServiceResult<()>;

    /// Replace a bucket's ACL.
    async fn set_bucket_acl(&self, bucket: &str, acl: &str) -> ServiceResult<BucketInfo>;

    /// Enable or disable the provider CDN for a bucket.
    async fn set_bucket_cdn(&self, bucket: &str, enabled: bool) -> ServiceResult<BucketInfo>;

    /// List objects, one page at a time.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> ServiceResult<Page<ObjectInfo>>;

    /// Fetch object attributes.
    async fn head_object(&self, bucket: &str, key: &str) -> ServiceResult<ObjectInfo>;

    /// Write an object in one request.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> ServiceResult<ObjectInfo>;

    /// Start a multipart (block, segmented) upload and return its id.
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> ServiceResult<String>;

    /// Upload one part.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: u32,
        body: Bytes,
    ) -> ServiceResult<CompletedPart>;

    /// Assemble the uploaded parts into the object.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ServiceResult<ObjectInfo>;

    /// Discard a multipart upload and its parts.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> ServiceResult<()>;

    /// Stream an object's content.
    async fn get_object(&self, bucket: &str, key: &str) -> ServiceResult<ServiceStream>;

    /// Delete an object.
    async fn delete_object(&self, bucket: &str, key: &str) -> ServiceResult<()>;

    /// Server-side copy within a bucket, optionally replacing headers.
    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
        replace: Option<&PutOptions>,
    ) -> ServiceResult<ObjectInfo>;

    /// Replace user metadata without rewriting content.
    async fn set_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Metadata,
    ) -> ServiceResult<ObjectInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_with_status_and_code() {
        let err = ServiceError::new(404, Some("NoSuchBucket"), "The specified bucket does not exist");
        assert_eq!(
            err.to_string(),
            "The specified bucket does not exist (404 NoSuchBucket)"
        );
        assert!(err.has_code("NoSuchBucket"));
    }

    #[test]
    fn test_transport_keeps_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ServiceError::transport("connect failed", cause);
        assert_eq!(err.to_string(), "connect failed");
        assert!(err.source().is_some());
        assert!(!err.timed_out);
    }

    #[test]
    fn test_timeout_flag() {
        assert!(ServiceError::timeout("deadline").timed_out);
    }
}
