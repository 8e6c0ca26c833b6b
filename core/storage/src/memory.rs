//! In-memory object service for testing.
//!
//! Emulates one provider's behavior closely enough to exercise the drivers
//! without a network: provider error codes, the shape in which each provider
//! reports content checksums, paging, and multipart assembly. Faults can be
//! injected (credential rejection, per-object delete failures, latency) and
//! every call is counted, which is how tests prove that local validation
//! happens before any provider call.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

use cloudstorage_common::Metadata;

use crate::checksum::{md5_base64, md5_hex};
use crate::service::{
    BucketInfo, CompletedPart, ObjectInfo, ObjectService, Page, PutOptions, ServiceError,
    ServiceResult, ServiceStream,
};

const DEFAULT_PAGE_SIZE: usize = 1000;
const STREAM_CHUNK: usize = 64 * 1024;

/// Provider whose behavior a [`MemoryService`] emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    S3,
    Azure,
    Google,
    CloudFiles,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    info: ObjectInfo,
}

#[derive(Debug, Clone)]
struct StoredBucket {
    info: BucketInfo,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    key: String,
    options: PutOptions,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, StoredBucket>,
    uploads: HashMap<String, Upload>,
}

/// In-memory [`ObjectService`].
///
/// All data is stored in memory and lost on drop.
pub struct MemoryService {
    dialect: Dialect,
    state: RwLock<State>,
    calls: AtomicUsize,
    generation: AtomicU64,
    reject_credentials: AtomicBool,
    fail_parts: AtomicBool,
    failing_deletes: RwLock<HashSet<String>>,
    latency_ms: AtomicU64,
    page_size: AtomicUsize,
}

impl MemoryService {
    /// Create an empty service speaking `dialect`.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: RwLock::new(State::default()),
            calls: AtomicUsize::new(0),
            generation: AtomicU64::new(0x8D4BCC2E4835CD0),
            reject_credentials: AtomicBool::new(false),
            fail_parts: AtomicBool::new(false),
            failing_deletes: RwLock::new(HashSet::new()),
            latency_ms: AtomicU64::new(0),
            page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
        }
    }

    /// Emulated provider.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Reject every subsequent call as unauthenticated.
    pub fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Make deletes of objects named `key` fail with a server error.
    pub fn fail_deletes_of(&self, key: impl Into<String>) {
        self.failing_deletes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into());
    }

    /// Make every part upload fail with a server error.
    pub fn fail_part_uploads(&self, fail: bool) {
        self.fail_parts.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Maximum number of entries per listing page.
    pub fn set_page_size(&self, size: usize) {
        self.page_size.store(size.max(1), Ordering::SeqCst);
    }

    /// Multipart uploads started but neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.read().uploads.len()
    }

    /// Raw content of an object, bypassing the call counter.
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.read()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> ServiceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(self.auth_error());
        }
        Ok(())
    }

    fn next_etag(&self) -> String {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        match self.dialect {
            Dialect::Google => format!("CN{:X}EAE=", generation),
            _ => format!("\"0x{:X}\"", generation),
        }
    }

    fn page_size(&self) -> usize {
        self.page_size.load(Ordering::SeqCst)
    }

    fn auth_error(&self) -> ServiceError {
        match self.dialect {
            Dialect::S3 => ServiceError::new(
                403,
                Some("InvalidAccessKeyId"),
                "The AWS Access Key Id you provided does not exist in our records.",
            ),
            Dialect::Azure => ServiceError::new(
                403,
                Some("AuthenticationFailed"),
                "Server failed to authenticate the request.",
            ),
            Dialect::Google => ServiceError::new(401, Some("unauthorized"), "Invalid Credentials"),
            Dialect::CloudFiles => ServiceError::new(401, None, "Unauthorized"),
        }
    }

    fn no_bucket(&self, bucket: &str) -> ServiceError {
        let message = format!("The specified container '{}' does not exist", bucket);
        match self.dialect {
            Dialect::S3 => ServiceError::new(404, Some("NoSuchBucket"), message),
            Dialect::Azure => ServiceError::new(404, Some("ContainerNotFound"), message),
            Dialect::Google => ServiceError::new(404, Some("notFound"), message),
            Dialect::CloudFiles => ServiceError::new(404, None, message),
        }
    }

    fn no_key(&self, bucket: &str, key: &str) -> ServiceError {
        let message = format!("The specified key '{}/{}' does not exist", bucket, key);
        match self.dialect {
            Dialect::S3 => ServiceError::new(404, Some("NoSuchKey"), message),
            Dialect::Azure => ServiceError::new(404, Some("BlobNotFound"), message),
            Dialect::Google => ServiceError::new(404, Some("notFound"), message),
            Dialect::CloudFiles => ServiceError::new(404, None, message),
        }
    }

    fn bucket_exists(&self, bucket: &str) -> ServiceError {
        let message = format!("The container '{}' already exists", bucket);
        match self.dialect {
            Dialect::S3 => ServiceError::new(409, Some("BucketAlreadyOwnedByYou"), message),
            Dialect::Azure => ServiceError::new(409, Some("ContainerAlreadyExists"), message),
            Dialect::Google | Dialect::CloudFiles => {
                ServiceError::new(409, Some("conflict"), message)
            }
        }
    }

    fn bucket_not_empty(&self, bucket: &str) -> ServiceError {
        let message = format!("The container '{}' is not empty", bucket);
        match self.dialect {
            Dialect::S3 => ServiceError::new(409, Some("BucketNotEmpty"), message),
            _ => ServiceError::new(409, Some("conflict"), message),
        }
    }

    fn bad_digest(&self) -> ServiceError {
        let message = "The Content-MD5 you specified did not match what we received.";
        match self.dialect {
            Dialect::S3 => ServiceError::new(400, Some("BadDigest"), message),
            Dialect::Azure => ServiceError::new(400, Some("Md5Mismatch"), message),
            Dialect::Google => ServiceError::new(400, Some("invalid"), message),
            Dialect::CloudFiles => ServiceError::new(422, None, message),
        }
    }

    fn not_implemented(&self, operation: &str) -> ServiceError {
        ServiceError::new(
            501,
            Some("NotImplemented"),
            format!("{} is not implemented by this provider", operation),
        )
    }

    /// Object attributes as the emulated provider reports them for a
    /// single-request write of `data`.
    fn describe(&self, key: &str, data: &Bytes, options: &PutOptions) -> ObjectInfo {
        let now = Utc::now();
        let (etag, content_md5) = match self.dialect {
            Dialect::S3 => (format!("\"{}\"", md5_hex(data)), None),
            Dialect::CloudFiles => (md5_hex(data), None),
            Dialect::Azure | Dialect::Google => (self.next_etag(), Some(md5_base64(data))),
        };
        ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            etag: Some(etag),
            content_md5,
            composite: false,
            content_type: options.content_type.clone(),
            content_disposition: options.content_disposition.clone(),
            cache_control: options.cache_control.clone(),
            metadata: options.metadata.clone(),
            created_at: Some(now),
            modified_at: Some(now),
        }
    }

    /// Attributes of an object assembled from `parts`.
    fn describe_composite(&self, key: &str, parts: &[Bytes], options: &PutOptions) -> ObjectInfo {
        let size: usize = parts.iter().map(Bytes::len).sum();
        let etag = match self.dialect {
            Dialect::S3 => {
                let mut digests = Vec::with_capacity(parts.len() * 16);
                for part in parts {
                    digests.extend(hex::decode(md5_hex(part)).unwrap_or_default());
                }
                format!("\"{}-{}\"", md5_hex(&digests), parts.len())
            }
            Dialect::CloudFiles => {
                let joined: String = parts.iter().map(|p| md5_hex(p)).collect();
                format!("\"{}\"", md5_hex(joined.as_bytes()))
            }
            Dialect::Azure | Dialect::Google => self.next_etag(),
        };
        let now = Utc::now();
        ObjectInfo {
            key: key.to_string(),
            size: size as u64,
            etag: Some(etag),
            content_md5: None,
            composite: true,
            content_type: options.content_type.clone(),
            content_disposition: options.content_disposition.clone(),
            cache_control: options.cache_control.clone(),
            metadata: options.metadata.clone(),
            created_at: Some(now),
            modified_at: Some(now),
        }
    }

    fn page<T, F>(&self, items: Vec<T>, marker: Option<&str>, name: F) -> Page<T>
    where
        F: Fn(&T) -> &str,
    {
        let size = self.page_size();
        let mut items: Vec<T> = items
            .into_iter()
            .filter(|item| marker.map_or(true, |m| name(item) > m))
            .collect();
        let more = items.len() > size;
        items.truncate(size);
        let next_marker = if more {
            items.last().map(|item| name(item).to_string())
        } else {
            None
        };
        Page { items, next_marker }
    }
}

#[async_trait]
impl ObjectService for MemoryService {
    async fn list_buckets(&self, marker: Option<&str>) -> ServiceResult<Page<BucketInfo>> {
        self.enter().await?;
        let buckets: Vec<BucketInfo> = self
            .read()
            .buckets
            .values()
            .map(|b| b.info.clone())
            .collect();
        Ok(self.page(buckets, marker, |b: &BucketInfo| b.name.as_str()))
    }

    async fn head_bucket(&self, bucket: &str) -> ServiceResult<BucketInfo> {
        self.enter().await?;
        self.read()
            .buckets
            .get(bucket)
            .map(|b| b.info.clone())
            .ok_or_else(|| self.no_bucket(bucket))
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        _region: Option<&str>,
    ) -> ServiceResult<BucketInfo> {
        self.enter().await?;
        let mut state = self.write();
        if let Some(existing) = state.buckets.get(bucket) {
            // Swift answers a repeated PUT with 202 Accepted.
            if self.dialect == Dialect::CloudFiles {
                return Ok(existing.info.clone());
            }
            return Err(self.bucket_exists(bucket));
        }
        let info = BucketInfo {
            name: bucket.to_string(),
            created_at: Some(Utc::now()),
            acl: acl.map(str::to_string),
            cdn_enabled: false,
            cdn_uri: None,
        };
        state.buckets.insert(
            bucket.to_string(),
            StoredBucket {
                info: info.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn delete_bucket(&self, bucket: &str) -> ServiceResult<()> {
        self.enter().await?;
        let mut state = self.write();
        let stored = state
            .buckets
            .get(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        // Azure deletes containers together with their blobs.
        if !stored.objects.is_empty() && self.dialect != Dialect::Azure {
            return Err(self.bucket_not_empty(bucket));
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn set_bucket_acl(&self, bucket: &str, acl: &str) -> ServiceResult<BucketInfo> {
        self.enter().await?;
        let mut state = self.write();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        stored.info.acl = Some(acl.to_string());
        Ok(stored.info.clone())
    }

    async fn set_bucket_cdn(&self, bucket: &str, enabled: bool) -> ServiceResult<BucketInfo> {
        self.enter().await?;
        if self.dialect != Dialect::CloudFiles {
            return Err(self.not_implemented("CDN management"));
        }
        let mut state = self.write();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        stored.info.cdn_enabled = enabled;
        stored.info.cdn_uri = enabled.then(|| {
            format!(
                "https://{}.ssl.cf1.rackcdn.com",
                &md5_hex(bucket.as_bytes())[..20]
            )
        });
        Ok(stored.info.clone())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> ServiceResult<Page<ObjectInfo>> {
        self.enter().await?;
        let objects: Vec<ObjectInfo> = {
            let state = self.read();
            let stored = state
                .buckets
                .get(bucket)
                .ok_or_else(|| self.no_bucket(bucket))?;
            stored
                .objects
                .values()
                .filter(|o| prefix.map_or(true, |p| o.info.key.starts_with(p)))
                .map(|o| o.info.clone())
                .collect()
        };
        Ok(self.page(objects, marker, |o: &ObjectInfo| o.key.as_str()))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ServiceResult<ObjectInfo> {
        self.enter().await?;
        let state = self.read();
        let stored = state
            .buckets
            .get(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        stored
            .objects
            .get(key)
            .map(|o| o.info.clone())
            .ok_or_else(|| self.no_key(bucket, key))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> ServiceResult<ObjectInfo> {
        self.enter().await?;
        if let Some(expected) = &options.content_md5 {
            if *expected != md5_base64(&body) {
                return Err(self.bad_digest());
            }
        }
        let info = self.describe(key, &body, options);
        let mut state = self.write();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        stored.objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                info: info.clone(),
            },
        );
        Ok(info)
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> ServiceResult<String> {
        self.enter().await?;
        let mut state = self.write();
        if !state.buckets.contains_key(bucket) {
            return Err(self.no_bucket(bucket));
        }
        let id = Uuid::new_v4().to_string();
        state.uploads.insert(
            id.clone(),
            Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: u32,
        body: Bytes,
    ) -> ServiceResult<CompletedPart> {
        self.enter().await?;
        if self.fail_parts.load(Ordering::SeqCst) {
            return Err(ServiceError::new(500, Some("InternalError"), "Part upload failed"));
        }
        let mut state = self.write();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| ServiceError::new(404, Some("NoSuchUpload"), "No such upload"))?;
        let etag = format!("\"{}\"", md5_hex(&body));
        upload.parts.insert(number, body);
        Ok(CompletedPart { number, etag })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ServiceResult<ObjectInfo> {
        self.enter().await?;
        let mut state = self.write();
        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| ServiceError::new(404, Some("NoSuchUpload"), "No such upload"))?;

        let mut bodies = Vec::with_capacity(parts.len());
        for part in parts {
            let body = upload
                .parts
                .get(&part.number)
                .filter(|body| format!("\"{}\"", md5_hex(body)) == part.etag)
                .ok_or_else(|| ServiceError::new(400, Some("InvalidPart"), "Invalid part"))?;
            bodies.push(body.clone());
        }

        let info = self.describe_composite(key, &bodies, &upload.options);
        let mut data = BytesMut::with_capacity(info.size as usize);
        for body in &bodies {
            data.extend_from_slice(body);
        }
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        stored.objects.insert(
            key.to_string(),
            StoredObject {
                data: data.freeze(),
                info: info.clone(),
            },
        );
        Ok(info)
    }

    async fn abort_multipart(&self, _bucket: &str, _key: &str, upload_id: &str) -> ServiceResult<()> {
        self.enter().await?;
        self.write()
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::new(404, Some("NoSuchUpload"), "No such upload"))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ServiceResult<ServiceStream> {
        self.enter().await?;
        let data = {
            let state = self.read();
            let stored = state
                .buckets
                .get(bucket)
                .ok_or_else(|| self.no_bucket(bucket))?;
            stored
                .objects
                .get(key)
                .map(|o| o.data.clone())
                .ok_or_else(|| self.no_key(bucket, key))?
        };
        let chunks: Vec<ServiceResult<Bytes>> = data
            .chunks(STREAM_CHUNK)
            .map(|chunk| Ok(data.slice_ref(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ServiceResult<()> {
        self.enter().await?;
        if self
            .failing_deletes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
        {
            return Err(ServiceError::new(
                500,
                Some("InternalError"),
                "We encountered an internal error. Please try again.",
            ));
        }
        let mut state = self.write();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        match stored.objects.remove(key) {
            Some(_) => Ok(()),
            // S3 answers 204 whether or not the key existed.
            None if self.dialect == Dialect::S3 => Ok(()),
            None => Err(self.no_key(bucket, key)),
        }
    }

    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
        replace: Option<&PutOptions>,
    ) -> ServiceResult<ObjectInfo> {
        self.enter().await?;
        let mut state = self.write();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        let mut copy = stored
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| self.no_key(bucket, source_key))?;

        copy.info.key = dest_key.to_string();
        copy.info.modified_at = Some(Utc::now());
        if let Some(options) = replace {
            copy.info.content_type = options.content_type.clone();
            copy.info.content_disposition = options.content_disposition.clone();
            copy.info.cache_control = options.cache_control.clone();
            copy.info.metadata = options.metadata.clone();
        }
        let info = copy.info.clone();
        stored.objects.insert(dest_key.to_string(), copy);
        Ok(info)
    }

    async fn set_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &Metadata,
    ) -> ServiceResult<ObjectInfo> {
        self.enter().await?;
        if self.dialect == Dialect::S3 {
            return Err(self.not_implemented("In-place metadata update"));
        }
        let etag = self.next_etag();
        let mut state = self.write();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| self.no_bucket(bucket))?;
        let object = stored
            .objects
            .get_mut(key)
            .ok_or_else(|| self.no_key(bucket, key))?;
        object.info.metadata = metadata.clone();
        object.info.modified_at = Some(Utc::now());
        // Azure and Google bump the ETag on any property change.
        if matches!(self.dialect, Dialect::Azure | Dialect::Google) {
            object.info.etag = Some(etag);
        }
        Ok(object.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_and_get() {
        let service = MemoryService::new(Dialect::S3);
        service.create_bucket("reports", None, None).await.unwrap();
        let info = service
            .put_object("reports", "a.csv", Bytes::from_static(b"a,b,c"), &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(info.etag.as_deref(), Some("\"a44c56c8177e32d3613988f4dba7962e\""));

        let data: Vec<Bytes> = service
            .get_object("reports", "a.csv")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(data.concat(), b"a,b,c");
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn test_dialect_error_codes() {
        let s3 = MemoryService::new(Dialect::S3);
        let err = s3.head_bucket("missing").await.unwrap_err();
        assert!(err.has_code("NoSuchBucket"));

        let azure = MemoryService::new(Dialect::Azure);
        let err = azure.head_bucket("missing").await.unwrap_err();
        assert!(err.has_code("ContainerNotFound"));
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_s3_delete_missing_key_succeeds() {
        let s3 = MemoryService::new(Dialect::S3);
        s3.create_bucket("reports", None, None).await.unwrap();
        s3.delete_object("reports", "missing").await.unwrap();

        let files = MemoryService::new(Dialect::CloudFiles);
        files.create_bucket("reports", None, None).await.unwrap();
        let err = files.delete_object("reports", "missing").await.unwrap_err();
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_bad_digest_rejected() {
        let service = MemoryService::new(Dialect::S3);
        service.create_bucket("reports", None, None).await.unwrap();
        let options = PutOptions {
            content_md5: Some(md5_base64(b"other")),
            ..PutOptions::default()
        };
        let err = service
            .put_object("reports", "a.csv", Bytes::from_static(b"a,b,c"), &options)
            .await
            .unwrap_err();
        assert!(err.has_code("BadDigest"));
    }

    #[tokio::test]
    async fn test_s3_multipart_etag() {
        let service = MemoryService::new(Dialect::S3);
        service.create_bucket("reports", None, None).await.unwrap();
        let id = service
            .create_multipart("reports", "big", &PutOptions::default())
            .await
            .unwrap();
        let one = service
            .upload_part("reports", "big", &id, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        let two = service
            .upload_part("reports", "big", &id, 2, Bytes::from_static(b"ef"))
            .await
            .unwrap();
        let info = service
            .complete_multipart("reports", "big", &id, &[one, two])
            .await
            .unwrap();
        assert!(info.composite);
        assert!(info.etag.unwrap().ends_with("-2\""));
        assert_eq!(service.object_data("reports", "big").unwrap().as_ref(), b"abcdef");
        assert_eq!(service.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_paging() {
        let service = MemoryService::new(Dialect::Google);
        service.set_page_size(2);
        for name in ["a", "b", "c"] {
            service.create_bucket(name, None, None).await.unwrap();
        }
        let first = service.list_buckets(None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_marker.as_deref(), Some("b"));
        let second = service.list_buckets(Some("b")).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let service = MemoryService::new(Dialect::Azure);
        service.reject_credentials(true);
        let err = service.list_buckets(None).await.unwrap_err();
        assert!(err.has_code("AuthenticationFailed"));
    }
}
