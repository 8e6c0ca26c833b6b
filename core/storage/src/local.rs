//! Local filesystem driver.
//!
//! Containers are directories under the root and blobs are files inside
//! them; `/` in a blob name becomes a subdirectory. Each container keeps its
//! bookkeeping under a reserved `.cloudstorage` directory: the container
//! record, one JSON sidecar per blob carrying the MD5 and user metadata, and
//! a scratch area that uploads are written to before being renamed into
//! place.
//!
//! URL signing and CDN publishing are unsupported.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use cloudstorage_common::{Acl, DriverName, Error, ErrorKind, Metadata, Result};

use crate::blob::{BlobInfo, BlobSource, UploadOptions};
use crate::checksum::ContentHasher;
use crate::chunk::into_stream;
use crate::config::DriverConfig;
use crate::container::ContainerInfo;
use crate::driver::{ByteStream, Driver, MetadataPolicy};
use crate::naming::{self, LOCAL_RESERVED_DIR};
use crate::signing::SignedUrl;

const RECORD_FILE: &str = "container.json";
const META_DIR: &str = "meta";
const TMP_DIR: &str = "tmp";
const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContainerRecord {
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    acl: Acl,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlobRecord {
    checksum: Option<String>,
    content_type: Option<String>,
    content_disposition: Option<String>,
    cache_control: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    created_at: Option<DateTime<Utc>>,
}

/// Map a filesystem failure onto the error taxonomy.
fn translate(err: io::Error, subject: &str) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(format!("{} not found", subject)),
        io::ErrorKind::PermissionDenied => {
            Error::Credentials(format!("Permission denied for {}", subject))
        }
        io::ErrorKind::AlreadyExists => Error::Conflict(format!("{} already exists", subject)),
        _ => Error::cloud_with(format!("Filesystem operation on {} failed", subject), err),
    }
}

/// Metadata of the regular file at `path`.
///
/// A missing file, a directory, or a path running through a file all mean
/// the blob does not exist.
async fn stat_blob(path: &Path, subject: &str) -> Result<std::fs::Metadata> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta),
        Ok(_) => Err(Error::NotFound(format!("{} not found", subject))),
        Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
            Err(Error::NotFound(format!("{} not found", subject)))
        }
        Err(e) => Err(translate(e, subject)),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| Error::cloud_with(format!("Corrupt record {}", path.display()), e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(translate(e, &path.display().to_string())),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| translate(e, &parent.display().to_string()))?;
    }
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::cloud_with("Failed to encode record", e))?;
    fs::write(path, data)
        .await
        .map_err(|e| translate(e, &path.display().to_string()))
}

async fn hash_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .await
        .map_err(|e| translate(e, &path.display().to_string()))?;
    let mut stream = ReaderStream::with_capacity(file, READ_BUFFER);
    let mut hasher = ContentHasher::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| translate(e, &path.display().to_string()))?;
        hasher.update(&chunk);
    }
    Ok(hasher.hex_digest())
}

/// Remove empty directories from `start` up to, but excluding, `stop`.
async fn prune_empty_dirs(start: Option<&Path>, stop: &Path) {
    let mut current = start;
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn unsupported(what: &str) -> Error {
    Error::Unsupported(format!("The local driver does not support {}", what))
}

/// Filesystem-backed driver.
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory exists
    ///
    /// # Errors
    /// - Permission denied (`Credentials`) or another filesystem failure
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)
                .map_err(|e| translate(e, &root.display().to_string()))?;
        }

        Ok(Self { root })
    }

    /// Create a driver from configuration; `key` is the root directory.
    ///
    /// # Errors
    /// - `Credentials` if no root is configured
    pub fn connect(config: &DriverConfig) -> Result<Self> {
        let root = config
            .key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::Credentials("The local driver needs its root directory as key".to_string())
            })?;
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn reserved_path(&self, container: &str) -> PathBuf {
        self.container_path(container).join(LOCAL_RESERVED_DIR)
    }

    fn blob_path(&self, container: &str, name: &str) -> PathBuf {
        let mut path = self.container_path(container);
        path.extend(name.split('/'));
        path
    }

    fn sidecar_path(&self, container: &str, name: &str) -> PathBuf {
        let mut path = self.reserved_path(container).join(META_DIR);
        let mut segments = name.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{}.json", segment));
            }
        }
        path
    }

    async fn ensure_container(&self, container: &str) -> Result<PathBuf> {
        let path = self.container_path(container);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(Error::NotFound(format!("Container '{}' not found", container))),
            Err(e) => Err(translate(e, &format!("Container '{}'", container))),
        }
    }

    async fn container_info(&self, container: &str) -> Result<ContainerInfo> {
        let path = self.ensure_container(container).await?;
        let record: ContainerRecord = read_json(&self.reserved_path(container).join(RECORD_FILE))
            .await?
            .unwrap_or_default();
        let created_at = match record.created_at {
            Some(at) => Some(at),
            None => fs::metadata(&path)
                .await
                .ok()
                .and_then(|meta| meta.created().or_else(|_| meta.modified()).ok())
                .map(DateTime::<Utc>::from),
        };
        Ok(ContainerInfo {
            name: container.to_string(),
            created_at,
            acl: record.acl,
            cdn_url: None,
        })
    }

    async fn blob_info(&self, container: &str, name: &str) -> Result<BlobInfo> {
        let path = self.blob_path(container, name);
        let subject = format!("Blob '{}' in container '{}'", name, container);
        let meta = stat_blob(&path, &subject).await?;

        let record: BlobRecord = read_json(&self.sidecar_path(container, name))
            .await?
            .unwrap_or_default();
        // Files placed by hand have no sidecar yet.
        let checksum = match record.checksum {
            Some(checksum) => checksum,
            None => hash_file(&path).await?,
        };
        let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);

        Ok(BlobInfo {
            container: container.to_string(),
            name: name.to_string(),
            size: meta.len(),
            etag: Some(checksum.clone()),
            checksum: Some(checksum),
            content_type: record.content_type,
            content_disposition: record.content_disposition,
            cache_control: record.cache_control,
            metadata: record.metadata,
            created_at: record.created_at.or(modified_at),
            modified_at,
        })
    }

    async fn container_names(&self) -> Result<Vec<String>> {
        let subject = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| translate(e, &subject))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| translate(e, &subject))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Names of all blobs in `container` starting with `prefix`, sorted.
    async fn blob_names(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let root = self.ensure_container(container).await?;
        let mut names = Vec::new();
        let mut pending = vec![(root, String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let subject = dir.display().to_string();
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| translate(e, &subject))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| translate(e, &subject))?
            {
                let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                    warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                    continue;
                };
                if relative.is_empty() && file_name == LOCAL_RESERVED_DIR {
                    continue;
                }
                let name = if relative.is_empty() {
                    file_name
                } else {
                    format!("{}/{}", relative, file_name)
                };
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| translate(e, &subject))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), name));
                } else if file_type.is_file() && prefix.map_or(true, |p| name.starts_with(p)) {
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Write `source` to `path`, returning the hex MD5 of what was written.
    async fn write_temp(&self, path: &Path, source: BlobSource) -> Result<String> {
        let subject = path.display().to_string();
        let mut stream = into_stream(source).await?;
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| translate(e, &subject))?;
        let mut hasher = ContentHasher::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| translate(e, &subject))?;
        }
        file.flush().await.map_err(|e| translate(e, &subject))?;
        Ok(hasher.hex_digest())
    }

    async fn store(&self, container: &str, name: &str, source: BlobSource) -> Result<String> {
        let scratch = self.reserved_path(container).join(TMP_DIR);
        fs::create_dir_all(&scratch)
            .await
            .map_err(|e| translate(e, &scratch.display().to_string()))?;
        let temp = scratch.join(Uuid::new_v4().to_string());

        let written: Result<String> = async {
            let checksum = self.write_temp(&temp, source).await?;
            // Drop the old record first so its checksum never describes the
            // new content; until the new record lands the file is hashed.
            let sidecar = self.sidecar_path(container, name);
            match fs::remove_file(&sidecar).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(translate(e, &sidecar.display().to_string())),
            }
            let target = self.blob_path(container, name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| translate(e, &parent.display().to_string()))?;
            }
            fs::rename(&temp, &target)
                .await
                .map_err(|e| translate(e, &format!("Blob '{}'", name)))?;
            Ok(checksum)
        }
        .await;

        if written.is_err() {
            if let Err(e) = fs::remove_file(&temp).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %e, "Failed to remove partial upload");
                }
            }
        }
        written
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> DriverName {
        DriverName::Local
    }

    fn validate_container_name(&self, name: &str) -> Result<()> {
        naming::local_container(name)
    }

    fn validate_blob_name(&self, name: &str) -> Result<()> {
        naming::local_blob(name)
    }

    fn metadata_policy(&self) -> MetadataPolicy {
        MetadataPolicy::InPlace
    }

    async fn validate_credentials(&self) -> Result<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(Error::Credentials(format!(
                "Root {} is not an accessible directory",
                self.root.display()
            ))),
        }
    }

    async fn create_container(&self, name: &str, acl: Option<Acl>) -> Result<ContainerInfo> {
        let path = self.container_path(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                let info = self.container_info(name).await?;
                if let Some(acl) = acl {
                    if acl != info.acl {
                        return Err(Error::Conflict(format!(
                            "Container '{}' already exists with ACL {}",
                            name, info.acl
                        )));
                    }
                }
                return Ok(info);
            }
            Ok(_) => {
                return Err(Error::Conflict(format!(
                    "'{}' exists and is not a directory",
                    name
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(translate(e, &format!("Container '{}'", name))),
        }

        let meta_dir = self.reserved_path(name).join(META_DIR);
        fs::create_dir_all(&meta_dir)
            .await
            .map_err(|e| translate(e, &format!("Container '{}'", name)))?;
        let record = ContainerRecord {
            created_at: Some(Utc::now()),
            acl: acl.unwrap_or_default(),
        };
        write_json(&self.reserved_path(name).join(RECORD_FILE), &record).await?;
        debug!(container = name, path = %path.display(), "Created container directory");

        Ok(ContainerInfo {
            name: name.to_string(),
            created_at: record.created_at,
            acl: record.acl,
            cdn_url: None,
        })
    }

    async fn get_container(&self, name: &str) -> Result<ContainerInfo> {
        self.container_info(name).await
    }

    fn list_containers(&self) -> BoxStream<'_, Result<ContainerInfo>> {
        stream::once(self.container_names())
            .map_ok(|names| stream::iter(names.into_iter().map(Ok)))
            .try_flatten()
            .try_filter_map(move |name: String| async move {
                match self.container_info(&name).await {
                    Ok(info) => Ok(Some(info)),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .boxed()
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        let path = self.ensure_container(name).await?;
        let remaining = self.blob_names(name, None).await?;
        if !remaining.is_empty() {
            return Err(Error::not_empty(name));
        }
        fs::remove_dir_all(&path)
            .await
            .map_err(|e| translate(e, &format!("Container '{}'", name)))?;
        debug!(container = name, "Removed container directory");
        Ok(())
    }

    async fn set_container_cdn(&self, _name: &str, _enabled: bool) -> Result<ContainerInfo> {
        Err(unsupported("CDN publishing"))
    }

    async fn upload_blob(
        &self,
        container: &str,
        name: &str,
        source: BlobSource,
        options: &UploadOptions,
    ) -> Result<BlobInfo> {
        self.ensure_container(container).await?;
        let checksum = self.store(container, name, source).await?;

        let record = BlobRecord {
            checksum: Some(checksum),
            content_type: options.content_type.clone(),
            content_disposition: options.content_disposition.clone(),
            cache_control: options.cache_control.clone(),
            metadata: options.metadata.clone(),
            created_at: Some(Utc::now()),
        };
        write_json(&self.sidecar_path(container, name), &record).await?;
        debug!(container, blob = name, "Stored blob file");

        self.blob_info(container, name).await
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<BlobInfo> {
        self.ensure_container(container).await?;
        self.blob_info(container, name).await
    }

    fn list_blobs<'a>(
        &'a self,
        container: &'a str,
        prefix: Option<&'a str>,
    ) -> BoxStream<'a, Result<BlobInfo>> {
        stream::once(self.blob_names(container, prefix))
            .map_ok(|names| stream::iter(names.into_iter().map(Ok)))
            .try_flatten()
            .try_filter_map(move |name: String| async move {
                // Removed between the directory walk and the stat.
                match self.blob_info(container, &name).await {
                    Ok(info) => Ok(Some(info)),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .boxed()
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<()> {
        let container_path = self.ensure_container(container).await?;
        let path = self.blob_path(container, name);
        let subject = format!("Blob '{}' in container '{}'", name, container);

        stat_blob(&path, &subject).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| translate(e, &subject))?;

        let sidecar = self.sidecar_path(container, name);
        if let Err(e) = fs::remove_file(&sidecar).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %sidecar.display(), error = %e, "Failed to remove blob record");
            }
        }

        prune_empty_dirs(path.parent(), &container_path).await;
        prune_empty_dirs(sidecar.parent(), &self.reserved_path(container).join(META_DIR)).await;
        Ok(())
    }

    async fn download_blob(&self, container: &str, name: &str) -> Result<ByteStream> {
        self.ensure_container(container).await?;
        let path = self.blob_path(container, name);
        let subject = format!("Blob '{}' in container '{}'", name, container);
        stat_blob(&path, &subject).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| translate(e, &subject))?;
        Ok(ReaderStream::with_capacity(file, READ_BUFFER)
            .map_err(move |e| translate(e, &subject))
            .boxed())
    }

    async fn update_blob_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: &Metadata,
    ) -> Result<BlobInfo> {
        let current = self.get_blob(container, name).await?;
        let sidecar = self.sidecar_path(container, name);
        let mut record: BlobRecord = read_json(&sidecar).await?.unwrap_or_default();
        record.checksum = current.checksum;
        record.created_at = record.created_at.or(current.created_at);
        record.metadata = metadata.clone();
        write_json(&sidecar, &record).await?;
        self.blob_info(container, name).await
    }

    fn generate_upload_url(
        &self,
        _container: &ContainerInfo,
        _blob_name: &str,
        _expires_in: Duration,
        _fields: &BTreeMap<String, String>,
    ) -> Result<SignedUrl> {
        Err(unsupported("signed upload URLs"))
    }

    fn generate_download_url(
        &self,
        _container: &ContainerInfo,
        _blob_name: &str,
        _expires_in: Duration,
    ) -> Result<String> {
        Err(unsupported("signed download URLs"))
    }

    fn cdn_url(&self, _container: &ContainerInfo, _blob_name: &str) -> Result<String> {
        Err(unsupported("CDN URLs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md5_hex;
    use crate::registry::get_driver;
    use crate::storage::Storage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn storage(temp: &TempDir) -> Storage {
        Storage::new(Arc::new(LocalDriver::new(temp.path()).unwrap()))
    }

    #[test]
    fn test_connect_requires_root() {
        let err = LocalDriver::connect(&DriverConfig::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }

    #[tokio::test]
    async fn test_connect_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested/root");
        let storage = get_driver(DriverName::Local)
            .unwrap()
            .connect(DriverConfig::new().with_key(root.to_string_lossy()))
            .unwrap();
        assert!(root.is_dir());
        storage.validate_credentials().await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();

        let blob = container
            .upload_blob("2024/q1.csv", b"a,b,c".to_vec(), UploadOptions::new())
            .await
            .unwrap();
        assert_eq!(blob.size(), 5);
        assert_eq!(blob.checksum(), Some(md5_hex(b"a,b,c").as_str()));
        assert_eq!(blob.content_type(), Some("text/csv"));
        assert!(temp.path().join("reports/2024/q1.csv").is_file());

        let data = blob.read().await.unwrap();
        assert_eq!(&data[..], b"a,b,c");
    }

    #[tokio::test]
    async fn test_upload_from_path() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source.bin");
        tokio::fs::write(&source, vec![7u8; 200_000]).await.unwrap();

        let storage = storage(&temp);
        let container = storage.create_container("data", None).await.unwrap();
        let blob = container
            .upload_blob("copy.bin", BlobSource::path(&source), UploadOptions::new())
            .await
            .unwrap();
        assert_eq!(blob.size(), 200_000);
        assert_eq!(blob.checksum(), Some(md5_hex(&vec![7u8; 200_000]).as_str()));
    }

    #[tokio::test]
    async fn test_listing_skips_bookkeeping_and_filters_prefix() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();
        for name in ["2024/q1.csv", "2024/q2.csv", "2023/q4.csv", "readme.txt"] {
            container
                .upload_blob(name, b"x".to_vec(), UploadOptions::new())
                .await
                .unwrap();
        }

        let names: Vec<String> = container
            .list_blobs(None)
            .map_ok(|blob| blob.name().to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            names,
            vec!["2023/q4.csv", "2024/q1.csv", "2024/q2.csv", "readme.txt"]
        );

        let names: Vec<String> = container
            .list_blobs(Some("2024/"))
            .map_ok(|blob| blob.name().to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["2024/q1.csv", "2024/q2.csv"]);
    }

    #[tokio::test]
    async fn test_list_containers_sorted() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        storage.create_container("beta", None).await.unwrap();
        storage.create_container("alpha", None).await.unwrap();
        tokio::fs::write(temp.path().join("stray.txt"), b"x").await.unwrap();

        let names: Vec<String> = storage
            .list_containers()
            .map_ok(|c| c.name().to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_but_acl_must_match() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let first = storage
            .create_container("reports", Some(Acl::PublicRead))
            .await
            .unwrap();
        let again = storage.create_container("reports", None).await.unwrap();
        assert_eq!(first.created_at(), again.created_at());
        assert_eq!(again.acl(), Acl::PublicRead);

        let err = storage
            .create_container("reports", Some(Acl::Private))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_delete_blob_prunes_directories() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();
        container
            .upload_blob("a/b/c.txt", b"x".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        container.delete_blob("a/b/c.txt").await.unwrap();
        assert!(!temp.path().join("reports/a").exists());
        assert!(temp.path().join("reports").is_dir());

        let err = container.delete_blob("a/b/c.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_container_refuses_non_empty() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();
        container
            .upload_blob("a.txt", b"x".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        let err = storage.delete_container("reports", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        storage.delete_container("reports", true).await.unwrap();
        assert!(!temp.path().join("reports").exists());
    }

    #[tokio::test]
    async fn test_metadata_survives_new_driver() {
        let temp = TempDir::new().unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("owner".to_string(), "finance".to_string());
        {
            let storage = storage(&temp);
            let container = storage.create_container("reports", None).await.unwrap();
            let mut blob = container
                .upload_blob("a.txt", b"x".to_vec(), UploadOptions::new())
                .await
                .unwrap();
            blob.set_metadata(metadata.clone()).await.unwrap();
        }

        let storage = storage(&temp);
        let blob = storage
            .get_container("reports")
            .await
            .unwrap()
            .get_blob("a.txt")
            .await
            .unwrap();
        assert_eq!(blob.metadata(), &metadata);
        assert_eq!(blob.checksum(), Some(md5_hex(b"x").as_str()));
    }

    #[tokio::test]
    async fn test_foreign_files_are_hashed() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();
        tokio::fs::write(temp.path().join("reports/manual.txt"), b"hand placed")
            .await
            .unwrap();

        let blob = container.get_blob("manual.txt").await.unwrap();
        assert_eq!(blob.checksum(), Some(md5_hex(b"hand placed").as_str()));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();
        for name in ["../escape.txt", ".cloudstorage/meta/x.json", "a//b"] {
            let err = container
                .upload_blob(name, b"x".to_vec(), UploadOptions::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidName, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_urls_and_cdn_are_unsupported() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let mut container = storage.create_container("reports", None).await.unwrap();
        let blob = container
            .upload_blob("a.txt", b"x".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        let err = blob
            .generate_download_url(Duration::from_secs(60))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = container
            .generate_upload_url("b.txt", Duration::from_secs(60), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(!container.enable_cdn().await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_below_a_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();
        container
            .upload_blob("a.txt", b"x".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        let err = container.get_blob("a.txt/b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = container.delete_blob("a.txt/b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!container.blob_exists("a.txt/b").await.unwrap());
        assert!(container.blob_exists("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_overlong_segment_rejected_before_write() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let container = storage.create_container("reports", None).await.unwrap();

        let err = container
            .upload_blob(&"a".repeat(300), b"x".to_vec(), UploadOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        let listed: Vec<_> = container.list_blobs(None).collect().await;
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_replaced_content_drops_old_record() {
        let temp = TempDir::new().unwrap();
        let driver = LocalDriver::new(temp.path()).unwrap();
        let storage = Storage::new(Arc::new(LocalDriver::new(temp.path()).unwrap()));
        let container = storage.create_container("reports", None).await.unwrap();
        container
            .upload_blob("doc.txt", b"first".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        // Content replaced without the record being rewritten afterwards.
        driver
            .store("reports", "doc.txt", b"second".to_vec().into())
            .await
            .unwrap();

        let blob = container.get_blob("doc.txt").await.unwrap();
        assert_eq!(blob.checksum(), Some(md5_hex(b"second").as_str()));
        assert_eq!(blob.size(), 6);
    }

    #[tokio::test]
    async fn test_get_missing_container() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let err = storage.get_container("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
