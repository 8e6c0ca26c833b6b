//! Provider-agnostic object storage.
//!
//! This crate exposes one API for creating containers and storing,
//! retrieving and deleting blobs across Amazon S3, Azure Blob Storage,
//! Google Cloud Storage, Rackspace Cloud Files and the local filesystem.
//!
//! # Design Principles
//! - Provider isolation: callers only see [`Storage`], [`Container`] and
//!   [`Blob`]; every provider sits behind the [`Driver`] contract
//! - Local validation first: names, metadata limits and checksum formats are
//!   checked before any network call
//! - Unified error semantics: each driver translates its collaborator's
//!   failures into the closed [`ErrorKind`] taxonomy
//! - No hidden work: no retries, no background tasks, no locks of our own
//!
//! # Example
//! ```no_run
//! use cloudstorage::{get_driver, DriverConfig, DriverName, UploadOptions};
//!
//! # async fn demo() -> cloudstorage::Result<()> {
//! let storage = get_driver(DriverName::Local)?
//!     .connect(DriverConfig::new().with_key("/tmp/storage"))?;
//! let container = storage.create_container("reports", None).await?;
//! let blob = container
//!     .upload_blob("report.csv", &b"a,b,c"[..], UploadOptions::new())
//!     .await?;
//! assert_eq!(blob.size(), 5);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod checksum;
mod chunk;
pub mod config;
pub mod container;
pub mod driver;
pub mod memory;
mod naming;
pub mod object;
pub mod registry;
pub mod service;
pub mod signing;
pub mod storage;

#[cfg(feature = "local")]
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "azure")]
pub mod azure;
#[cfg(feature = "google")]
pub mod google;
#[cfg(feature = "rackspace")]
pub mod rackspace;

pub use blob::{Blob, BlobInfo, BlobSource, UploadOptions};
pub use config::DriverConfig;
pub use container::{Container, ContainerInfo};
pub use driver::{ByteStream, Driver, MetadataPolicy};
pub use memory::{Dialect, MemoryService};
pub use registry::{
    create_default_registry, get_driver, get_driver_by_name, DriverFactory, DriverRegistry,
};
pub use service::{ObjectService, ServiceError};
pub use signing::SignedUrl;
pub use storage::Storage;

pub use cloudstorage_common::{Acl, DriverName, Error, ErrorKind, Metadata, Result, Secret};

#[cfg(feature = "local")]
pub use local::LocalDriver;
#[cfg(feature = "s3")]
pub use s3::S3Driver;
#[cfg(feature = "azure")]
pub use azure::AzureDriver;
#[cfg(feature = "google")]
pub use google::GoogleStorageDriver;
#[cfg(feature = "rackspace")]
pub use rackspace::CloudFilesDriver;
