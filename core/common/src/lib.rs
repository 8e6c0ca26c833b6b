//! Common types shared by the cloud storage drivers.
//!
//! This crate holds the closed error taxonomy every driver reports through,
//! the provider identifiers understood by the registry, and the small value
//! types (ACLs, metadata maps, secrets) that cross the driver boundary.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{Acl, DriverName, Metadata, Secret};
