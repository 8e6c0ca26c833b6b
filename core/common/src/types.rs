//! Common types used throughout the storage drivers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// User-defined blob metadata.
///
/// Ordered so that metadata round-trips and serializes deterministically.
pub type Metadata = BTreeMap<String, String>;

/// Identifier of a storage provider.
///
/// This is a closed set: the registry knows exactly these providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriverName {
    /// Microsoft Azure Blob Storage.
    Azure,
    /// Rackspace Cloud Files.
    CloudFiles,
    /// Google Cloud Storage.
    GoogleStorage,
    /// Local filesystem.
    Local,
    /// Amazon S3 and S3-compatible services.
    S3,
}

impl DriverName {
    /// Every provider, in declaration order.
    pub const ALL: [DriverName; 5] = [
        DriverName::Azure,
        DriverName::CloudFiles,
        DriverName::GoogleStorage,
        DriverName::Local,
        DriverName::S3,
    ];

    /// Canonical upper-case identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverName::Azure => "AZURE",
            DriverName::CloudFiles => "CLOUDFILES",
            DriverName::GoogleStorage => "GOOGLESTORAGE",
            DriverName::Local => "LOCAL",
            DriverName::S3 => "S3",
        }
    }
}

impl fmt::Display for DriverName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverName {
    type Err = crate::Error;

    /// Parse a provider identifier.
    ///
    /// Matching is exact on the canonical upper-case form.
    ///
    /// # Errors
    /// - Returns a `CloudStorage` error naming the unknown identifier
    fn from_str(s: &str) -> crate::Result<Self> {
        DriverName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| crate::Error::cloud(format!("Driver '{}' does not exist.", s)))
    }
}

/// Access-control setting of a container or blob.
///
/// Drivers map this onto their native vocabulary (`public-read`,
/// `publicRead`, `blob`, `.r:*`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    /// Only the account owner can read.
    #[default]
    Private,
    /// Anyone can read objects.
    PublicRead,
    /// Anyone can read and write objects.
    PublicReadWrite,
}

impl Acl {
    /// Whether anonymous readers may fetch objects.
    pub fn is_public(&self) -> bool {
        matches!(self, Acl::PublicRead | Acl::PublicReadWrite)
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
        };
        f.write_str(value)
    }
}

impl FromStr for Acl {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "private" => Ok(Acl::Private),
            "public-read" => Ok(Acl::PublicRead),
            "public-read-write" => Ok(Acl::PublicReadWrite),
            other => Err(crate::Error::cloud(format!("Unknown ACL '{}'", other))),
        }
    }
}

/// Secret credential that zeroizes on drop.
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for signing.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn test_driver_name_round_trip() {
        for name in DriverName::ALL {
            let parsed: DriverName = name.as_str().parse().unwrap();
            assert_eq!(parsed, name);
            assert_eq!(name.to_string(), name.as_str());
        }
    }

    #[test]
    fn test_driver_names_are_unique() {
        let mut names = DriverName::ALL.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), DriverName::ALL.len());
    }

    #[test]
    fn test_driver_name_unknown_is_named() {
        let err = "DROPBOX".parse::<DriverName>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CloudStorage);
        assert!(err.to_string().contains("DROPBOX"));
    }

    #[test]
    fn test_driver_name_is_case_sensitive() {
        assert!("local".parse::<DriverName>().is_err());
    }

    #[test]
    fn test_driver_name_serde() {
        let json = serde_json::to_string(&DriverName::GoogleStorage).unwrap();
        assert_eq!(json, "\"GOOGLESTORAGE\"");
        let back: DriverName = serde_json::from_str("\"CLOUDFILES\"").unwrap();
        assert_eq!(back, DriverName::CloudFiles);
    }

    #[test]
    fn test_acl_parse_and_public() {
        assert_eq!("public-read".parse::<Acl>().unwrap(), Acl::PublicRead);
        assert!(Acl::PublicRead.is_public());
        assert!(Acl::PublicReadWrite.is_public());
        assert!(!Acl::Private.is_public());
        assert!("world".parse::<Acl>().is_err());
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    proptest! {
        #[test]
        fn prop_unknown_driver_names_fail(name in "[A-Z]{1,12}") {
            let known = DriverName::ALL.iter().any(|d| d.as_str() == name);
            prop_assert_eq!(name.parse::<DriverName>().is_ok(), known);
        }
    }
}
