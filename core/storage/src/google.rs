//! Google Cloud Storage driver, authenticated with HMAC interoperability keys.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use cloudstorage_common::{Acl, DriverName, Error, Metadata, Result, Secret};

use crate::checksum::base64_to_hex;
use crate::config::DriverConfig;
use crate::naming;
use crate::object::{translate_status, CloudProvider, ObjectDriver};
use crate::service::{ObjectInfo, ServiceError};
use crate::signing::sigv4::{Signer, GOOG};
use crate::signing::{encode_path, SignedUrl};

pub const ENDPOINT: &str = "https://storage.googleapis.com";

/// Chunk size for resumable uploads.
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

pub const METADATA_LIMIT: usize = 8 * 1024;

/// Region component of the signing scope.
const SIGNING_REGION: &str = "auto";

/// Google Cloud Storage driver.
pub type GoogleStorageDriver = ObjectDriver<GoogleProvider>;

impl ObjectDriver<GoogleProvider> {
    /// Create a Google Cloud Storage driver.
    ///
    /// # Errors
    /// - Returns a `CloudStorage` error for a malformed `endpoint` option
    pub fn connect(config: &DriverConfig) -> Result<Self> {
        Ok(ObjectDriver::new(GoogleProvider::new(config)?, config))
    }
}

pub struct GoogleProvider {
    access_key: Option<String>,
    secret: Option<Secret>,
    region: Option<String>,
    endpoint: Url,
}

impl GoogleProvider {
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let raw = config.option("endpoint").unwrap_or(ENDPOINT);
        let endpoint = Url::parse(raw)
            .map_err(|e| Error::cloud_with(format!("Invalid storage endpoint '{}'", raw), e))?;
        Ok(Self {
            access_key: config.key.clone(),
            secret: config.secret.clone(),
            region: config.region.clone(),
            endpoint,
        })
    }

    fn signer(&self) -> Result<Signer<'_>> {
        match (&self.access_key, &self.secret) {
            (Some(key), Some(secret)) => {
                Ok(Signer::new(GOOG, key, secret.expose(), SIGNING_REGION))
            }
            _ => Err(Error::Credentials(
                "Google Cloud Storage signing requires an HMAC access key and secret".to_string(),
            )),
        }
    }

    fn base(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }
}

impl CloudProvider for GoogleProvider {
    fn name(&self) -> DriverName {
        DriverName::GoogleStorage
    }

    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn validate_container_name(&self, name: &str) -> Result<()> {
        naming::gcs_bucket(name)
    }

    fn validate_blob_name(&self, name: &str) -> Result<()> {
        naming::gcs_object(name)
    }

    fn validate_metadata(&self, metadata: &Metadata) -> Result<()> {
        naming::metadata_total(metadata, METADATA_LIMIT)
    }

    fn default_chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn translate(&self, err: ServiceError) -> Error {
        match err.code.as_deref() {
            Some("notFound") => Error::NotFound(err.message),
            Some("conflict") => Error::Conflict(err.message),
            Some("unauthorized" | "forbidden" | "authError") => Error::Credentials(err.message),
            Some("invalid") if err.status == Some(400) => {
                Error::cloud_with("Request rejected by Google Cloud Storage", err)
            }
            _ => translate_status(err),
        }
    }

    /// Composed objects only carry a CRC32C, so they report no MD5.
    fn checksum(&self, object: &ObjectInfo) -> Option<String> {
        object.content_md5.as_deref().and_then(base64_to_hex)
    }

    fn acl_value(&self, acl: Acl) -> Result<&'static str> {
        Ok(match acl {
            Acl::Private => "private",
            Acl::PublicRead => "publicRead",
            Acl::PublicReadWrite => "publicReadWrite",
        })
    }

    fn parse_acl(&self, value: Option<&str>) -> Acl {
        match value {
            Some("publicRead") => Acl::PublicRead,
            Some("publicReadWrite") => Acl::PublicReadWrite,
            _ => Acl::Private,
        }
    }

    fn public_url(&self, container: &str) -> String {
        format!("{}/{}", self.base(), container)
    }

    fn sign_upload(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl> {
        let action = format!("{}/{}", self.base(), container);
        self.signer()?
            .post_policy(action, container, blob, now, expires_in, fields)
    }

    fn sign_download(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let path = format!("/{}/{}", container, encode_path(blob));
        self.signer()?
            .presign("GET", &self.endpoint, &path, now, expires_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudstorage_common::ErrorKind;

    fn provider() -> GoogleProvider {
        GoogleProvider::new(
            &DriverConfig::new()
                .with_key("GOOGTS7C7FUP3AIRVJTE2BCD")
                .with_secret("bGoa+V7g/yqDXvKRqq+JTFn4uQZbPiQJo4pf9RzJ"),
        )
        .unwrap()
    }

    #[test]
    fn test_download_url_uses_goog_scheme() {
        let url = provider()
            .sign_download("reports", "2024/q1.csv", Duration::from_secs(60), Utc::now())
            .unwrap();
        assert!(url.starts_with("https://storage.googleapis.com/reports/2024/q1.csv?"));
        assert!(url.contains("X-Goog-Algorithm=GOOG4-HMAC-SHA256"));
        assert!(url.contains("%2Fauto%2Fstorage%2Fgoog4_request"));
        assert!(url.contains("X-Goog-Signature="));
    }

    #[test]
    fn test_upload_policy_posts_to_bucket() {
        let signed = provider()
            .sign_upload(
                "reports",
                "upload.bin",
                Duration::from_secs(60),
                &BTreeMap::new(),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(signed.url, "https://storage.googleapis.com/reports");
        assert_eq!(signed.method, "POST");
        assert!(signed.fields.contains_key("x-goog-signature"));
    }

    #[test]
    fn test_signing_requires_credentials() {
        let provider = GoogleProvider::new(&DriverConfig::new()).unwrap();
        let err = provider
            .sign_download("reports", "a", Duration::from_secs(60), Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }

    #[test]
    fn test_acl_round_trip() {
        let provider = provider();
        for acl in [Acl::Private, Acl::PublicRead, Acl::PublicReadWrite] {
            let value = provider.acl_value(acl).unwrap();
            assert_eq!(provider.parse_acl(Some(value)), acl);
        }
        assert_eq!(provider.parse_acl(Some("projectPrivate")), Acl::Private);
    }

    #[test]
    fn test_translate_codes() {
        let provider = provider();
        let kind = |code: &str, status| {
            provider
                .translate(ServiceError::new(status, Some(code), "x"))
                .kind()
        };
        assert_eq!(kind("notFound", 404), ErrorKind::NotFound);
        assert_eq!(kind("conflict", 409), ErrorKind::Conflict);
        assert_eq!(kind("unauthorized", 401), ErrorKind::Credentials);
        assert_eq!(kind("invalid", 400), ErrorKind::CloudStorage);
    }
}
