//! Azure Blob Storage driver.
//!
//! The access key is the storage account name and the secret is the base64
//! account key. Public access is expressed with the container's public
//! access level, which has no anonymous-write setting.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use cloudstorage_common::{Acl, DriverName, Error, Metadata, Result, Secret};

use crate::checksum::base64_to_hex;
use crate::config::DriverConfig;
use crate::naming;
use crate::object::{translate_status, CloudProvider, ObjectDriver};
use crate::service::{ObjectInfo, ServiceError};
use crate::signing::sas::{SasSigner, CREATE_WRITE, READ};
use crate::signing::SignedUrl;

/// Block size for staged uploads.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Azure Blob Storage driver.
pub type AzureDriver = ObjectDriver<AzureProvider>;

impl ObjectDriver<AzureProvider> {
    /// Create an Azure driver.
    ///
    /// # Errors
    /// - Returns a `Credentials` error if no account name is configured
    pub fn connect(config: &DriverConfig) -> Result<Self> {
        Ok(ObjectDriver::new(AzureProvider::new(config)?, config))
    }
}

pub struct AzureProvider {
    account: String,
    key: Option<Secret>,
    endpoint: String,
}

impl AzureProvider {
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let account = config
            .key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Credentials("Azure requires a storage account name".to_string()))?;
        let endpoint = config
            .option("endpoint")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", account));
        Ok(Self {
            account,
            key: config.secret.clone(),
            endpoint,
        })
    }

    fn signer(&self) -> Result<SasSigner<'_>> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Credentials("Azure signing requires an account key".to_string()))?;
        SasSigner::new(&self.account, key.expose())
    }
}

impl CloudProvider for AzureProvider {
    fn name(&self) -> DriverName {
        DriverName::Azure
    }

    fn validate_container_name(&self, name: &str) -> Result<()> {
        naming::azure_container(name)
    }

    fn validate_blob_name(&self, name: &str) -> Result<()> {
        naming::azure_blob(name)
    }

    fn validate_metadata(&self, metadata: &Metadata) -> Result<()> {
        naming::azure_metadata(metadata)
    }

    fn default_chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn translate(&self, err: ServiceError) -> Error {
        match err.code.as_deref() {
            Some("ContainerNotFound" | "BlobNotFound" | "ResourceNotFound") => {
                Error::NotFound(err.message)
            }
            Some("ContainerAlreadyExists" | "ContainerBeingDeleted" | "BlobAlreadyExists") => {
                Error::Conflict(err.message)
            }
            Some(
                "AuthenticationFailed"
                | "AuthorizationFailure"
                | "InsufficientAccountPermissions",
            ) => Error::Credentials(err.message),
            Some("InvalidResourceName" | "OutOfRangeInput") => Error::InvalidName(err.message),
            Some("Md5Mismatch") => Error::cloud_with("Azure rejected the content MD5", err),
            _ => translate_status(err),
        }
    }

    /// Staged uploads carry no `Content-MD5`, single puts do.
    fn checksum(&self, object: &ObjectInfo) -> Option<String> {
        object.content_md5.as_deref().and_then(base64_to_hex)
    }

    fn acl_value(&self, acl: Acl) -> Result<&'static str> {
        match acl {
            Acl::Private => Ok("private"),
            Acl::PublicRead => Ok("container"),
            Acl::PublicReadWrite => Err(Error::Unsupported(
                "Azure containers cannot allow anonymous writes".to_string(),
            )),
        }
    }

    fn parse_acl(&self, value: Option<&str>) -> Acl {
        match value {
            Some("container" | "blob") => Acl::PublicRead,
            _ => Acl::Private,
        }
    }

    fn public_url(&self, container: &str) -> String {
        format!("{}/{}", self.endpoint, container)
    }

    /// Upload URLs are SAS URLs for a direct `PUT` of a block blob.
    fn sign_upload(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl> {
        let (url, expires_at) =
            self.signer()?
                .blob_url(&self.endpoint, container, blob, CREATE_WRITE, now, expires_in)?;
        let mut headers = fields.clone();
        headers.insert("x-ms-blob-type".to_string(), "BlockBlob".to_string());
        Ok(SignedUrl {
            url,
            method: "PUT".to_string(),
            fields: headers,
            expires_at,
        })
    }

    fn sign_download(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let (url, _) =
            self.signer()?
                .blob_url(&self.endpoint, container, blob, READ, now, expires_in)?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudstorage_common::ErrorKind;

    const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    fn provider() -> AzureProvider {
        AzureProvider::new(&DriverConfig::new().with_key("myaccount").with_secret(KEY)).unwrap()
    }

    #[test]
    fn test_account_is_required() {
        let err = AzureProvider::new(&DriverConfig::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }

    #[test]
    fn test_download_url_is_sas() {
        let url = provider()
            .sign_download("reports", "report.csv", Duration::from_secs(60), Utc::now())
            .unwrap();
        assert!(url.starts_with("https://myaccount.blob.core.windows.net/reports/report.csv?sv="));
        assert!(url.contains("&sp=r&"));
    }

    #[test]
    fn test_upload_url_is_block_blob_put() {
        let signed = provider()
            .sign_upload(
                "reports",
                "upload.bin",
                Duration::from_secs(60),
                &BTreeMap::new(),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(signed.method, "PUT");
        assert_eq!(signed.fields["x-ms-blob-type"], "BlockBlob");
        assert!(signed.url.contains("&sp=cw&"));
    }

    #[test]
    fn test_signing_requires_key() {
        let provider = AzureProvider::new(&DriverConfig::new().with_key("myaccount")).unwrap();
        let err = provider
            .sign_download("reports", "a", Duration::from_secs(60), Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credentials);
    }

    #[test]
    fn test_acl_vocabulary() {
        let provider = provider();
        assert_eq!(provider.acl_value(Acl::PublicRead).unwrap(), "container");
        assert_eq!(
            provider.acl_value(Acl::PublicReadWrite).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(provider.parse_acl(Some("blob")), Acl::PublicRead);
        assert_eq!(provider.parse_acl(None), Acl::Private);
    }

    #[test]
    fn test_checksum_from_content_md5() {
        let object = ObjectInfo {
            content_md5: Some("pExWyBd+MtNhOYj026eWLg==".to_string()),
            ..ObjectInfo::default()
        };
        assert_eq!(
            provider().checksum(&object).as_deref(),
            Some("a44c56c8177e32d3613988f4dba7962e")
        );
    }

    #[test]
    fn test_translate_codes() {
        let provider = provider();
        let kind = |code: &str, status| {
            provider
                .translate(ServiceError::new(status, Some(code), "x"))
                .kind()
        };
        assert_eq!(kind("BlobNotFound", 404), ErrorKind::NotFound);
        assert_eq!(kind("ContainerBeingDeleted", 409), ErrorKind::Conflict);
        assert_eq!(kind("AuthenticationFailed", 403), ErrorKind::Credentials);
        assert_eq!(kind("Md5Mismatch", 400), ErrorKind::CloudStorage);
    }
}
