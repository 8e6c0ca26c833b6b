//! Rackspace Cloud Files driver.
//!
//! Containers are published through the CDN toggle rather than an ACL.
//! Signed URLs need the account's TempURL key (`temp_url_key` option) and
//! the storage account (`account` option, e.g. `MossoCloudFS_123`).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use cloudstorage_common::{Acl, DriverName, Error, Metadata, Result};

use crate::checksum::etag_to_hex;
use crate::config::DriverConfig;
use crate::naming;
use crate::object::{CdnMode, CloudProvider, ObjectDriver};
use crate::service::ObjectInfo;
use crate::signing::tempurl::temp_url;
use crate::signing::{encode_path, expiry_instant, SignedUrl};

pub const DEFAULT_REGION: &str = "DFW";

/// Segment size for large objects.
pub const CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// Rackspace Cloud Files driver.
pub type CloudFilesDriver = ObjectDriver<CloudFilesProvider>;

impl ObjectDriver<CloudFilesProvider> {
    /// Create a Cloud Files driver.
    pub fn connect(config: &DriverConfig) -> Result<Self> {
        Ok(ObjectDriver::new(CloudFilesProvider::new(config), config))
    }
}

pub struct CloudFilesProvider {
    region: String,
    endpoint: String,
    account: Option<String>,
    temp_url_key: Option<String>,
}

impl CloudFilesProvider {
    pub fn new(config: &DriverConfig) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = config
            .option("endpoint")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| {
                format!(
                    "https://storage101.{}1.clouddrive.com",
                    region.to_lowercase()
                )
            });
        Self {
            region,
            endpoint,
            account: config.option("account").map(str::to_string),
            temp_url_key: config.option("temp_url_key").map(str::to_string),
        }
    }

    fn object_path(&self, container: &str, blob: &str) -> Result<String> {
        let account = self.account.as_deref().ok_or_else(|| {
            Error::Credentials("Cloud Files signing requires the 'account' option".to_string())
        })?;
        Ok(format!(
            "/v1/{}/{}/{}",
            account,
            encode_path(container),
            encode_path(blob)
        ))
    }

    fn temp_url_key(&self) -> Result<&str> {
        self.temp_url_key.as_deref().ok_or_else(|| {
            Error::Credentials("Cloud Files signing requires the 'temp_url_key' option".to_string())
        })
    }
}

impl CloudProvider for CloudFilesProvider {
    fn name(&self) -> DriverName {
        DriverName::CloudFiles
    }

    fn region(&self) -> Option<&str> {
        Some(&self.region)
    }

    fn validate_container_name(&self, name: &str) -> Result<()> {
        naming::cloudfiles_container(name)
    }

    fn validate_blob_name(&self, name: &str) -> Result<()> {
        naming::object_key(name)
    }

    fn validate_metadata(&self, metadata: &Metadata) -> Result<()> {
        naming::cloudfiles_metadata(metadata)
    }

    fn default_chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    /// Segmented objects report the MD5 of their segment ETags.
    fn checksum(&self, object: &ObjectInfo) -> Option<String> {
        if object.composite {
            return None;
        }
        object.etag.as_deref().and_then(etag_to_hex)
    }

    fn acl_value(&self, acl: Acl) -> Result<&'static str> {
        match acl {
            Acl::Private => Ok("private"),
            Acl::PublicRead => Ok(".r:*"),
            Acl::PublicReadWrite => Err(Error::Unsupported(
                "Cloud Files containers cannot allow anonymous writes".to_string(),
            )),
        }
    }

    fn parse_acl(&self, value: Option<&str>) -> Acl {
        match value {
            Some(v) if v.split(',').any(|grant| grant.trim() == ".r:*") => Acl::PublicRead,
            _ => Acl::Private,
        }
    }

    fn cdn_mode(&self) -> CdnMode {
        CdnMode::Toggle
    }

    fn public_url(&self, container: &str) -> String {
        match &self.account {
            Some(account) => format!("{}/v1/{}/{}", self.endpoint, account, container),
            None => format!("{}/{}", self.endpoint, container),
        }
    }

    /// Upload URLs are TempURLs for a direct `PUT`.
    fn sign_upload(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl> {
        let path = self.object_path(container, blob)?;
        let url = temp_url(self.temp_url_key()?, "PUT", &self.endpoint, &path, now, expires_in)?;
        Ok(SignedUrl {
            url,
            method: "PUT".to_string(),
            fields: fields.clone(),
            expires_at: expiry_instant(now, expires_in)?,
        })
    }

    fn sign_download(
        &self,
        container: &str,
        blob: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let path = self.object_path(container, blob)?;
        temp_url(self.temp_url_key()?, "GET", &self.endpoint, &path, now, expires_in)
    }
}
