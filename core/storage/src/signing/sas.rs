//! Azure shared access signatures (service SAS, blob resource).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

use cloudstorage_common::{Error, Result};

use super::{encode_path, encode_query_value, expiry_instant, validate_expiry};

type HmacSha256 = Hmac<Sha256>;

/// Storage service version the signature is computed for.
pub const VERSION: &str = "2020-12-06";

/// Read access.
pub const READ: &str = "r";
/// Create and write access.
pub const CREATE_WRITE: &str = "cw";

/// Signs blob URLs with an account key.
pub struct SasSigner<'a> {
    account: &'a str,
    key: Vec<u8>,
}

impl<'a> SasSigner<'a> {
    /// Create a signer from the base64 account key.
    ///
    /// # Errors
    /// - Returns a `Credentials` error if the key is not valid base64
    pub fn new(account: &'a str, key: &str) -> Result<Self> {
        let key = BASE64
            .decode(key.trim())
            .map_err(|_| Error::Credentials("Azure account key is not valid base64".to_string()))?;
        Ok(Self { account, key })
    }

    /// Sign `https://{account}.blob.core.windows.net/{container}/{blob}` for
    /// `permissions`. Returns the full URL and the expiry instant.
    pub fn blob_url(
        &self,
        endpoint: &str,
        container: &str,
        blob: &str,
        permissions: &str,
        now: DateTime<Utc>,
        expires_in: Duration,
    ) -> Result<(String, DateTime<Utc>)> {
        validate_expiry(expires_in, None)?;
        let expires_at = expiry_instant(now, expires_in)?;
        let expiry = expires_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let resource = format!("/blob/{}/{}/{}", self.account, container, blob);

        // permissions, start, expiry, resource, identifier, ip, protocol,
        // version, resource type, snapshot, encryption scope, then the five
        // response header overrides.
        let string_to_sign = [
            permissions,
            "",
            &expiry,
            &resource,
            "",
            "",
            "https",
            VERSION,
            "b",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]
        .join("\n");

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let url = format!(
            "{}/{}/{}?sv={}&se={}&sr=b&sp={}&spr=https&sig={}",
            endpoint.trim_end_matches('/'),
            encode_path(container),
            encode_path(blob),
            VERSION,
            encode_query_value(&expiry),
            permissions,
            encode_query_value(&signature)
        );
        Ok((url, expires_at))
    }
}
