//! Swift TempURL signatures, as used by Cloud Files.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::Duration;

use cloudstorage_common::Result;

use super::{expiry_instant, validate_expiry};

type HmacSha1 = Hmac<Sha1>;

fn sign(key: &str, message: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Sign a TempURL for `method` on `path` (`/v1/{account}/{container}/{object}`).
///
/// `base` is the storage endpoint without the path.
pub fn temp_url(
    key: &str,
    method: &str,
    base: &str,
    path: &str,
    now: DateTime<Utc>,
    expires_in: Duration,
) -> Result<String> {
    validate_expiry(expires_in, None)?;
    let expires = expiry_instant(now, expires_in)?.timestamp();
    let signature = sign(key, &format!("{}\n{}\n{}", method, expires, path));
    Ok(format!(
        "{}{}?temp_url_sig={}&temp_url_expires={}",
        base.trim_end_matches('/'),
        path,
        signature,
        expires
    ))
}
