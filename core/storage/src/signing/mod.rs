//! Signed URL generation.
//!
//! Signing is pure computation over the account credentials: no provider
//! call is made, so URLs can be generated offline. Each scheme takes the
//! signing instant explicitly, which keeps the output reproducible.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use cloudstorage_common::{Error, Result};

#[cfg(feature = "azure")]
pub mod sas;
#[cfg(any(feature = "s3", feature = "google"))]
pub mod sigv4;
#[cfg(feature = "rackspace")]
pub mod tempurl;

/// Everything but RFC 3986 unreserved characters.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// As [`QUERY_VALUE`], keeping path separators.
const PATH: &AsciiSet = &QUERY_VALUE.remove(b'/');

/// Percent-encode a query parameter name or value.
pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Percent-encode an object key for use in a URL path.
pub fn encode_path(key: &str) -> String {
    utf8_percent_encode(key, PATH).to_string()
}

/// A time-limited URL granting a third party access without credentials.
///
/// For uploads, `fields` holds the form fields (or headers) the uploader must
/// send along; download URLs carry everything in the query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    /// Target URL.
    pub url: String,
    /// HTTP method the URL is signed for.
    pub method: String,
    /// Form fields or headers to send with the request.
    pub fields: BTreeMap<String, String>,
    /// Instant after which the provider rejects the URL.
    pub expires_at: DateTime<Utc>,
}

/// Reject expiry windows the providers cannot express.
///
/// # Errors
/// - Returns a `CloudStorage` error for a zero window or one longer than
///   `max` (when the scheme has a maximum)
pub fn validate_expiry(expires_in: Duration, max: Option<Duration>) -> Result<()> {
    if expires_in.as_secs() == 0 {
        return Err(Error::cloud("Signed URL expiry must be at least one second"));
    }
    if let Some(max) = max {
        if expires_in > max {
            return Err(Error::cloud(format!(
                "Signed URL expiry of {}s exceeds the provider maximum of {}s",
                expires_in.as_secs(),
                max.as_secs()
            )));
        }
    }
    Ok(())
}

/// Expiry instant of a window starting at `now`.
///
/// # Errors
/// - Returns a `CloudStorage` error if the instant is past the representable
///   calendar range
pub fn expiry_instant(now: DateTime<Utc>, expires_in: Duration) -> Result<DateTime<Utc>> {
    i64::try_from(expires_in.as_secs())
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or_else(|| {
            Error::cloud(format!(
                "Signed URL expiry of {}s is out of range",
                expires_in.as_secs()
            ))
        })
}
