//! MD5 content checksums.
//!
//! Providers report content digests in different shapes: S3 and Cloud Files
//! return a (sometimes quoted) hex ETag, Azure and Google return a base64
//! `Content-MD5`. Everything crossing the public API is lower-case hex.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};

use cloudstorage_common::{Error, Result};

/// Incremental MD5 over streamed content.
#[derive(Clone, Default)]
pub struct ContentHasher {
    hasher: Md5,
    length: u64,
}

impl ContentHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of content.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.length += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether nothing has been hashed yet.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Lower-case hex digest of everything fed so far.
    pub fn hex_digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

/// Lower-case hex MD5 of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Base64 MD5 of `data`, as carried in `Content-MD5` headers.
pub fn md5_base64(data: &[u8]) -> String {
    BASE64.encode(Md5::digest(data))
}

/// Normalize a caller-supplied checksum to lower-case hex.
///
/// Accepts a 32-character hex digest or a base64 encoding of the 16 raw
/// digest bytes; surrounding double quotes (as in ETags) are ignored.
///
/// # Errors
/// - Returns a `CloudStorage` error if the value is neither form
pub fn normalize(checksum: &str) -> Result<String> {
    let value = checksum.trim().trim_matches('"');

    if value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(value.to_ascii_lowercase());
    }

    base64_to_hex(value)
        .ok_or_else(|| Error::cloud(format!("Invalid MD5 checksum '{}'", checksum)))
}

/// Convert a base64 MD5 digest to hex.
pub fn base64_to_hex(value: &str) -> Option<String> {
    let bytes = BASE64.decode(value.trim()).ok()?;
    (bytes.len() == 16).then(|| hex::encode(bytes))
}

/// Convert a hex MD5 digest to base64.
pub fn hex_to_base64(value: &str) -> Option<String> {
    let bytes = hex::decode(value.trim().trim_matches('"')).ok()?;
    (bytes.len() == 16).then(|| BASE64.encode(bytes))
}

/// Extract a hex content digest from an ETag, if it is one.
pub fn etag_to_hex(etag: &str) -> Option<String> {
    let value = etag.trim().trim_matches('"');
    (value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| value.to_ascii_lowercase())
}
