//! Provider naming rules and metadata limits.
//!
//! Everything here is pure and runs before any provider call, so invalid
//! names surface as `InvalidName` without a network round trip.

use std::net::Ipv4Addr;

use cloudstorage_common::{Error, Metadata, Result};

/// Reserved directory the local driver keeps its sidecars in.
pub const LOCAL_RESERVED_DIR: &str = ".cloudstorage";

/// Longest blob path segment on the local driver; the `.json` record beside
/// it must still fit the usual 255-byte file name limit.
const LOCAL_SEGMENT_MAX: usize = 250;

fn invalid(kind: &str, name: &str, reason: &str) -> Error {
    Error::InvalidName(format!("{} name '{}' {}", kind, name, reason))
}

fn is_lower_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

fn check_length(kind: &str, name: &str, min: usize, max: usize) -> Result<()> {
    let len = name.len();
    if len < min || len > max {
        return Err(invalid(
            kind,
            name,
            &format!("must be between {} and {} characters long", min, max),
        ));
    }
    Ok(())
}

fn check_alnum_ends(kind: &str, name: &str) -> Result<()> {
    let first = name.chars().next().unwrap_or_default();
    let last = name.chars().last().unwrap_or_default();
    if !is_lower_alnum(first) || !is_lower_alnum(last) {
        return Err(invalid(
            kind,
            name,
            "must start and end with a lowercase letter or number",
        ));
    }
    Ok(())
}

fn check_not_ipv4(kind: &str, name: &str) -> Result<()> {
    if name.parse::<Ipv4Addr>().is_ok() {
        return Err(invalid(kind, name, "must not be formatted as an IP address"));
    }
    Ok(())
}

/// Directory-backed containers.
pub fn local_container(name: &str) -> Result<()> {
    check_length("Container", name, 1, 255)?;
    if name.starts_with('.') {
        return Err(invalid("Container", name, "must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
    {
        return Err(invalid(
            "Container",
            name,
            "may only contain letters, numbers, '.', '_', '-' and spaces",
        ));
    }
    Ok(())
}

/// File-backed blobs: relative paths without traversal.
pub fn local_blob(name: &str) -> Result<()> {
    check_length("Blob", name, 1, 1024)?;
    if name.contains('\\') || name.contains('\0') {
        return Err(invalid("Blob", name, "must not contain '\\' or NUL"));
    }
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid(
                "Blob",
                name,
                "must not contain empty, '.' or '..' path segments",
            ));
        }
        if segment.len() > LOCAL_SEGMENT_MAX {
            return Err(invalid(
                "Blob",
                name,
                &format!("has a path segment longer than {} bytes", LOCAL_SEGMENT_MAX),
            ));
        }
    }
    if name.split('/').next() == Some(LOCAL_RESERVED_DIR) {
        return Err(invalid("Blob", name, "uses a reserved path"));
    }
    Ok(())
}

/// S3 bucket naming rules.
pub fn s3_bucket(name: &str) -> Result<()> {
    check_length("Container", name, 3, 63)?;
    if !name.chars().all(|c| is_lower_alnum(c) || c == '.' || c == '-') {
        return Err(invalid(
            "Container",
            name,
            "may only contain lowercase letters, numbers, '.' and '-'",
        ));
    }
    check_alnum_ends("Container", name)?;
    if name.contains("..") {
        return Err(invalid("Container", name, "must not contain '..'"));
    }
    check_not_ipv4("Container", name)?;
    if name.starts_with("xn--") {
        return Err(invalid("Container", name, "must not start with 'xn--'"));
    }
    Ok(())
}

/// Azure container naming rules.
pub fn azure_container(name: &str) -> Result<()> {
    check_length("Container", name, 3, 63)?;
    if !name.chars().all(|c| is_lower_alnum(c) || c == '-') {
        return Err(invalid(
            "Container",
            name,
            "may only contain lowercase letters, numbers and '-'",
        ));
    }
    check_alnum_ends("Container", name)?;
    if name.contains("--") {
        return Err(invalid("Container", name, "must not contain consecutive dashes"));
    }
    Ok(())
}

/// Google Cloud Storage bucket naming rules.
pub fn gcs_bucket(name: &str) -> Result<()> {
    let max = if name.contains('.') { 222 } else { 63 };
    check_length("Container", name, 3, max)?;
    if !name
        .chars()
        .all(|c| is_lower_alnum(c) || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid(
            "Container",
            name,
            "may only contain lowercase letters, numbers, '.', '_' and '-'",
        ));
    }
    check_alnum_ends("Container", name)?;
    if name.split('.').any(|label| label.is_empty() || label.len() > 63) {
        return Err(invalid(
            "Container",
            name,
            "must have dot-separated parts of 1 to 63 characters",
        ));
    }
    check_not_ipv4("Container", name)?;
    if name.starts_with("goog") {
        return Err(invalid("Container", name, "must not start with 'goog'"));
    }
    if name.contains("google") || name.contains("g00gle") {
        return Err(invalid("Container", name, "must not contain 'google'"));
    }
    Ok(())
}

/// Cloud Files container naming rules.
pub fn cloudfiles_container(name: &str) -> Result<()> {
    check_length("Container", name, 1, 256)?;
    if name.contains('/') {
        return Err(invalid("Container", name, "must not contain '/'"));
    }
    Ok(())
}

/// Object key rule shared by the cloud providers: 1 to 1024 bytes.
pub fn object_key(name: &str) -> Result<()> {
    check_length("Blob", name, 1, 1024)
}

/// Google object names additionally exclude line breaks and dot names.
pub fn gcs_object(name: &str) -> Result<()> {
    object_key(name)?;
    if name.contains('\r') || name.contains('\n') {
        return Err(invalid("Blob", name, "must not contain carriage returns or line feeds"));
    }
    if name == "." || name == ".." {
        return Err(invalid("Blob", name, "must not be '.' or '..'"));
    }
    Ok(())
}

/// Azure blob names are limited in characters rather than bytes.
pub fn azure_blob(name: &str) -> Result<()> {
    let count = name.chars().count();
    if count == 0 || count > 1024 {
        return Err(invalid("Blob", name, "must be between 1 and 1024 characters long"));
    }
    Ok(())
}

/// Total size of metadata keys and values, in bytes.
pub fn metadata_size(metadata: &Metadata) -> usize {
    metadata.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Reject metadata whose combined size exceeds `limit` bytes.
pub fn metadata_total(metadata: &Metadata, limit: usize) -> Result<()> {
    let size = metadata_size(metadata);
    if size > limit {
        return Err(Error::cloud(format!(
            "Metadata is {} bytes, the provider allows at most {}",
            size, limit
        )));
    }
    Ok(())
}

/// Azure metadata keys must be valid identifiers.
pub fn azure_metadata(metadata: &Metadata) -> Result<()> {
    for key in metadata.keys() {
        let mut chars = key.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("Metadata", key, "must be a valid identifier"));
        }
    }
    metadata_total(metadata, 8 * 1024)
}

/// Cloud Files per-key and total limits.
pub fn cloudfiles_metadata(metadata: &Metadata) -> Result<()> {
    if metadata.len() > 90 {
        return Err(Error::cloud(format!(
            "{} metadata keys given, the provider allows at most 90",
            metadata.len()
        )));
    }
    for (key, value) in metadata {
        if key.len() > 128 {
            return Err(invalid("Metadata", key, "must be at most 128 bytes"));
        }
        if value.len() > 256 {
            return Err(Error::cloud(format!(
                "Metadata value for '{}' exceeds 256 bytes",
                key
            )));
        }
    }
    metadata_total(metadata, 4 * 1024)
}
