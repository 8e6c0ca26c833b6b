//! Error taxonomy shared by every storage driver.
//!
//! Drivers translate whatever their collaborator reports (HTTP status codes,
//! provider error codes, `std::io::Error` kinds) into exactly one of these
//! variants before returning to the caller.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed cause preserved inside [`Error::CloudStorage`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication or authorization rejected by the provider.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Referenced container or blob does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Name collision with incompatible settings.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Container still holds blobs.
    ///
    /// `remaining` lists the blobs a cascading delete failed to remove; it is
    /// empty when the deletion was refused without touching any blob.
    #[error("Container not empty: {container}{}", describe_remaining(.remaining))]
    NotEmpty {
        container: String,
        remaining: Vec<String>,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Name fails the provider's naming rules.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Operation not available on this provider.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Any other provider failure.
    #[error("Cloud storage error: {message}")]
    CloudStorage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

fn describe_remaining(remaining: &[String]) -> String {
    if remaining.is_empty() {
        String::new()
    } else {
        format!(" ({} blob(s) not removed: {})", remaining.len(), remaining.join(", "))
    }
}

/// The closed set of error kinds, for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Credentials,
    NotFound,
    Conflict,
    NotEmpty,
    InvalidName,
    Unsupported,
    CloudStorage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Credentials => "CredentialsError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::NotEmpty => "NotEmptyError",
            ErrorKind::InvalidName => "InvalidNameError",
            ErrorKind::Unsupported => "UnsupportedOperationError",
            ErrorKind::CloudStorage => "CloudStorageError",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Credentials(_) => ErrorKind::Credentials,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotEmpty { .. } => ErrorKind::NotEmpty,
            Error::InvalidName(_) => ErrorKind::InvalidName,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::CloudStorage { .. } => ErrorKind::CloudStorage,
        }
    }

    /// Generic provider failure without an underlying cause.
    pub fn cloud(message: impl Into<String>) -> Self {
        Error::CloudStorage {
            message: message.into(),
            source: None,
        }
    }

    /// Generic provider failure wrapping its cause.
    pub fn cloud_with(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::CloudStorage {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Deletion refused because the container still holds blobs.
    pub fn not_empty(container: impl Into<String>) -> Self {
        Error::NotEmpty {
            container: container.into(),
            remaining: Vec::new(),
            source: None,
        }
    }

    /// Operation exceeded the configured timeout.
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Error::cloud(format!(
            "{} timed out after {}ms",
            operation,
            after.as_millis()
        ))
    }

    /// Blob names a cascading delete left behind, if any.
    pub fn remaining_blobs(&self) -> &[String] {
        match self {
            Error::NotEmpty { remaining, .. } => remaining,
            _ => &[],
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Credentials("x".into()).kind(), ErrorKind::Credentials);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::not_empty("c").kind(), ErrorKind::NotEmpty);
        assert_eq!(Error::InvalidName("x".into()).kind(), ErrorKind::InvalidName);
        assert_eq!(Error::Unsupported("x".into()).kind(), ErrorKind::Unsupported);
        assert_eq!(Error::cloud("x").kind(), ErrorKind::CloudStorage);
    }

    #[test]
    fn test_cloud_error_keeps_source() {
        let cause = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = Error::cloud_with("upload failed", cause);

        assert_eq!(err.to_string(), "Cloud storage error: upload failed");
        let source = err.source().expect("source should be preserved");
        assert!(source.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_not_empty_lists_remaining_blobs() {
        let err = Error::NotEmpty {
            container: "reports".to_string(),
            remaining: vec!["a.csv".to_string(), "b.csv".to_string()],
            source: Some(Box::new(Error::Credentials("denied".into()))),
        };

        let message = err.to_string();
        assert!(message.contains("reports"));
        assert!(message.contains("2 blob(s) not removed: a.csv, b.csv"));
        assert_eq!(err.remaining_blobs().len(), 2);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_not_empty_without_cascade() {
        let err = Error::not_empty("logs");
        assert_eq!(err.to_string(), "Container not empty: logs");
        assert!(err.remaining_blobs().is_empty());
    }

    #[test]
    fn test_timeout_is_cloud_storage_kind() {
        let err = Error::timeout("upload_blob", Duration::from_millis(250));
        assert_eq!(err.kind(), ErrorKind::CloudStorage);
        assert!(err.to_string().contains("upload_blob timed out after 250ms"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Unsupported.to_string(), "UnsupportedOperationError");
        assert_eq!(ErrorKind::NotEmpty.to_string(), "NotEmptyError");
    }
}
