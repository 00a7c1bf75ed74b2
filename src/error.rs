use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage facade and its backends.
///
/// Nothing here is retried or recovered locally; every failure ends the
/// operation that produced it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A bucket with this name already exists.
    #[error("bucket {bucket} already exists")]
    AlreadyExists {
        /// Bucket name that collided.
        bucket: String,
    },

    /// The bucket or object does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// `bucket` or `bucket/key` that was missing.
        resource: String,
    },

    /// The storage service rejected the request.
    #[error("provider error{}: {message}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Provider {
        /// Service error code or HTTP status, when one was reported.
        code: Option<String>,
        /// Human readable message from the service.
        message: String,
    },

    /// Network or HTTP failure while fetching a presigned URL.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The local upload source could not be read.
    #[error("cannot read upload source {path}: {message}")]
    LocalSource {
        /// Path of the local file.
        path: String,
        /// Underlying failure.
        message: String,
    },

    /// The caller passed a value the store would never accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StorageError {
    pub(crate) fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub(crate) fn provider(code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// True for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for `AlreadyExists`.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
