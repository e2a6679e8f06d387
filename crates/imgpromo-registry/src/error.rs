//! Error types for registry operations.

use thiserror::Error;

/// Result type alias using [`RegistryError`] as the error type.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to registry.
    #[error("Failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// A service account token could not be obtained.
    #[error("could not get service account token for {account:?}: {message}")]
    TokenUnavailable {
        /// The service account.
        account: String,
        /// Error message.
        message: String,
    },

    /// Resource not found in registry.
    #[error("Not found: {url}")]
    NotFound {
        /// Requested URL.
        url: String,
    },

    /// HTTP error from registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code; zero when no response was received.
        status: u16,
        /// Error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid image reference.
    #[error("Invalid reference format: {reference}")]
    InvalidReference {
        /// Reference string.
        reference: String,
    },

    /// Content did not hash to the digest it was fetched by.
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest.
        expected: String,
        /// Actual digest.
        actual: String,
    },

    /// A manifest media type the promoter does not handle.
    #[error("unsupported MediaType {media_type}")]
    UnsupportedMediaType {
        /// The raw media type.
        media_type: String,
    },

    /// Blob upload failed.
    #[error("Failed to upload blob: {message}")]
    UploadFailed {
        /// Error message.
        message: String,
    },

    /// Manifest push failed.
    #[error("Failed to push manifest {reference}: {message}")]
    ManifestPushFailed {
        /// Destination reference.
        reference: String,
        /// Error message.
        message: String,
    },

    /// Retries ran out before the operation succeeded.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error seen.
        last: Box<RegistryError>,
    },
}

impl RegistryError {
    /// Returns true if the operation may succeed when retried.
    ///
    /// Connection failures, timeouts, 5xx responses and 429 are transient.
    /// Other client errors and malformed responses are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_registry::RegistryError;
    ///
    /// let busy = RegistryError::HttpError { status: 503, message: String::new() };
    /// assert!(busy.is_retryable());
    ///
    /// let denied = RegistryError::HttpError { status: 403, message: String::new() };
    /// assert!(!denied.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::HttpError { status, .. } => *status == 0 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Builds an error from a non-success status and response body.
    pub(crate) fn from_status(url: &str, status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            404 => Self::NotFound {
                url: url.to_string(),
            },
            401 | 403 => Self::AuthenticationFailed {
                message: format!("{status} for {url}: {body}"),
            },
            code => Self::HttpError {
                status: code,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else if let Some(status) = err.status() {
            Self::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::HttpError {
                status: 200,
                message: format!("could not decode response: {err}"),
            }
        } else {
            Self::HttpError {
                status: 0,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = RegistryError::NotFound {
            url: "https://gcr.io/v2/foo/tags/list".to_string(),
        };
        assert_eq!(err.to_string(), "Not found: https://gcr.io/v2/foo/tags/list");
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [0, 429, 500, 502, 503] {
            let err = RegistryError::HttpError {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "{status} should be retryable");
        }
        for status in [200, 400, 401, 404] {
            let err = RegistryError::HttpError {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "{status} should not be retryable");
        }
    }

    #[test]
    fn test_from_status() {
        let url = "https://gcr.io/v2/x";
        assert!(matches!(
            RegistryError::from_status(url, reqwest::StatusCode::NOT_FOUND, String::new()),
            RegistryError::NotFound { .. }
        ));
        assert!(matches!(
            RegistryError::from_status(url, reqwest::StatusCode::UNAUTHORIZED, String::new()),
            RegistryError::AuthenticationFailed { .. }
        ));
        assert!(RegistryError::from_status(url, reqwest::StatusCode::BAD_GATEWAY, String::new())
            .is_retryable());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = RegistryError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RegistryError::HttpError {
                status: 503,
                message: "unavailable".to_string(),
            }),
        };
        assert!(err.to_string().starts_with("giving up after 3 attempts"));
        assert!(!err.is_retryable());
    }
}
