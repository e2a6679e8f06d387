//! Error types for imgpromo core operations.
//!
//! This module defines the error types used throughout the `imgpromo-core` crate.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using [`CoreError`] as the error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in imgpromo core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// One or more validation rules failed.
    #[error("{}", join_validation(.0))]
    Validation(Vec<ValidationError>),

    /// An image reference (FQIN, PQIN, registry path) could not be parsed.
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The reference that failed to parse.
        reference: String,
        /// Reason the reference is invalid.
        reason: String,
    },

    /// A path did not match any known registry.
    #[error("unknown registry {path:?}")]
    UnknownRegistry {
        /// The image path that could not be attributed to a registry.
        path: String,
    },

    /// A manifest media type outside the supported set.
    #[error("unsupported MediaType {media_type}")]
    UnsupportedMediaType {
        /// The raw media type string.
        media_type: String,
    },

    /// A manifest has no registry marked as the promotion source.
    #[error("source registry must be set")]
    NoSourceRegistry,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an [`CoreError::InvalidReference`] error.
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unknown_registry() {
        let err = CoreError::UnknownRegistry {
            path: "gcr.io/nope/foo".to_string(),
        };
        assert_eq!(err.to_string(), "unknown registry \"gcr.io/nope/foo\"");
    }

    #[test]
    fn test_error_display_validation_joins_lines() {
        let err = CoreError::Validation(vec![
            ValidationError::required("registries"),
            ValidationError::format("images[0].dmap", "invalid digest: sha256:zz"),
        ]);
        let text = err.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("invalid digest"));
    }

    #[test]
    fn test_error_display_media_type() {
        let err = CoreError::UnsupportedMediaType {
            media_type: "application/x-unknown".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported MediaType application/x-unknown");
    }
}
