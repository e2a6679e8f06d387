//! Error types for the engine crate.
//!
//! Soft failures (unreadable repositories, lost images, failed copies) are
//! collected into the run's [`CollectedLogs`](crate::CollectedLogs) and
//! surface here only as the aggregate [`EngineError::RequestsFailed`].
//! Consistency failures abort the run outright.

use imgpromo_core::CoreError;
use imgpromo_registry::RegistryError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during a promotion run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// At least one request of an execution batch reported errors.
    #[error("encountered an error while executing requests")]
    RequestsFailed {
        /// Number of requests that reported errors.
        failed: usize,
    },

    /// Two or more edges want different digests at the same destination.
    #[error("overlapping edges detected")]
    OverlappingEdges {
        /// The contested destination `registry/image:tag` values.
        destinations: Vec<String>,
    },

    /// Edges that would move an existing destination tag.
    #[error("{}", .messages.join("; "))]
    TagMoves {
        /// One message per offending edge.
        messages: Vec<String>,
    },

    /// Images with fixable vulnerabilities at or above the threshold.
    #[error(
        "VulnerabilityCheck: The following vulnerable images were found:\n    {}",
        .images.join("\n    ")
    )]
    VulnerableImages {
        /// One entry per vulnerable image, sorted.
        images: Vec<String>,
    },

    /// Promotions present in the base manifests that the proposal drops.
    #[error(
        "the following images were removed in this pull request: {}",
        .removed.join(", ")
    )]
    ImagesRemoved {
        /// One entry per removed promotion, sorted.
        removed: Vec<String>,
    },

    /// One or more prechecks failed.
    #[error("{count} error(s) encountered during the prechecks")]
    PreChecksFailed {
        /// Number of failed checks.
        count: usize,
    },

    /// A service account token could not be obtained.
    #[error("could not get service account token for {service_account:?}: {source}")]
    Token {
        /// The service account.
        service_account: String,
        /// Underlying error.
        #[source]
        source: RegistryError,
    },

    /// Core model error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns true for errors that abort the whole batch rather than a single
    /// image.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OverlappingEdges { .. } | Self::TagMoves { .. } | Self::Core(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_failed_display() {
        let err = EngineError::RequestsFailed { failed: 3 };
        assert_eq!(err.to_string(), "encountered an error while executing requests");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_vulnerable_images_display() {
        let err = EngineError::VulnerableImages {
            images: vec!["a@sha256:1 [1 fixable severe vulnerabilities, 2 total]".to_string(), "b@sha256:2 [3 fixable severe vulnerabilities, 3 total]".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "VulnerabilityCheck: The following vulnerable images were found:\n    \
             a@sha256:1 [1 fixable severe vulnerabilities, 2 total]\n    \
             b@sha256:2 [3 fixable severe vulnerabilities, 3 total]"
        );
    }

    #[test]
    fn test_overlap_is_fatal() {
        let err = EngineError::OverlappingEdges {
            destinations: vec!["gcr.io/prod/foo:v1".to_string()],
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "overlapping edges detected");
    }
}
