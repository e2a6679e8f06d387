//! Validation errors for promoter manifests and image references.

use std::fmt;
use once_cell::sync::Lazy;

use regex::Regex;

use crate::image::{Digest, Tag};

static DIGEST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("digest pattern is valid"));

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w[\w.-]{0,127}$").expect("tag pattern is valid"));

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field or path that failed validation.
    pub field: String,
    /// A human-readable description of the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_core::ValidationError;
    ///
    /// let error = ValidationError::new("registries", "cannot have more than 1 source registry");
    /// assert_eq!(error.field, "registries");
    /// ```
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error for a required field that is missing.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("'{field}' field cannot be empty"),
            field,
        }
    }

    /// Creates a validation error for an invalid format.
    pub fn format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Checks that a digest is a lowercase hex sha256 digest.
///
/// # Examples
///
/// ```
/// use imgpromo_core::{validate_digest, Digest};
///
/// let good = Digest::from(format!("sha256:{}", "a".repeat(64)));
/// assert!(validate_digest(&good).is_ok());
/// assert!(validate_digest(&Digest::from("sha256:abc")).is_err());
/// ```
pub fn validate_digest(digest: &Digest) -> Result<(), ValidationError> {
    if DIGEST_RE.is_match(digest.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::format("digest", format!("invalid digest: {digest}")))
    }
}

/// Checks that a tag follows the Docker tag grammar.
pub fn validate_tag(tag: &Tag) -> Result<(), ValidationError> {
    if TAG_RE.is_match(tag.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::format("tag", format!("invalid tag: {tag}")))
    }
}
