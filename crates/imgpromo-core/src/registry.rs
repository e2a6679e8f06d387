//! Registry contexts and credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::RegistryName;

/// A root repository the promoter reads from or writes to.
///
/// In GCR-style registries each root repository (`gcr.io/<project>`) has its
/// own service account whose credentials extend to every child repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryContext {
    /// Registry domain plus project path.
    pub name: RegistryName,

    /// Service account used to access this registry.
    #[serde(rename = "service-account", default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,

    /// Marks the promotion source.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub src: bool,
}

impl RegistryContext {
    /// Creates a non-source registry context.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_core::RegistryContext;
    ///
    /// let rc = RegistryContext::new("gcr.io/prod").with_service_account("sa@prod");
    /// assert!(!rc.src);
    /// assert_eq!(rc.service_account, "sa@prod");
    /// ```
    pub fn new(name: impl Into<RegistryName>) -> Self {
        Self {
            name: name.into(),
            service_account: String::new(),
            src: false,
        }
    }

    /// Creates a source registry context.
    pub fn source(name: impl Into<RegistryName>) -> Self {
        Self {
            src: true,
            ..Self::new(name)
        }
    }

    /// Sets the service account.
    #[must_use]
    pub fn with_service_account(mut self, service_account: impl Into<String>) -> Self {
        self.service_account = service_account.into();
        self
    }

    /// Derives a context for a child repository, inheriting the parent's
    /// credentials. Children are only ever read, so the source flag is not
    /// carried over.
    #[must_use]
    pub fn child(&self, child: &str) -> Self {
        Self {
            name: RegistryName::new(format!("{}/{child}", self.name)),
            service_account: self.service_account.clone(),
            src: false,
        }
    }
}

impl fmt::Display for RegistryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}

/// The top-level repository key for credentials, e.g. `gcr.io/foo`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootRepo(pub String);

/// A bearer token for one root repository.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for use in an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}
