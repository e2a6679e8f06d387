//! Image naming primitives.
//!
//! Registries, image names, tags and digests are all plain strings on the
//! wire. Each gets its own newtype so that a tag can never be passed where a
//! digest is expected. A digest is content-addressed and immutable; a tag is
//! a mutable pointer to a digest.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new value from anything string-like.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the value is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// A registry name: the registry domain plus the root repository path,
    /// e.g. `gcr.io/k8s-staging-foo`.
    RegistryName
);

name_type!(
    /// An image name relative to its registry, e.g. `foo/bar`.
    ImageName
);

name_type!(
    /// A mutable tag. The empty tag denotes a tagless promotion.
    Tag
);

name_type!(
    /// A content digest such as `sha256:...`.
    Digest
);

/// Manifest media types understood by the promoter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MediaType {
    /// Docker multi-architecture manifest list.
    DockerManifestList,
    /// Docker image manifest, schema 1.
    DockerManifestSchema1,
    /// Signed Docker image manifest, schema 1.
    DockerManifestSchema1Signed,
    /// Docker image manifest, schema 2.
    DockerManifestSchema2,
    /// OCI image manifest.
    OciManifestSchema1,
    /// OCI image index.
    OciImageIndex,
}

impl MediaType {
    /// Docker manifest list media type string.
    pub const DOCKER_MANIFEST_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    /// Docker schema 1 media type string.
    pub const DOCKER_MANIFEST_SCHEMA1: &'static str =
        "application/vnd.docker.distribution.manifest.v1+json";
    /// Signed Docker schema 1 media type string.
    pub const DOCKER_MANIFEST_SCHEMA1_SIGNED: &'static str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";
    /// Docker schema 2 media type string.
    pub const DOCKER_MANIFEST_SCHEMA2: &'static str =
        "application/vnd.docker.distribution.manifest.v2+json";
    /// OCI manifest media type string.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";
    /// OCI index media type string.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// Parses a media type string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMediaType`] for anything outside the
    /// supported set.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_core::MediaType;
    ///
    /// let mt = MediaType::parse("application/vnd.docker.distribution.manifest.list.v2+json").unwrap();
    /// assert!(mt.is_index());
    /// assert!(MediaType::parse("text/plain").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            Self::DOCKER_MANIFEST_LIST => Ok(Self::DockerManifestList),
            Self::DOCKER_MANIFEST_SCHEMA1 => Ok(Self::DockerManifestSchema1),
            Self::DOCKER_MANIFEST_SCHEMA1_SIGNED => Ok(Self::DockerManifestSchema1Signed),
            Self::DOCKER_MANIFEST_SCHEMA2 => Ok(Self::DockerManifestSchema2),
            Self::OCI_MANIFEST => Ok(Self::OciManifestSchema1),
            Self::OCI_INDEX => Ok(Self::OciImageIndex),
            other => Err(CoreError::UnsupportedMediaType {
                media_type: other.to_string(),
            }),
        }
    }

    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DockerManifestList => Self::DOCKER_MANIFEST_LIST,
            Self::DockerManifestSchema1 => Self::DOCKER_MANIFEST_SCHEMA1,
            Self::DockerManifestSchema1Signed => Self::DOCKER_MANIFEST_SCHEMA1_SIGNED,
            Self::DockerManifestSchema2 => Self::DOCKER_MANIFEST_SCHEMA2,
            Self::OciManifestSchema1 => Self::OCI_MANIFEST,
            Self::OciImageIndex => Self::OCI_INDEX,
        }
    }

    /// Returns true for multi-architecture index types whose children must
    /// be resolved (and deleted) separately.
    #[must_use]
    pub const fn is_index(self) -> bool {
        matches!(self, Self::DockerManifestList | Self::OciImageIndex)
    }

    /// All media types, in `Accept` header order.
    pub const ALL: [Self; 6] = [
        Self::DockerManifestList,
        Self::OciImageIndex,
        Self::DockerManifestSchema2,
        Self::OciManifestSchema1,
        Self::DockerManifestSchema1Signed,
        Self::DockerManifestSchema1,
    ];
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
