//! Registry wire types.
//!
//! The tag listing is GCR's extended `/v2/<name>/tags/list` response, which
//! carries child repositories and per-digest metadata in addition to the
//! plain tag list of the OCI Distribution Specification.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Response from the `/v2/<name>/tags/list` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags {
    /// Repository name.
    #[serde(default)]
    pub name: String,

    /// Child repositories directly under this one.
    #[serde(default)]
    pub child: Vec<String>,

    /// Per-digest metadata.
    #[serde(default)]
    pub manifest: BTreeMap<String, ManifestInfo>,

    /// Every tag in the repository.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Metadata about one manifest in a GCR tag listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    /// Manifest media type.
    #[serde(default)]
    pub media_type: String,

    /// Tags pointing at the manifest.
    #[serde(default)]
    pub tag: Vec<String>,

    /// Compressed image size, as a decimal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_size_bytes: String,

    /// Creation time in milliseconds since the epoch, as a decimal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_created_ms: String,

    /// Upload time in milliseconds since the epoch, as a decimal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_uploaded_ms: String,
}

/// OCI content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default)]
    pub media_type: String,

    /// Digest of the targeted content.
    pub digest: String,

    /// Size in bytes of the content.
    #[serde(default)]
    pub size: u64,

    /// Target platform of an index entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// Platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture.
    pub architecture: String,
    /// Operating system.
    pub os: String,
    /// Architecture variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// A manifest list or OCI image index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    /// Schema version (always 2).
    #[serde(default)]
    pub schema_version: u32,

    /// Media type of this manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Child manifests.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// A single-platform image manifest, any schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Schema version.
    #[serde(default)]
    pub schema_version: u32,

    /// Image configuration blob (schema 2 and OCI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    /// Layer blobs (schema 2 and OCI).
    #[serde(default)]
    pub layers: Vec<Descriptor>,

    /// Layer blobs (schema 1).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fs_layers: Vec<FsLayer>,
}

/// A schema 1 layer reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    /// Layer digest.
    pub blob_sum: String,
}

impl ImageManifest {
    /// Digests of every blob the manifest references, deduplicated, config
    /// first.
    #[must_use]
    pub fn blob_digests(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let all = self
            .config
            .iter()
            .chain(self.layers.iter())
            .map(|d| d.digest.as_str())
            .chain(self.fs_layers.iter().map(|l| l.blob_sum.as_str()));
        for digest in all {
            if !out.contains(&digest) {
                out.push(digest);
            }
        }
        out
    }
}

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A mutable tag.
    Tag(String),
    /// An immutable digest.
    Digest(String),
}

impl Target {
    /// The string used in `/manifests/<target>` URLs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(s) | Self::Digest(s) => s,
        }
    }
}

/// A parsed image reference, `domain/repository[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Registry host, with port if any.
    pub domain: String,
    /// Repository path below the domain.
    pub repository: String,
    /// Tag or digest.
    pub target: Target,
}

impl Reference {
    /// Parses `domain/repository@digest` or `domain/repository:tag`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidReference`] if the reference has no
    /// repository, or names neither a tag nor a digest.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_registry::{Reference, Target};
    ///
    /// let r = Reference::parse("localhost:5000/foo/bar:v1").unwrap();
    /// assert_eq!(r.domain, "localhost:5000");
    /// assert_eq!(r.repository, "foo/bar");
    /// assert_eq!(r.target, Target::Tag("v1".to_string()));
    /// ```
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = || RegistryError::InvalidReference {
            reference: reference.to_string(),
        };

        let (domain, rest) = reference.split_once('/').ok_or_else(invalid)?;
        if domain.is_empty() || rest.is_empty() {
            return Err(invalid());
        }

        let (repository, target) = if let Some((repo, digest)) = rest.split_once('@') {
            (repo, Target::Digest(digest.to_string()))
        } else {
            let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
            let colon = rest[last_slash..].rfind(':').ok_or_else(invalid)?;
            let split = last_slash + colon;
            (&rest[..split], Target::Tag(rest[split + 1..].to_string()))
        };

        if repository.is_empty() || target.as_str().is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            domain: domain.to_string(),
            repository: repository.to_string(),
            target,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Tag(tag) => write!(f, "{}/{}:{tag}", self.domain, self.repository),
            Target::Digest(digest) => write!(f, "{}/{}@{digest}", self.domain, self.repository),
        }
    }
}
