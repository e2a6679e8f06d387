//! Registry change notifications.
//!
//! GCR publishes a message for every push and delete. Matching a message
//! against the manifests tells an auditor whether the change was intended.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::image::{Digest, Tag};
use crate::manifest::{Image, Manifest};
use crate::registry::RegistryContext;

/// A GCR Pub/Sub change payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcrPubSubPayload {
    /// `INSERT` or `DELETE`.
    pub action: String,

    /// The changed image pinned by digest, e.g. `gcr.io/foo/bar@sha256:...`.
    #[serde(rename = "digest", default, skip_serializing_if = "String::is_empty")]
    pub fqin: String,

    /// The changed tag, e.g. `gcr.io/foo/bar:v1`.
    #[serde(rename = "tag", default, skip_serializing_if = "String::is_empty")]
    pub pqin: String,

    /// `registry/image`, derived from the FQIN or PQIN.
    #[serde(skip)]
    pub path: String,

    /// Derived from the FQIN.
    #[serde(skip)]
    pub digest: Digest,

    /// Derived from the PQIN.
    #[serde(skip)]
    pub tag: Tag,
}

/// How closely a payload matches a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcrPayloadMatch {
    /// The payload's path is a declared destination image.
    pub path_match: bool,
    /// The payload's digest is declared for that image.
    pub digest_match: bool,
    /// The payload's tag is declared for that digest.
    pub tag_match: bool,
    /// The digest matched but the tag did not. Someone moved a tag by hand.
    pub tag_mismatch: bool,
}

impl GcrPubSubPayload {
    /// Splits the FQIN and PQIN into path, digest and tag.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidReference`] if either reference does not
    /// split into exactly two parts.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_core::GcrPubSubPayload;
    ///
    /// let mut payload: GcrPubSubPayload = serde_json::from_str(
    ///     r#"{"action":"INSERT","digest":"gcr.io/foo/bar@sha256:000","tag":"gcr.io/foo/bar:1.0"}"#,
    /// ).unwrap();
    /// payload.populate_extra_fields().unwrap();
    /// assert_eq!(payload.path, "gcr.io/foo/bar");
    /// assert_eq!(payload.tag.as_str(), "1.0");
    /// ```
    pub fn populate_extra_fields(&mut self) -> Result<()> {
        if !self.fqin.is_empty() {
            let (path, digest) = split_exactly(&self.fqin, '@')
                .ok_or_else(|| CoreError::invalid_reference(&self.fqin, "invalid FQIN"))?;
            self.digest = Digest::from(digest);
            self.path = path.to_string();
        }

        if !self.pqin.is_empty() {
            let (path, tag) = split_exactly(&self.pqin, ':')
                .ok_or_else(|| CoreError::invalid_reference(&self.pqin, "invalid PQIN"))?;
            self.tag = Tag::from(tag);
            self.path = path.to_string();
        }

        Ok(())
    }

    /// Checks whether this payload is declared by a manifest.
    #[must_use]
    pub fn matches(&self, manifest: &Manifest) -> GcrPayloadMatch {
        let mut m = GcrPayloadMatch::default();
        for rc in &manifest.registries {
            m = self.match_images(rc, &manifest.images);
            if m.path_match {
                return m;
            }
        }
        m
    }

    fn match_images(&self, rc: &RegistryContext, images: &[Image]) -> GcrPayloadMatch {
        let mut m = GcrPayloadMatch::default();
        // Payloads name the destination image, never the source.
        if rc.src || !self.path.starts_with(rc.name.as_str()) {
            return m;
        }

        for image in images {
            m = self.match_image(rc, image);
            if m.path_match {
                return m;
            }
        }
        m
    }

    fn match_image(&self, rc: &RegistryContext, image: &Image) -> GcrPayloadMatch {
        let mut m = GcrPayloadMatch::default();

        if self.path != format!("{}/{}", rc.name, image.name) {
            return m;
        }
        m.path_match = true;

        let Some(tags) = image.dmap.get(&self.digest) else {
            return m;
        };
        m.digest_match = true;

        if self.tag.is_empty() {
            return m;
        }

        m.tag_match = tags.contains(&self.tag);
        m.tag_mismatch = !m.tag_match;
        m
    }
}

fn split_exactly(s: &str, sep: char) -> Option<(&str, &str)> {
    let (head, tail) = s.split_once(sep)?;
    (!tail.contains(sep)).then_some((head, tail))
}

impl fmt::Display for GcrPubSubPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{Action: {:?}, FQIN: {:?}, PQIN: {:?}, Path: {:?}, Digest: {:?}, Tag: {:?}}}",
            self.action,
            self.fqin,
            self.pqin,
            self.path,
            self.digest.as_str(),
            self.tag.as_str(),
        )
    }
}
