//! Promotion edges and the per-endpoint facts derived from the inventory.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::{Digest, ImageName, Tag};
use crate::inventory::{MasterInventory, TagSlice};
use crate::names::{to_fqin, to_pqin};
use crate::registry::RegistryContext;

/// An image name paired with a tag. The tag may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageTag {
    /// Image name relative to its registry.
    pub name: ImageName,
    /// Tag; empty for tagless promotions.
    pub tag: Tag,
}

impl ImageTag {
    /// Creates a new image/tag pair.
    pub fn new(name: impl Into<ImageName>, tag: impl Into<Tag>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

/// One intended copy: this digest, from the source pqin to the destination.
///
/// The digest is the sole source of truth. Edges are compared and hashed
/// over every field, so two manifests declaring the same promotion yield the
/// same edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromotionEdge {
    /// Registry the image is copied from.
    pub src_registry: RegistryContext,
    /// Source image and tag.
    pub src_image_tag: ImageTag,
    /// Digest being promoted.
    pub digest: Digest,
    /// Registry the image is copied to.
    pub dst_registry: RegistryContext,
    /// Destination image and tag.
    pub dst_image_tag: ImageTag,
}

impl PromotionEdge {
    /// Builds an edge whose destination name and tag mirror the source.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_core::{PromotionEdge, RegistryContext};
    ///
    /// let edge = PromotionEdge::new(
    ///     RegistryContext::source("gcr.io/staging"),
    ///     RegistryContext::new("gcr.io/prod"),
    ///     "foo",
    ///     "sha256:aaa",
    ///     "v1",
    /// );
    /// assert_eq!(edge.dst_image_tag.name.as_str(), "foo");
    /// assert_eq!(edge.dst_pqin(), "gcr.io/prod/foo:v1");
    /// ```
    pub fn new(
        src_registry: RegistryContext,
        dst_registry: RegistryContext,
        name: impl Into<ImageName>,
        digest: impl Into<Digest>,
        tag: impl Into<Tag>,
    ) -> Self {
        let image_tag = ImageTag::new(name, tag);
        Self {
            src_registry,
            src_image_tag: image_tag.clone(),
            digest: digest.into(),
            dst_registry,
            dst_image_tag: image_tag,
        }
    }

    /// Returns true for tagless promotions.
    #[must_use]
    pub fn is_tagless(&self) -> bool {
        self.dst_image_tag.tag.is_empty()
    }

    /// The source image pinned by digest, or `None` if any part is missing.
    #[must_use]
    pub fn src_reference(&self) -> Option<String> {
        reference(&self.src_registry, &self.src_image_tag, &self.digest)
    }

    /// The destination image pinned by digest, or `None` if any part is
    /// missing.
    #[must_use]
    pub fn dst_reference(&self) -> Option<String> {
        reference(&self.dst_registry, &self.dst_image_tag, &self.digest)
    }

    /// Destination `registry/image:tag`.
    #[must_use]
    pub fn dst_pqin(&self) -> String {
        to_pqin(
            &self.dst_registry.name,
            &self.dst_image_tag.name,
            &self.dst_image_tag.tag,
        )
    }

    /// Computes the destination and source vertex properties, in that order.
    #[must_use]
    pub fn vertex_props(&self, inv: &MasterInventory) -> (VertexProperty, VertexProperty) {
        (
            self.vertex_props_for(&self.dst_registry, &self.dst_image_tag, inv),
            self.vertex_props_for(&self.src_registry, &self.src_image_tag, inv),
        )
    }

    /// Probes the inventory for one endpoint of this edge.
    #[must_use]
    pub fn vertex_props_for(
        &self,
        registry: &RegistryContext,
        image_tag: &ImageTag,
        inv: &MasterInventory,
    ) -> VertexProperty {
        let mut props = VertexProperty::default();
        let Some(digest_tags) = inv
            .get(&registry.name)
            .and_then(|rii| rii.get(&image_tag.name))
        else {
            return props;
        };

        if let Some(tags) = digest_tags.get(&self.digest) {
            props.digest_exists = true;
            props.other_tags.clone_from(tags);
        }

        for (digest, tags) in digest_tags {
            if tags.iter().any(|tag| *tag == image_tag.tag) {
                props.pqin_exists = true;
                if *digest == self.digest {
                    props.pqin_digest_match = true;
                } else {
                    props.bad_digest = Some(digest.clone());
                }
            }
        }

        props
    }
}

fn reference(registry: &RegistryContext, image_tag: &ImageTag, digest: &Digest) -> Option<String> {
    if registry.name.is_empty() || image_tag.name.is_empty() || digest.is_empty() {
        return None;
    }
    Some(to_fqin(&registry.name, &image_tag.name, digest))
}

impl fmt::Display for PromotionEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{} ({}) -> {}/{}:{}",
            self.src_registry.name,
            self.src_image_tag.name,
            self.src_image_tag.tag,
            self.digest,
            self.dst_registry.name,
            self.dst_image_tag.name,
            self.dst_image_tag.tag,
        )
    }
}

/// Facts about one edge endpoint, computed against the live inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexProperty {
    /// The endpoint's `registry/image:tag` exists.
    pub pqin_exists: bool,
    /// The edge's digest exists under the endpoint's image.
    pub digest_exists: bool,
    /// The endpoint's tag points at the edge's digest.
    pub pqin_digest_match: bool,
    /// The digest the endpoint's tag points at, when it is not the edge's.
    pub bad_digest: Option<Digest>,
    /// Tags already pointing at the edge's digest.
    pub other_tags: TagSlice,
}
