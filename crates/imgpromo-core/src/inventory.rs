//! Observed registry state.
//!
//! The inventory is rebuilt on every run and never persisted. Maps are
//! ordered so that iteration (and therefore logging and request order) is
//! deterministic.

use std::collections::BTreeMap;

use crate::image::{Digest, ImageName, MediaType, RegistryName, Tag};

/// The tags pointing at one digest.
pub type TagSlice = Vec<Tag>;

/// `Digest -> [Tag]` for a single image.
pub type DigestTags = BTreeMap<Digest, TagSlice>;

/// `ImageName -> Digest -> [Tag]` for a single registry.
pub type RegInvImage = BTreeMap<ImageName, DigestTags>;

/// `Registry -> ImageName -> Digest -> [Tag]`.
pub type MasterInventory = BTreeMap<RegistryName, RegInvImage>;

/// `Digest -> MediaType` for every digest whose media type was recognized.
pub type DigestMediaType = BTreeMap<Digest, MediaType>;

/// `ChildDigest -> ParentDigest` for manifests referenced by a manifest list.
pub type ParentDigest = BTreeMap<Digest, Digest>;

/// Returns the digest a tag currently points at within one image, if any.
#[must_use]
pub fn digest_for_tag<'a>(digest_tags: &'a DigestTags, tag: &Tag) -> Option<&'a Digest> {
    digest_tags
        .iter()
        .find_map(|(digest, tags)| tags.contains(tag).then_some(digest))
}
