//! Registry inventory reads.
//!
//! A registry, in the loose sense used here, is a root repository such as
//! `gcr.io/google-containers`. Child repositories below it look like
//! directories; some hold images, some are empty. Reading walks the tree one
//! repository per request and files every repository that holds digests
//! under its root registry in the master inventory.

use async_trait::async_trait;
use imgpromo_core::names::split_by_known_registries;
use imgpromo_core::{
    Digest, DigestTags, ImageName, MediaType, PromotionEdge, RegInvImage, RegistryContext, RegistryName,
    Set, Tag,
};
use imgpromo_registry::RegistryReader;

use crate::context::SyncContext;
use crate::exec::{ExecSummary, RequestHandler, RequestQueue, RequestResult, RequestSource};

struct RegistrySource<'a> {
    to_read: &'a [RegistryContext],
}

#[async_trait]
impl RequestSource<RegistryContext> for RegistrySource<'_> {
    async fn populate(&self, queue: &RequestQueue<RegistryContext>) {
        for rc in self.to_read {
            queue.enqueue(rc.clone()).await;
        }
    }
}

struct ReadRepository<'a> {
    ctx: &'a SyncContext,
    reader: &'a dyn RegistryReader,
    recurse: bool,
}

#[async_trait]
impl RequestHandler<RegistryContext> for ReadRepository<'_> {
    async fn handle(
        &self,
        rc: RegistryContext,
        queue: &RequestQueue<RegistryContext>,
    ) -> RequestResult {
        let token = self.ctx.token_for(&rc.name);
        let tags = match self.reader.list_tags(&rc, token).await {
            Ok(tags) => tags,
            Err(err) => {
                // Don't promote anything touching a repository we failed to read.
                self.ctx
                    .state
                    .lock()
                    .ignore_from_promotion(&rc.name, self.ctx.registry_contexts());
                return RequestResult::failed("reading registry tags", err);
            }
        };

        let mut digest_tags = DigestTags::new();
        let mut media_types: Vec<(Digest, MediaType)> = Vec::new();
        for (digest, info) in tags.manifest {
            match MediaType::parse(&info.media_type) {
                Ok(media_type) => media_types.push((Digest::from(digest.as_str()), media_type)),
                Err(err) => tracing::warn!(digest = %digest, error = %err, "Skipping media type"),
            }
            digest_tags.insert(Digest::from(digest), info.tag.into_iter().map(Tag::from).collect());
        }

        // Empty repositories are just path segments; leave them out.
        let mut result = RequestResult::ok();
        if !digest_tags.is_empty() {
            match split_by_known_registries(rc.name.as_str(), self.ctx.registry_contexts()) {
                Ok((root, image)) => {
                    tracing::debug!(registry = %root, image = %image, digests = digest_tags.len(), "Read repository");
                    let mut state = self.ctx.state.lock();
                    state.digest_media_type.extend(media_types);
                    state.inv.entry(root).or_default().insert(image, digest_tags);
                }
                Err(err) => result = RequestResult::failed("splitting repository name", err),
            }
        }

        if self.recurse {
            for child in &tags.child {
                queue.defer(rc.child(child));
            }
        }

        result
    }
}

impl SyncContext {
    /// Reads every repository in `to_read` into the inventory, descending
    /// into child repositories when `recurse` is set.
    ///
    /// Unreadable repositories are logged and their images are excluded from
    /// promotion; the read itself never fails.
    pub async fn read_registries(
        &self,
        to_read: &[RegistryContext],
        recurse: bool,
        reader: &dyn RegistryReader,
    ) -> ExecSummary {
        tracing::info!(registries = to_read.len(), recurse, "Reading registries");
        let source = RegistrySource { to_read };
        let handler = ReadRepository {
            ctx: self,
            reader,
            recurse,
        };
        let summary = self.exec_requests(&source, &handler).await;
        if summary.failed > 0 {
            tracing::warn!(failed = summary.failed, "Some repositories could not be read");
        }
        summary
    }

    /// Drops tagless digests that are only reachable through a manifest
    /// list.
    pub fn remove_child_digest_entries(&self, rii: &RegInvImage) -> RegInvImage {
        let state = self.state.lock();
        let mut filtered = RegInvImage::new();
        for (image, digest_tags) in rii {
            for (digest, tags) in digest_tags {
                if tags.is_empty() && state.parent_digest.contains_key(digest) {
                    continue;
                }
                filtered
                    .entry(image.clone())
                    .or_default()
                    .insert(digest.clone(), tags.clone());
            }
        }
        filtered
    }
}

/// Keeps only the digests carrying `tag`, and only that tag on each.
pub fn filter_by_tag(rii: &RegInvImage, tag: &Tag) -> RegInvImage {
    let mut filtered = RegInvImage::new();
    for (image, digest_tags) in rii {
        for (digest, tags) in digest_tags {
            let matching: Vec<Tag> = tags.iter().filter(|t| *t == tag).cloned().collect();
            if !matching.is_empty() {
                filtered
                    .entry(image.clone())
                    .or_default()
                    .entry(digest.clone())
                    .or_default()
                    .extend(matching);
            }
        }
    }
    filtered
}

/// The repositories an edge set touches, as `{registry}/{image}` contexts
/// for both endpoints.
pub fn registries_to_read(edges: &Set<PromotionEdge>) -> Vec<RegistryContext> {
    let mut contexts = Set::new();
    for edge in edges {
        for (registry, image) in [
            (&edge.src_registry, &edge.src_image_tag.name),
            (&edge.dst_registry, &edge.dst_image_tag.name),
        ] {
            let mut rc = registry.clone();
            rc.name = RegistryName::from(format!("{}/{image}", registry.name));
            contexts.insert(rc);
        }
    }
    contexts.into_iter().collect()
}

/// The destination side of every edge promoting into `dest_registry`, as an
/// inventory fragment relative to that registry.
pub fn edges_to_reg_inv_image(edges: &Set<PromotionEdge>, dest_registry: &str) -> RegInvImage {
    let dest_registry = dest_registry.trim_end_matches('/');
    let mut rii = RegInvImage::new();

    for edge in edges {
        let Some(prefix) = edge.dst_registry.name.as_str().strip_prefix(dest_registry) else {
            continue;
        };
        let name = if prefix.is_empty() {
            edge.dst_image_tag.name.to_string()
        } else {
            format!("{prefix}/{}", edge.dst_image_tag.name)
        };
        let name = ImageName::from(name.trim_start_matches('/'));

        let tags = rii.entry(name).or_default().entry(edge.digest.clone()).or_default();
        if !edge.is_tagless() {
            tags.push(edge.dst_image_tag.tag.clone());
        }
    }

    rii
}
