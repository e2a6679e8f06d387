//! Wiping a repository.
//!
//! Used to reset test registries. Manifest lists are deleted before the
//! manifests they reference, since registries refuse to delete a manifest
//! that a list still points to.

use async_trait::async_trait;
use imgpromo_core::{Digest, ImageName, RegistryContext, RegistryName, Tag};
use imgpromo_registry::ImageDeleter;

use crate::context::SyncContext;
use crate::error::Result;
use crate::exec::{ExecSummary, RequestHandler, RequestQueue, RequestResult, RequestSource};
use crate::promoter::{print_captured_requests, PromotionRequest, RequestCapturer, TagOp};

struct DeletionSource {
    requests: Vec<PromotionRequest>,
}

#[async_trait]
impl RequestSource<PromotionRequest> for DeletionSource {
    async fn populate(&self, queue: &RequestQueue<PromotionRequest>) {
        for request in &self.requests {
            queue.enqueue(request.clone()).await;
        }
    }
}

struct DeleteHandler<'a> {
    ctx: &'a SyncContext,
    deleter: &'a dyn ImageDeleter,
}

#[async_trait]
impl RequestHandler<PromotionRequest> for DeleteHandler<'_> {
    async fn handle(
        &self,
        request: PromotionRequest,
        _queue: &RequestQueue<PromotionRequest>,
    ) -> RequestResult {
        if request.tag_op != TagOp::Delete {
            return RequestResult::failed(
                "deleting image",
                format!("unexpected {} request", request.tag_op.pretty()),
            );
        }
        let registry = self
            .ctx
            .registry_context(&request.registry_dest)
            .cloned()
            .unwrap_or_else(|| RegistryContext::new(request.registry_dest.clone()));
        let token = self.ctx.token_for(&request.registry_dest);

        tracing::info!(request = %request, "Deleting image");
        match self
            .deleter
            .delete(&registry, &request.image_name_dest, &request.digest, token)
            .await
        {
            Ok(()) => RequestResult::ok(),
            Err(err) => RequestResult::failed("deleting image", err),
        }
    }
}

fn delete_request(registry: &RegistryName, image: &ImageName, digest: &Digest) -> PromotionRequest {
    PromotionRequest {
        tag_op: TagOp::Delete,
        registry_src: registry.clone(),
        registry_dest: registry.clone(),
        service_account: String::new(),
        image_name_src: image.clone(),
        image_name_dest: image.clone(),
        digest: digest.clone(),
        digest_old: Digest::default(),
        tag: Tag::default(),
    }
}

impl SyncContext {
    /// Deletes every image the inventory holds for `registry`.
    ///
    /// Manifest lists go first, then everything else. Digests of unknown
    /// media type are skipped. Without confirmation the deletions are only
    /// captured and printed.
    pub async fn clear_repository(
        &self,
        registry: &RegistryName,
        deleter: &dyn ImageDeleter,
    ) -> Result<ExecSummary> {
        let (lists, manifests) = self.deletion_passes(registry);

        let mut total = ExecSummary::default();
        for requests in [lists, manifests] {
            let source = DeletionSource { requests };
            let summary = if self.config().confirm {
                let handler = DeleteHandler { ctx: self, deleter };
                self.exec_requests(&source, &handler).await
            } else {
                let capturer = RequestCapturer::new();
                let summary = self.exec_requests(&source, &capturer).await;
                print_captured_requests(&capturer.captured());
                summary
            };
            total.enqueued += summary.enqueued;
            total.completed += summary.completed;
            total.failed += summary.failed;
        }
        total.check()
    }

    /// Splits the registry's digests into manifest-list deletions and plain
    /// manifest deletions.
    fn deletion_passes(&self, registry: &RegistryName) -> (Vec<PromotionRequest>, Vec<PromotionRequest>) {
        let state = self.state.lock();
        let mut lists = Vec::new();
        let mut manifests = Vec::new();

        let Some(rii) = state.inv.get(registry) else {
            tracing::warn!(registry = %registry, "Nothing to clear");
            return (lists, manifests);
        };

        for (image, digest_tags) in rii {
            for digest in digest_tags.keys() {
                let Some(media_type) = state.digest_media_type.get(digest).copied() else {
                    tracing::warn!(image = %image, digest = %digest, "Could not detect media type; skipping");
                    continue;
                };
                let request = delete_request(registry, image, digest);
                if media_type.is_index() {
                    lists.push(request);
                } else {
                    manifests.push(request);
                }
            }
        }
        (lists, manifests)
    }
}
