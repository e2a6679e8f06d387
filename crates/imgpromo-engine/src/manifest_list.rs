//! Manifest list resolution.
//!
//! A child manifest of a multi-architecture list is usually untagged. The
//! parent map built here lets later stages recognise such digests as part of
//! their list instead of treating them as standalone images.

use std::fmt;

use async_trait::async_trait;
use imgpromo_core::{Digest, ImageName, RegistryContext, Tag};
use imgpromo_registry::RegistryReader;

use crate::context::SyncContext;
use crate::exec::{ExecSummary, RequestHandler, RequestQueue, RequestResult, RequestSource};

/// One manifest list to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestListRequest {
    /// Registry holding the list.
    pub registry: RegistryContext,
    /// Image the list belongs to.
    pub image: ImageName,
    /// First tag of the list, if any.
    pub tag: Option<Tag>,
    /// Digest of the list.
    pub digest: Digest,
}

impl fmt::Display for ManifestListRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.registry.name, self.image, self.digest)
    }
}

struct ManifestListSource<'a> {
    ctx: &'a SyncContext,
}

impl ManifestListSource<'_> {
    fn requests(&self) -> Vec<ManifestListRequest> {
        let state = self.ctx.state.lock();
        let mut requests = Vec::new();
        for (registry, rii) in &state.inv {
            let rc = self
                .ctx
                .registry_context(registry)
                .cloned()
                .unwrap_or_else(|| RegistryContext::new(registry.clone()));
            for (image, digest_tags) in rii {
                for (digest, tags) in digest_tags {
                    if !state
                        .digest_media_type
                        .get(digest)
                        .is_some_and(|mt| mt.is_index())
                    {
                        continue;
                    }
                    requests.push(ManifestListRequest {
                        registry: rc.clone(),
                        image: image.clone(),
                        tag: tags.first().cloned(),
                        digest: digest.clone(),
                    });
                }
            }
        }
        requests
    }
}

#[async_trait]
impl RequestSource<ManifestListRequest> for ManifestListSource<'_> {
    async fn populate(&self, queue: &RequestQueue<ManifestListRequest>) {
        for request in self.requests() {
            queue.enqueue(request).await;
        }
    }
}

struct ReadManifestList<'a> {
    ctx: &'a SyncContext,
    reader: &'a dyn RegistryReader,
}

#[async_trait]
impl RequestHandler<ManifestListRequest> for ReadManifestList<'_> {
    async fn handle(
        &self,
        request: ManifestListRequest,
        _queue: &RequestQueue<ManifestListRequest>,
    ) -> RequestResult {
        let token = self.ctx.token_for(&request.registry.name);
        let list = match self
            .reader
            .manifest_list(&request.registry, &request.image, &request.digest, token)
            .await
        {
            Ok(list) => list,
            Err(err) => return RequestResult::failed("reading manifest list", err),
        };

        let mut state = self.ctx.state.lock();
        for child in list.manifests {
            state
                .parent_digest
                .insert(Digest::from(child.digest), request.digest.clone());
        }
        RequestResult::ok()
    }
}

impl SyncContext {
    /// Fetches every manifest list in the inventory and records each child
    /// digest's parent.
    pub async fn read_manifest_lists(&self, reader: &dyn RegistryReader) -> ExecSummary {
        let source = ManifestListSource { ctx: self };
        let handler = ReadManifestList { ctx: self, reader };
        let summary = self.exec_requests(&source, &handler).await;
        if summary.failed > 0 {
            tracing::warn!(failed = summary.failed, "Some manifest lists could not be read");
        }
        summary
    }
}
