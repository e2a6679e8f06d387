//! Promotion execution.
//!
//! Edges become [`PromotionRequest`]s, which a handler either performs
//! ([`CopyHandler`]) or records for review ([`RequestCapturer`]).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use imgpromo_core::names::{to_fqin, to_lqin, to_pqin};
use imgpromo_core::{Digest, ImageName, PromotionEdge, RegistryName, Set, Tag};
use imgpromo_registry::ImageCopier;
use parking_lot::Mutex;
use serde::Serialize;

use crate::context::SyncContext;
use crate::error::Result;
use crate::exec::{ExecSummary, RequestHandler, RequestQueue, RequestResult, RequestSource};

/// What a request does to the destination tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TagOp {
    /// Copy the image and add the tag.
    Add,
    /// Repoint an existing tag. Never performed.
    Move,
    /// Remove the image.
    Delete,
}

impl TagOp {
    /// Upper-case name used in request summaries.
    pub fn pretty(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Move => "MOVE",
            Self::Delete => "DELETE",
        }
    }
}

/// One unit of registry work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PromotionRequest {
    /// Operation to perform.
    pub tag_op: TagOp,
    /// Source registry.
    pub registry_src: RegistryName,
    /// Destination registry.
    pub registry_dest: RegistryName,
    /// Service account used against the destination.
    pub service_account: String,
    /// Source image name.
    pub image_name_src: ImageName,
    /// Destination image name.
    pub image_name_dest: ImageName,
    /// Digest being promoted.
    pub digest: Digest,
    /// Digest the tag pointed at before a move; empty otherwise.
    pub digest_old: Digest,
    /// Destination tag; empty for tagless promotions.
    pub tag: Tag,
}

impl PromotionRequest {
    /// The request that performs `edge`.
    pub fn add(edge: &PromotionEdge) -> Self {
        Self {
            tag_op: TagOp::Add,
            registry_src: edge.src_registry.name.clone(),
            registry_dest: edge.dst_registry.name.clone(),
            service_account: edge.dst_registry.service_account.clone(),
            image_name_src: edge.src_image_tag.name.clone(),
            image_name_dest: edge.dst_image_tag.name.clone(),
            digest: edge.digest.clone(),
            digest_old: Digest::default(),
            tag: edge.dst_image_tag.tag.clone(),
        }
    }

    /// Source image pinned by digest.
    pub fn src_fqin(&self) -> String {
        to_fqin(&self.registry_src, &self.image_name_src, &self.digest)
    }

    /// Destination reference: by tag if there is one, by digest otherwise.
    pub fn dst_reference(&self) -> String {
        if self.tag.is_empty() {
            to_fqin(&self.registry_dest, &self.image_name_dest, &self.digest)
        } else {
            to_pqin(&self.registry_dest, &self.image_name_dest, &self.tag)
        }
    }

    /// One-line human summary.
    pub fn pretty(&self) -> String {
        let mut line = format!(
            "{} -> {}: Tag: '{}' <{}> {}",
            to_lqin(&self.registry_src, &self.image_name_src),
            to_lqin(&self.registry_dest, &self.image_name_dest),
            self.tag,
            self.tag_op.pretty(),
            self.digest,
        );
        if !self.digest_old.is_empty() {
            line.push_str(&format!(" (move from '{}')", self.digest_old));
        }
        line
    }
}

impl fmt::Display for PromotionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

/// Multiset of requests seen by a [`RequestCapturer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedRequests(BTreeMap<PromotionRequest, usize>);

impl CapturedRequests {
    /// Records one occurrence of `request`.
    pub fn record(&mut self, request: PromotionRequest) {
        *self.0.entry(request).or_default() += 1;
    }

    /// How many times `request` was recorded.
    pub fn count(&self, request: &PromotionRequest) -> usize {
        self.0.get(request).copied().unwrap_or_default()
    }

    /// Number of distinct requests.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Distinct requests with their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&PromotionRequest, usize)> {
        self.0.iter().map(|(r, n)| (r, *n))
    }

    /// Every distinct request's summary line, sorted.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.0.keys().map(PromotionRequest::pretty).collect();
        lines.sort();
        lines
    }

    /// The printable summary of every captured request.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No requests captured.".to_string();
        }
        let mut out = String::from("captured reqs summary:\n");
        for line in self.lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// Prints the captured requests, sorted, to stdout.
pub fn print_captured_requests(captured: &CapturedRequests) {
    println!("{}", captured.summary().trim_end());
}

/// Handler that records requests instead of performing them.
#[derive(Debug, Default)]
pub struct RequestCapturer {
    captured: Mutex<CapturedRequests>,
}

impl RequestCapturer {
    /// Creates an empty capturer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything captured so far.
    pub fn captured(&self) -> CapturedRequests {
        self.captured.lock().clone()
    }
}

#[async_trait]
impl RequestHandler<PromotionRequest> for RequestCapturer {
    async fn handle(
        &self,
        request: PromotionRequest,
        _queue: &RequestQueue<PromotionRequest>,
    ) -> RequestResult {
        self.captured.lock().record(request);
        RequestResult::ok()
    }
}

/// Handler that copies images, authorizing each side with the token of
/// its root repository.
pub struct CopyHandler<'a> {
    ctx: &'a SyncContext,
    copier: &'a dyn ImageCopier,
}

impl<'a> CopyHandler<'a> {
    /// Copies through `copier`, with tokens from `ctx`.
    pub fn new(ctx: &'a SyncContext, copier: &'a dyn ImageCopier) -> Self {
        Self { ctx, copier }
    }
}

#[async_trait]
impl RequestHandler<PromotionRequest> for CopyHandler<'_> {
    async fn handle(
        &self,
        request: PromotionRequest,
        _queue: &RequestQueue<PromotionRequest>,
    ) -> RequestResult {
        match request.tag_op {
            TagOp::Add => {
                let (src, dst) = (request.src_fqin(), request.dst_reference());
                let src_token = self.ctx.token_for(&request.registry_src);
                let dst_token = self.ctx.token_for(&request.registry_dest);
                tracing::info!(
                    src = %src,
                    dst = %dst,
                    service_account = %request.service_account,
                    authorized = dst_token.is_some(),
                    "Copying image"
                );
                match self.copier.copy(&src, &dst, src_token, dst_token).await {
                    Ok(()) => RequestResult::ok(),
                    Err(err) => RequestResult::failed("copying image", err),
                }
            }
            TagOp::Move => {
                tracing::info!(request = %request, "Tag moves are no longer supported");
                RequestResult::ok()
            }
            TagOp::Delete => {
                tracing::info!(request = %request, "Deletions are no longer supported");
                RequestResult::ok()
            }
        }
    }
}

struct PromotionSource<'a> {
    ctx: &'a SyncContext,
    edges: &'a Set<PromotionEdge>,
}

#[async_trait]
impl RequestSource<PromotionRequest> for PromotionSource<'_> {
    async fn populate(&self, queue: &RequestQueue<PromotionRequest>) {
        if self.ctx.config().confirm {
            tracing::info!("---------- BEGIN PROMOTION ----------");
        } else {
            tracing::info!("---------- BEGIN PROMOTION (DRY RUN) ----------");
        }

        for edge in self.edges {
            queue.enqueue(PromotionRequest::add(edge)).await;
        }
    }
}

impl SyncContext {
    /// Runs one request per edge through `handler`.
    ///
    /// # Errors
    ///
    /// Fails before any request runs if an edge would move a tag, and after
    /// the batch if any request failed.
    pub async fn promote(
        &self,
        edges: &Set<PromotionEdge>,
        handler: &dyn RequestHandler<PromotionRequest>,
    ) -> Result<ExecSummary> {
        if edges.is_empty() {
            tracing::info!("Nothing to promote.");
            return Ok(ExecSummary::default());
        }

        for edge in edges {
            tracing::info!(edge = %edge, "Pending promotion");
        }
        self.validate_edges(edges)?;

        let source = PromotionSource { ctx: self, edges };
        self.exec_requests(&source, handler).await.check()
    }

    /// Promotes `edges`, copying when the run is confirmed and printing the
    /// captured requests otherwise.
    pub async fn promote_or_capture(
        &self,
        edges: &Set<PromotionEdge>,
        copier: &dyn ImageCopier,
    ) -> Result<ExecSummary> {
        if self.config().confirm {
            return self.promote(edges, &CopyHandler::new(self, copier)).await;
        }
        let capturer = RequestCapturer::new();
        let summary = self.promote(edges, &capturer).await?;
        print_captured_requests(&capturer.captured());
        Ok(summary)
    }
}
