//! Checks that gate a promotion before anything is copied.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use imgpromo_core::names::to_lqin;
use imgpromo_core::{Digest, Manifest, PromotionEdge, Set};
use imgpromo_registry::{ImageVulnProducer, Severity};
use parking_lot::Mutex;

use crate::context::SyncContext;
use crate::error::{EngineError, Result};
use crate::exec::{RequestHandler, RequestQueue, RequestResult, RequestSource};
use crate::graph::to_promotion_edges;

/// A check run before promotion.
#[async_trait]
pub trait PreCheck: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Runs the check.
    async fn run(&self) -> Result<()>;
}

/// Runs every check, logging each failure, and fails if any did.
///
/// # Errors
///
/// Returns [`EngineError::PreChecksFailed`] with the number of failed checks.
pub async fn run_checks(checks: &[&dyn PreCheck]) -> Result<()> {
    let mut failed = 0;
    for check in checks {
        tracing::info!(check = check.name(), "Running precheck");
        if let Err(err) = check.run().await {
            tracing::error!(check = check.name(), error = %err, "Precheck failed");
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(EngineError::PreChecksFailed { count: failed });
    }
    Ok(())
}

/// Rejects changes that delete promotions from the manifests.
///
/// Removing an image from a manifest does not remove it from production, so
/// such changes are almost always mistakes.
#[derive(Debug, Clone)]
pub struct ImageRemovalCheck {
    base_edges: Set<PromotionEdge>,
    proposed_edges: Set<PromotionEdge>,
}

impl ImageRemovalCheck {
    /// Compares two edge sets directly.
    pub fn new(base_edges: Set<PromotionEdge>, proposed_edges: Set<PromotionEdge>) -> Self {
        Self {
            base_edges,
            proposed_edges,
        }
    }

    /// Compares the promotions declared by two sets of manifests.
    pub fn from_manifests(base: &[Manifest], proposed: &[Manifest]) -> Result<Self> {
        Ok(Self::new(to_promotion_edges(base)?, to_promotion_edges(proposed)?))
    }

    /// Promotions present in the base but missing from the proposal.
    pub fn removed(&self) -> Vec<String> {
        self.base_edges
            .difference(&self.proposed_edges)
            .map(|edge| {
                let dst = to_lqin(&edge.dst_registry.name, &edge.dst_image_tag.name);
                if edge.is_tagless() {
                    format!("{dst}@{}", edge.digest)
                } else {
                    format!("{dst}:{}@{}", edge.dst_image_tag.tag, edge.digest)
                }
            })
            .collect()
    }
}

#[async_trait]
impl PreCheck for ImageRemovalCheck {
    fn name(&self) -> &str {
        "ImageRemovalCheck"
    }

    async fn run(&self) -> Result<()> {
        let removed = self.removed();
        if removed.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ImagesRemoved { removed })
        }
    }
}

/// Rejects promotions of images with fixable vulnerabilities at or above a
/// severity threshold.
pub struct ImageVulnCheck<'a> {
    ctx: &'a SyncContext,
    edges: &'a Set<PromotionEdge>,
    threshold: Severity,
    producer: &'a dyn ImageVulnProducer,
}

impl<'a> ImageVulnCheck<'a> {
    /// Checks the source images of `edges` through `producer`.
    pub fn new(
        ctx: &'a SyncContext,
        edges: &'a Set<PromotionEdge>,
        threshold: Severity,
        producer: &'a dyn ImageVulnProducer,
    ) -> Self {
        Self {
            ctx,
            edges,
            threshold,
            producer,
        }
    }
}

struct VulnRequest(PromotionEdge);

impl fmt::Display for VulnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.0.src_registry.name, self.0.src_image_tag.name, self.0.digest)
    }
}

struct UniqueDigests(Vec<PromotionEdge>);

#[async_trait]
impl RequestSource<VulnRequest> for UniqueDigests {
    async fn populate(&self, queue: &RequestQueue<VulnRequest>) {
        for edge in &self.0 {
            queue.enqueue(VulnRequest(edge.clone())).await;
        }
    }
}

struct ScanImage<'a> {
    producer: &'a dyn ImageVulnProducer,
    threshold: Severity,
    vulnerable: Mutex<Vec<String>>,
}

#[async_trait]
impl RequestHandler<VulnRequest> for ScanImage<'_> {
    async fn handle(&self, request: VulnRequest, _queue: &RequestQueue<VulnRequest>) -> RequestResult {
        let edge = request.0;
        let occurrences = match self.producer.occurrences(&edge).await {
            Ok(occurrences) => occurrences,
            Err(err) => return RequestResult::failed("getting vulnerabilities", err),
        };

        let mut fixable = 0;
        for occurrence in &occurrences {
            if !occurrence.is_fixable_and_severe(self.threshold) {
                continue;
            }
            fixable += 1;
            if let Some(vuln) = &occurrence.vulnerability {
                tracing::error!(
                    image = %edge.src_image_tag.name,
                    digest = %edge.digest,
                    occurrence = %occurrence.name,
                    severity = %vuln.effective_severity,
                    description = %vuln.short_description,
                    "Fixable vulnerability"
                );
            }
        }

        if fixable > 0 {
            self.vulnerable.lock().push(format!(
                "{}@{} [{fixable} fixable severe vulnerabilities, {} total]",
                edge.src_image_tag.name,
                edge.digest,
                occurrences.len()
            ));
        }
        RequestResult::ok()
    }
}

#[async_trait]
impl PreCheck for ImageVulnCheck<'_> {
    fn name(&self) -> &str {
        "ImageVulnCheck"
    }

    async fn run(&self) -> Result<()> {
        // One scan per digest is enough; every edge for it shares the image.
        let mut unique: BTreeMap<&Digest, &PromotionEdge> = BTreeMap::new();
        for edge in self.edges {
            unique.entry(&edge.digest).or_insert(edge);
        }
        let source = UniqueDigests(unique.into_values().cloned().collect());
        let handler = ScanImage {
            producer: self.producer,
            threshold: self.threshold,
            vulnerable: Mutex::new(Vec::new()),
        };

        self.ctx.exec_requests(&source, &handler).await.check()?;

        let mut images = handler.vulnerable.into_inner();
        if images.is_empty() {
            return Ok(());
        }
        images.sort();
        Err(EngineError::VulnerableImages { images })
    }
}
