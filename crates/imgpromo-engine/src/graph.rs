//! Promotion graph construction.
//!
//! Turns declared manifests into promotion edges, rejects conflicting
//! intent, and filters the edges against the observed inventory down to the
//! copies that still need doing.

use std::collections::BTreeMap;

use imgpromo_core::{CoreError, Digest, Manifest, MasterInventory, PromotionEdge, Set, Tag};
use imgpromo_registry::RegistryReader;

use crate::context::{LoggedError, SyncContext};
use crate::error::{EngineError, Result};
use crate::inventory::registries_to_read;

/// Expands manifests into every declared promotion and checks the result
/// for overlaps.
///
/// Each image digest yields one edge per destination registry and declared
/// tag, or a single tagless edge when the digest has no tags.
///
/// # Errors
///
/// Returns [`CoreError::NoSourceRegistry`] for a manifest without a source,
/// or [`EngineError::OverlappingEdges`] if two edges want different digests
/// at the same destination tag.
pub fn to_promotion_edges(manifests: &[Manifest]) -> Result<Set<PromotionEdge>> {
    let mut edges = Set::new();
    for manifest in manifests {
        let src = manifest
            .src_registry
            .as_ref()
            .or_else(|| manifest.registries.iter().find(|rc| rc.src))
            .ok_or(CoreError::NoSourceRegistry)?;

        for image in &manifest.images {
            for (digest, tags) in &image.dmap {
                for dst in manifest.registries.iter().filter(|rc| *rc != src) {
                    let edge = |tag: Tag| {
                        PromotionEdge::new(src.clone(), dst.clone(), image.name.clone(), digest.clone(), tag)
                    };
                    if tags.is_empty() {
                        edges.insert(edge(Tag::default()));
                    } else {
                        edges.extend(tags.iter().cloned().map(edge));
                    }
                }
            }
        }
    }
    check_overlapping_edges(edges)
}

/// Checks that no two edges claim the same destination tag with different
/// digests.
///
/// Edges that agree on the digest are redundant and collapse to one.
/// Tagless edges have no destination tag and pass through unchecked.
///
/// # Errors
///
/// Returns [`EngineError::OverlappingEdges`] listing every contested
/// destination.
pub fn check_overlapping_edges(edges: Set<PromotionEdge>) -> Result<Set<PromotionEdge>> {
    let mut checked = Set::new();
    let mut intent: BTreeMap<String, BTreeMap<Digest, Vec<PromotionEdge>>> = BTreeMap::new();

    for edge in edges {
        if edge.is_tagless() {
            checked.insert(edge);
            continue;
        }
        intent
            .entry(edge.dst_pqin())
            .or_default()
            .entry(edge.digest.clone())
            .or_default()
            .push(edge);
    }

    let mut overlapping = Vec::new();
    for (pqin, by_digest) in intent {
        if by_digest.len() > 1 {
            tracing::error!(
                destination = %pqin,
                "Multiple edges want to promote different digests to the same destination"
            );
            for (digest, group) in &by_digest {
                for edge in group {
                    tracing::error!(destination = %pqin, digest = %digest, edge = %edge, "Conflicting edge");
                }
            }
            overlapping.push(pqin);
            continue;
        }

        for (_, group) in by_digest {
            if group.len() > 1 {
                tracing::info!(
                    destination = %pqin,
                    count = group.len(),
                    "Redundant promotion: multiple edges promote the same digest to the same destination"
                );
            }
            if let Some(first) = group.into_iter().next() {
                checked.insert(first);
            }
        }
    }

    if overlapping.is_empty() {
        Ok(checked)
    } else {
        Err(EngineError::OverlappingEdges {
            destinations: overlapping,
        })
    }
}

/// Describes the tag move `edge` would perform, if any.
fn tag_move(inv: &MasterInventory, edge: &PromotionEdge) -> Option<String> {
    let (dp, _) = edge.vertex_props(inv);
    if dp.pqin_exists && !dp.digest_exists {
        let bad = dp.bad_digest.map(|d| d.to_string()).unwrap_or_default();
        return Some(format!(
            "edge {edge}: tag '{}' in dest points to {bad}, not {} (as per the manifest), but tag moves are not supported; skipping",
            edge.dst_image_tag.tag, edge.digest,
        ));
    }
    None
}

impl SyncContext {
    /// Filters edges down to those that still need promoting.
    ///
    /// Returns the edges to promote and whether the run is clean. A run is
    /// unclean when some edge would move an existing destination tag; such
    /// edges are dropped and need human attention.
    pub fn get_promotion_candidates(&self, edges: &Set<PromotionEdge>) -> (Set<PromotionEdge>, bool) {
        let mut clean = true;
        let mut to_promote = Set::new();
        let mut lost = Vec::new();
        let state = self.state.lock();

        for edge in edges {
            if state.inv_ignore.contains(&edge.src_image_tag.name) {
                tracing::warn!(edge = %edge, "Ignoring because the image could not be read");
                continue;
            }

            let (dp, sp) = edge.vertex_props(&state.inv);

            if edge.is_tagless() && dp.digest_exists {
                if !sp.digest_exists {
                    let message = format!(
                        "{}/{}@{} was already promoted, but it is LOST in the source registry (please backfill it)",
                        edge.src_registry.name, edge.src_image_tag.name, edge.digest
                    );
                    tracing::error!(edge = %edge, "{message}");
                    lost.push(LoggedError::new("lost image", message));
                }
                continue;
            }

            if !sp.digest_exists {
                let message = format!(
                    "skipping {}/{}@{} because it is LOST (not found in the source registry)",
                    edge.src_registry.name, edge.src_image_tag.name, edge.digest
                );
                tracing::error!(edge = %edge, "{message}");
                lost.push(LoggedError::new("lost image", message));
                continue;
            }

            if dp.pqin_digest_match {
                tracing::info!(edge = %edge, "Skipping because it was already promoted");
                continue;
            }

            if dp.pqin_exists {
                let current = dp.bad_digest.as_ref().map(ToString::to_string).unwrap_or_default();
                let message = format!(
                    "tag {} move detected from {current} to {}",
                    edge.dst_image_tag.tag, edge.digest
                );
                tracing::error!(edge = %edge, "{message}");
                lost.push(LoggedError::new("tag move", message));
                clean = false;
                continue;
            }

            if dp.digest_exists {
                tracing::info!(
                    edge = %edge,
                    other_tags = ?dp.other_tags,
                    "Digest already exists at the destination; adding the tag"
                );
            } else {
                tracing::info!(edge = %edge, "Regular promotion");
            }
            to_promote.insert(edge.clone());
        }

        drop(state);
        self.record_errors(lost);
        (to_promote, clean)
    }


    /// Fails if any edge would move an existing destination tag, listing all
    /// of them.
    pub fn validate_edges(&self, edges: &Set<PromotionEdge>) -> Result<()> {
        let state = self.state.lock();
        let messages: Vec<String> = edges.iter().filter_map(|e| tag_move(&state.inv, e)).collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(EngineError::TagMoves { messages })
        }
    }

    /// Optionally reads exactly the repositories `edges` touch, then filters
    /// the edges with [`SyncContext::get_promotion_candidates`].
    pub async fn filter_promotion_edges(
        &self,
        edges: &Set<PromotionEdge>,
        reader: &dyn RegistryReader,
        read_repos: bool,
    ) -> (Set<PromotionEdge>, bool) {
        if read_repos {
            let registries = registries_to_read(edges);
            for rc in &registries {
                tracing::info!(registry = %rc.name, src = rc.src, "Reading registry");
            }
            // The exact repositories are known, so no recursion.
            self.read_registries(&registries, false, reader).await;
        }
        self.get_promotion_candidates(edges)
    }
}
