//! imgpromo Promotion Engine
//!
//! Copies container images from staging registries to production
//! registries, as declared by promoter manifests.
//!
//! # Overview
//!
//! A run proceeds in stages, each built on the same bounded worker pool
//! ([`SyncContext::exec_requests`]):
//! - **Inventory**: read every repository under the declared registries
//! - **Manifest lists**: resolve which digests are children of a list
//! - **Graph**: expand manifests into promotion edges and filter them
//!   against the inventory
//! - **Prechecks**: gate the promotion on vulnerabilities and removals
//! - **Promotion**: copy each remaining edge, or capture it on a dry run
//!
//! Tags are never moved. An edge that would repoint an existing destination
//! tag marks the run unclean and is not promoted.
//!
//! # Example
//!
//! ```rust,ignore
//! use imgpromo_engine::{to_promotion_edges, SyncConfig, SyncContext};
//!
//! let edges = to_promotion_edges(&manifests)?;
//! let ctx = SyncContext::with_tokens(&manifests, SyncConfig::default(), &tokens).await?;
//! ctx.read_registries(ctx.registry_contexts(), true, &client).await;
//! let (to_promote, clean) = ctx.get_promotion_candidates(&edges);
//! ctx.promote_or_capture(&to_promote, &client).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::unused_async)]

pub mod checks;
pub mod clear;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod graph;
pub mod inventory;
pub mod manifest_list;
pub mod promoter;


// Re-export main types at crate root
pub use checks::{run_checks, ImageRemovalCheck, ImageVulnCheck, PreCheck};
pub use config::{SyncConfig, SyncConfigBuilder, DEFAULT_WORKERS};
pub use context::{CollectedLogs, LoggedError, SyncContext, SyncState};
pub use error::{EngineError, Result};
pub use exec::{ExecSummary, PendingRequests, RequestHandler, RequestQueue, RequestResult, RequestSource};
pub use graph::{check_overlapping_edges, to_promotion_edges};
pub use inventory::{edges_to_reg_inv_image, filter_by_tag, registries_to_read};
pub use manifest_list::ManifestListRequest;
pub use promoter::{
    print_captured_requests, CapturedRequests, CopyHandler, PromotionRequest, RequestCapturer, TagOp,
};
