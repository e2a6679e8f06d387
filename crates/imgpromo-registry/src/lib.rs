//! # imgpromo Registry
//!
//! Registry I/O for the imgpromo container image promoter.
//!
//! ## Features
//!
//! - **Inventory reads**: GCR-extended tag listing and manifest list fetches
//! - **Image copy**: manifests, manifest lists and blobs, with cross-repository
//!   mounts and digest verification
//! - **Deletion**: manifests by digest
//! - **Vulnerabilities**: Container Analysis occurrence listing
//! - **Resilience**: exponential backoff with jitter and a shared rate limiter
//!
//! The engine depends only on the [`RegistryReader`], [`ImageCopier`],
//! [`ImageDeleter`], [`TokenProvider`] and [`ImageVulnProducer`] traits;
//! [`RegistryClient`] and [`ContainerAnalysisClient`] are the network
//! implementations.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgpromo_core::RegistryContext;
//! use imgpromo_registry::{ClientConfig, RegistryClient, RegistryReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RegistryClient::new(ClientConfig::default())?;
//!     let tags = client
//!         .list_tags(&RegistryContext::new("gcr.io/k8s-staging-foo"), None)
//!         .await?;
//!     println!("{} digests", tags.manifest.len());
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod api;
mod auth;
mod backoff;
mod client;
mod config;
mod error;
mod oci;
mod ratelimit;
mod vuln;

pub use api::{ImageCopier, ImageDeleter, RegistryReader, TokenProvider};
pub use auth::{GcloudTokenProvider, StaticTokenProvider};
pub use backoff::retry_notify;
pub use client::RegistryClient;
pub use config::{BackoffPolicy, ClientConfig, ClientConfigBuilder, RateLimit, RegistryAuth};
pub use error::{RegistryError, Result};
pub use oci::{Descriptor, FsLayer, ImageManifest, IndexManifest, ManifestInfo, Platform, Reference, Tags, Target};
pub use ratelimit::RateLimiter;
pub use vuln::{
    ContainerAnalysisClient, ImageVulnProducer, Occurrence, Severity, Vulnerability,
    CONTAINER_ANALYSIS_ENDPOINT,
};
