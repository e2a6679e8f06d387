//! # imgpromo Core
//!
//! Core types for the imgpromo container image promoter.
//!
//! This crate holds the data model shared by the registry client, the
//! promotion engine and the CLI:
//!
//! - [`RegistryName`], [`ImageName`], [`Tag`], [`Digest`] - string newtypes
//! - [`RegistryContext`] - a root repository and its credentials
//! - [`PromotionEdge`] - one intended copy, and its [`VertexProperty`] facts
//! - [`MasterInventory`] - the observed state of every registry
//! - [`Manifest`] - the declared desired state
//! - [`GcrPubSubPayload`] - registry change notifications
//!
//! ## Example
//!
//! ```rust
//! use imgpromo_core::{Manifest, RegistryContext};
//!
//! let manifest = Manifest {
//!     registries: vec![
//!         RegistryContext::source("gcr.io/staging"),
//!         RegistryContext::new("gcr.io/prod"),
//!     ],
//!     ..Manifest::default()
//! };
//! assert_eq!(manifest.destinations().count(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod edge;
pub mod error;
pub mod image;
pub mod inventory;
pub mod manifest;
pub mod names;
pub mod pubsub;
pub mod registry;
pub mod set;
pub mod validation;

#[cfg(test)]
mod proptest_tests;

pub use edge::{ImageTag, PromotionEdge, VertexProperty};
pub use error::{CoreError, Result};
pub use image::{Digest, ImageName, MediaType, RegistryName, Tag};
pub use inventory::{DigestMediaType, DigestTags, MasterInventory, ParentDigest, RegInvImage, TagSlice};
pub use manifest::{Image, Manifest, ThinManifest};
pub use pubsub::{GcrPayloadMatch, GcrPubSubPayload};
pub use registry::{RegistryContext, RootRepo, Token};
pub use set::Set;
pub use validation::{validate_digest, validate_tag, ValidationError};
