//! The registry operations the promotion engine depends on.
//!
//! Each is a trait so that dry runs and tests can substitute fakes for the
//! network.

use async_trait::async_trait;
use imgpromo_core::{Digest, ImageName, RegistryContext, Token};

use crate::error::Result;
use crate::oci::{IndexManifest, Tags};

/// Reads repository contents.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// Lists the tags, digests and child repositories of one repository.
    async fn list_tags(&self, registry: &RegistryContext, token: Option<&Token>) -> Result<Tags>;

    /// Fetches the manifest list `registry/image@digest`.
    async fn manifest_list(
        &self,
        registry: &RegistryContext,
        image: &ImageName,
        digest: &Digest,
        token: Option<&Token>,
    ) -> Result<IndexManifest>;
}

/// Copies an image between references.
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Copies `src` (pinned by digest) to `dst` (a tag or digest reference).
    ///
    /// `src_token` authorizes the reads and `dst_token` the writes; `None`
    /// falls back to the client's configured credentials.
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        src_token: Option<&Token>,
        dst_token: Option<&Token>,
    ) -> Result<()>;
}

/// Deletes manifests.
#[async_trait]
pub trait ImageDeleter: Send + Sync {
    /// Deletes `registry/image@digest`.
    async fn delete(
        &self,
        registry: &RegistryContext,
        image: &ImageName,
        digest: &Digest,
        token: Option<&Token>,
    ) -> Result<()>;
}

/// Obtains bearer tokens for service accounts.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token for `service_account`.
    ///
    /// When `use_service_account` is false the caller's own credentials are
    /// used instead of impersonating the account.
    async fn token(&self, service_account: &str, use_service_account: bool) -> Result<Token>;
}
