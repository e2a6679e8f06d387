//! Registry HTTP client.
//!
//! Talks the Docker Registry HTTP API V2 plus GCR's extended tag listing.
//! Every request goes through the shared rate limiter and, for idempotent
//! operations, the retry policy.

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use imgpromo_core::names::token_key_domain_repo_path;
use imgpromo_core::{Digest, ImageName, MediaType, RegistryContext, Token};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use sha2::{Digest as _, Sha256};
use url::Url;

use crate::api::{ImageCopier, ImageDeleter, RegistryReader};
use crate::backoff::retry_notify;
use crate::config::{ClientConfig, RegistryAuth};
use crate::error::{RegistryError, Result};
use crate::oci::{ImageManifest, IndexManifest, Reference, Tags, Target};
use crate::ratelimit::RateLimiter;

/// Client for Docker/OCI registries.
#[derive(Debug)]
pub struct RegistryClient {
    config: ClientConfig,
    http: reqwest::Client,
    limiter: Option<RateLimiter>,
}

impl RegistryClient {
    /// Creates a new registry client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use imgpromo_registry::{ClientConfig, RegistryClient};
    ///
    /// let client = RegistryClient::new(ClientConfig::default())?;
    /// # Ok::<(), imgpromo_registry::RegistryError>(())
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RegistryError::ConnectionFailed {
                url: config.scheme.clone(),
                source: e,
            })?;

        Ok(Self {
            limiter: config.rate_limit.map(RateLimiter::new),
            config,
            http,
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Creates authentication headers. An explicit token takes precedence
    /// over the configured credentials.
    fn auth_headers(&self, token: Option<&Token>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let value = match (token, &self.config.auth) {
            (Some(token), _) => Some(format!("Bearer {}", token.expose())),
            (None, RegistryAuth::None) => None,
            (None, RegistryAuth::Basic { username, password }) => {
                let credentials = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{username}:{password}"),
                );
                Some(format!("Basic {credentials}"))
            }
            (None, RegistryAuth::Bearer { token }) => Some(format!("Bearer {token}")),
        };

        if let Some(value) = value {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|_| RegistryError::AuthenticationFailed {
                    message: "Invalid credentials".to_string(),
                })?,
            );
        }

        Ok(headers)
    }

    /// Sends a request, waiting for a rate limit slot first, and turns
    /// non-success statuses into errors.
    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RegistryError::from_status(url, status, body))
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_notify(&self.config.backoff, op, |err, delay| {
            tracing::warn!(operation, error = %err, ?delay, "Registry request failed, retrying");
        })
        .await
    }

    fn registry_url(&self, registry: &RegistryContext) -> Result<(String, String)> {
        let (_, domain, repo_path) = token_key_domain_repo_path(&registry.name)
            .map_err(|_| RegistryError::InvalidReference {
                reference: registry.name.to_string(),
            })?;
        Ok((self.config.base_url(domain), repo_path.to_string()))
    }

    async fn get_tags_once(&self, url: &str, token: Option<&Token>) -> Result<Tags> {
        let request = self.http.get(url).headers(self.auth_headers(token)?);
        let response = self.send(request, url).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_index_once(&self, url: &str, token: Option<&Token>) -> Result<IndexManifest> {
        let request = self
            .http
            .get(url)
            .headers(self.auth_headers(token)?)
            .header(ACCEPT, "*/*");
        let response = self.send(request, url).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete_once(&self, url: &str, token: Option<&Token>) -> Result<()> {
        let request = self.http.delete(url).headers(self.auth_headers(token)?);
        self.send(request, url).await.map(drop)
    }

    fn manifest_url(&self, reference: &Reference) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.config.base_url(&reference.domain),
            reference.repository,
            reference.target.as_str()
        )
    }

    fn blob_url(&self, reference: &Reference, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{digest}",
            self.config.base_url(&reference.domain),
            reference.repository
        )
    }

    /// Fetches a manifest, returning its raw bytes and media type.
    async fn fetch_manifest(
        &self,
        reference: &Reference,
        token: Option<&Token>,
    ) -> Result<(Vec<u8>, String)> {
        let url = self.manifest_url(reference);
        let accept = MediaType::ALL.map(MediaType::as_str).join(",");
        let (url, accept) = (url.as_str(), accept.as_str());

        let (bytes, header_type) = self
            .with_retry("fetch manifest", move || async move {
                let request = self
                    .http
                    .get(url)
                    .headers(self.auth_headers(token)?)
                    .header(ACCEPT, accept);
                let response = self.send(request, url).await?;
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
                Ok((response.bytes().await?.to_vec(), content_type))
            })
            .await?;

        if let Target::Digest(expected) = &reference.target {
            verify_digest(expected, &bytes)?;
        }

        let media_type = match header_type.filter(|t| MediaType::parse(t).is_ok()) {
            Some(t) => t,
            None => embedded_media_type(&bytes)?,
        };
        Ok((bytes, media_type))
    }

    /// Copies a manifest and everything it references. Reads use
    /// `src_token`, writes use `dst_token`.
    fn copy_manifest<'a>(
        &'a self,
        src: &'a Reference,
        dst: &'a Reference,
        src_token: Option<&'a Token>,
        dst_token: Option<&'a Token>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (bytes, media_type) = self.fetch_manifest(src, src_token).await?;
            let parsed = MediaType::parse(&media_type).map_err(|_| {
                RegistryError::UnsupportedMediaType {
                    media_type: media_type.clone(),
                }
            })?;

            if parsed.is_index() {
                let index: IndexManifest = serde_json::from_slice(&bytes)?;
                for child in &index.manifests {
                    let target = Target::Digest(child.digest.clone());
                    let child_src = Reference {
                        target: target.clone(),
                        ..src.clone()
                    };
                    let child_dst = Reference {
                        target,
                        ..dst.clone()
                    };
                    self.copy_manifest(&child_src, &child_dst, src_token, dst_token)
                        .await?;
                }
            } else {
                let manifest: ImageManifest = serde_json::from_slice(&bytes)?;
                for digest in manifest.blob_digests() {
                    self.copy_blob(src, dst, digest, src_token, dst_token).await?;
                }
            }

            self.put_manifest(dst, bytes, &media_type, dst_token).await
        })
    }

    async fn copy_blob(
        &self,
        src: &Reference,
        dst: &Reference,
        digest: &str,
        src_token: Option<&Token>,
        dst_token: Option<&Token>,
    ) -> Result<()> {
        if self.blob_exists(dst, digest, dst_token).await? {
            tracing::debug!(%dst, digest, "Blob already present");
            return Ok(());
        }

        if src.domain == dst.domain && self.mount_blob(dst, digest, &src.repository, dst_token).await {
            tracing::debug!(%dst, digest, from = %src.repository, "Mounted blob");
            return Ok(());
        }

        let url = self.blob_url(src, digest);
        let url = url.as_str();
        let data = self
            .with_retry("fetch blob", move || async move {
                let request = self.http.get(url).headers(self.auth_headers(src_token)?);
                let response = self.send(request, url).await?;
                Ok(response.bytes().await?.to_vec())
            })
            .await?;
        verify_digest(digest, &data)?;

        self.upload_blob(dst, data, digest, dst_token).await
    }

    async fn blob_exists(&self, reference: &Reference, digest: &str, token: Option<&Token>) -> Result<bool> {
        let url = self.blob_url(reference, digest);
        let url = url.as_str();
        self.with_retry("check blob", move || async move {
            let request = self.http.head(url).headers(self.auth_headers(token)?);
            match self.send(request, url).await {
                Ok(_) => Ok(true),
                Err(RegistryError::NotFound { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Attempts a cross-repository mount. Returns false if the registry
    /// declined and the blob must be uploaded.
    async fn mount_blob(&self, dst: &Reference, digest: &str, from: &str, token: Option<&Token>) -> bool {
        let url = format!(
            "{}/v2/{}/blobs/uploads/?mount={digest}&from={from}",
            self.config.base_url(&dst.domain),
            dst.repository
        );
        let Ok(headers) = self.auth_headers(token) else {
            return false;
        };
        match self.send(self.http.post(&url).headers(headers), &url).await {
            Ok(response) => response.status() == StatusCode::CREATED,
            Err(e) => {
                tracing::debug!(error = %e, digest, "Blob mount declined");
                false
            }
        }
    }

    /// Uploads a blob in a single request.
    async fn upload_blob(
        &self,
        dst: &Reference,
        data: Vec<u8>,
        digest: &str,
        token: Option<&Token>,
    ) -> Result<()> {
        let base = self.config.base_url(&dst.domain);
        let start_url = format!("{base}/v2/{}/blobs/uploads/", dst.repository);

        let request = self.http.post(&start_url).headers(self.auth_headers(token)?);
        let response = self.send(request, &start_url).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::UploadFailed {
                message: "No upload location returned".to_string(),
            })?;

        let mut upload_url = Url::parse(&base)
            .and_then(|b| b.join(location))
            .map_err(|e| RegistryError::UploadFailed {
                message: format!("invalid upload location {location:?}: {e}"),
            })?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let request = self
            .http
            .put(upload_url.as_str())
            .headers(self.auth_headers(token)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send(request, upload_url.as_str())
            .await
            .map_err(|e| RegistryError::UploadFailed {
                message: format!("{digest}: {e}"),
            })?;

        tracing::debug!(%dst, digest, "Uploaded blob");
        Ok(())
    }

    async fn put_manifest(
        &self,
        dst: &Reference,
        bytes: Vec<u8>,
        media_type: &str,
        token: Option<&Token>,
    ) -> Result<()> {
        let url = self.manifest_url(dst);
        let request = self
            .http
            .put(&url)
            .headers(self.auth_headers(token)?)
            .header(CONTENT_TYPE, media_type)
            .body(bytes);
        self.send(request, &url)
            .await
            .map_err(|e| RegistryError::ManifestPushFailed {
                reference: dst.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl RegistryReader for RegistryClient {
    async fn list_tags(&self, registry: &RegistryContext, token: Option<&Token>) -> Result<Tags> {
        let (base, repo_path) = self.registry_url(registry)?;
        let url = format!("{base}/v2/{repo_path}/tags/list");
        let url = url.as_str();
        self.with_retry("list tags", move || self.get_tags_once(url, token))
            .await
    }

    async fn manifest_list(
        &self,
        registry: &RegistryContext,
        image: &ImageName,
        digest: &Digest,
        token: Option<&Token>,
    ) -> Result<IndexManifest> {
        let (base, repo_path) = self.registry_url(registry)?;
        let url = format!("{base}/v2/{repo_path}/{image}/manifests/{digest}");
        let url = url.as_str();
        self.with_retry("fetch manifest list", move || self.get_index_once(url, token))
            .await
    }
}

#[async_trait]
impl ImageCopier for RegistryClient {
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        src_token: Option<&Token>,
        dst_token: Option<&Token>,
    ) -> Result<()> {
        let src = Reference::parse(src)?;
        let dst = Reference::parse(dst)?;
        self.copy_manifest(&src, &dst, src_token, dst_token).await?;
        tracing::info!(%src, %dst, "Copied image");
        Ok(())
    }
}

#[async_trait]
impl ImageDeleter for RegistryClient {
    async fn delete(
        &self,
        registry: &RegistryContext,
        image: &ImageName,
        digest: &Digest,
        token: Option<&Token>,
    ) -> Result<()> {
        let (base, repo_path) = self.registry_url(registry)?;
        let url = format!("{base}/v2/{repo_path}/{image}/manifests/{digest}");
        let url = url.as_str();
        self.with_retry("delete manifest", move || self.delete_once(url, token))
            .await
    }
}

/// Computes the `sha256:` digest of data.
pub(crate) fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    // Only sha256 content can be checked locally.
    if !expected.starts_with("sha256:") {
        return Ok(());
    }
    let actual = compute_digest(data);
    if actual == expected {
        Ok(())
    } else {
        Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

fn embedded_media_type(bytes: &[u8]) -> Result<String> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Probe {
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        schema_version: u32,
        #[serde(default)]
        signatures: Option<serde_json::Value>,
    }

    let probe: Probe = serde_json::from_slice(bytes)?;
    match (probe.media_type, probe.schema_version) {
        (Some(mt), _) => Ok(mt),
        (None, 1) if probe.signatures.is_some() => {
            Ok(MediaType::DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string())
        }
        (None, 1) => Ok(MediaType::DOCKER_MANIFEST_SCHEMA1.to_string()),
        (None, _) => Ok(MediaType::OCI_MANIFEST.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(RegistryClient::new(ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"test data");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }

    #[test]
    fn test_verify_digest() {
        let data = b"hello";
        assert!(verify_digest(&compute_digest(data), data).is_ok());
        assert!(matches!(
            verify_digest("sha256:0000", data),
            Err(RegistryError::DigestMismatch { .. })
        ));
        assert!(verify_digest("sha512:whatever", data).is_ok());
    }

    #[test]
    fn test_auth_headers_none() {
        let client = RegistryClient::new(ClientConfig::default()).unwrap();
        assert!(client.auth_headers(None).unwrap().is_empty());
    }

    #[test]
    fn test_auth_headers_basic() {
        let config = ClientConfig::builder()
            .auth(RegistryAuth::basic("user", "pass"))
            .build();
        let client = RegistryClient::new(config).unwrap();
        let headers = client.auth_headers(None).unwrap();
        let auth = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("Basic "));
    }

    #[test]
    fn test_token_overrides_configured_auth() {
        let config = ClientConfig::builder()
            .auth(RegistryAuth::bearer("ambient"))
            .build();
        let client = RegistryClient::new(config).unwrap();
        let token = Token::new("scoped");
        let headers = client.auth_headers(Some(&token)).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer scoped");
    }

    #[test]
    fn test_registry_url() {
        let client = RegistryClient::new(ClientConfig::default()).unwrap();
        let (base, path) = client
            .registry_url(&RegistryContext::new("gcr.io/foo/bar"))
            .unwrap();
        assert_eq!(base, "https://gcr.io");
        assert_eq!(path, "foo/bar");
        assert!(client.registry_url(&RegistryContext::new("gcr.io")).is_err());
    }

    #[test]
    fn test_embedded_media_type() {
        assert_eq!(
            embedded_media_type(br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json"}"#)
                .unwrap(),
            MediaType::OCI_INDEX
        );
        assert_eq!(
            embedded_media_type(br#"{"schemaVersion":1,"signatures":[]}"#).unwrap(),
            MediaType::DOCKER_MANIFEST_SCHEMA1_SIGNED
        );
        assert_eq!(
            embedded_media_type(br#"{"schemaVersion":2,"layers":[]}"#).unwrap(),
            MediaType::OCI_MANIFEST
        );
    }
}
