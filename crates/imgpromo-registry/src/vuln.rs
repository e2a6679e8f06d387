//! Vulnerability occurrences from Container Analysis.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use imgpromo_core::names::token_key_domain_repo_path;
use imgpromo_core::PromotionEdge;
use serde::{Deserialize, Serialize};

use crate::api::TokenProvider;
use crate::backoff::retry_notify;
use crate::config::ClientConfig;
use crate::error::{RegistryError, Result};
use crate::ratelimit::RateLimiter;

/// Container Analysis REST endpoint.
pub const CONTAINER_ANALYSIS_ENDPOINT: &str = "https://containeranalysis.googleapis.com/v1";

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Unknown.
    #[default]
    #[serde(rename = "SEVERITY_UNSPECIFIED")]
    Unspecified,
    /// Minimal.
    Minimal,
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical.
    Critical,
}

impl Severity {
    /// Returns true if this severity meets `threshold`.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgpromo_registry::Severity;
    ///
    /// assert!(Severity::Critical.is_at_least(Severity::High));
    /// assert!(Severity::High.is_at_least(Severity::High));
    /// assert!(!Severity::Medium.is_at_least(Severity::High));
    /// ```
    #[must_use]
    pub fn is_at_least(self, threshold: Self) -> bool {
        self >= threshold
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "SEVERITY_UNSPECIFIED",
            Self::Minimal => "MINIMAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEVERITY_UNSPECIFIED" | "UNSPECIFIED" => Ok(Self::Unspecified),
            "MINIMAL" => Ok(Self::Minimal),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

/// One analysis finding attached to an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    /// Resource name of the occurrence.
    #[serde(default)]
    pub name: String,
    /// The image the finding applies to.
    #[serde(default)]
    pub resource_uri: String,
    /// Kind of finding, `VULNERABILITY` for the ones used here.
    #[serde(default)]
    pub kind: String,
    /// Vulnerability details, when the kind is `VULNERABILITY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerability: Option<Vulnerability>,
}

/// Details of a vulnerability finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    /// Severity as published by the vulnerability source.
    #[serde(default)]
    pub severity: Severity,
    /// Severity adjusted for the distribution the package came from.
    #[serde(default)]
    pub effective_severity: Severity,
    /// Whether any affected package has a fix.
    #[serde(default)]
    pub fix_available: bool,
    /// CVSS score.
    #[serde(default)]
    pub cvss_score: f32,
    /// Short description, usually the CVE id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_description: String,
}

impl Occurrence {
    /// Returns true if this occurrence is fixable and at least as severe as
    /// `threshold`.
    #[must_use]
    pub fn is_fixable_and_severe(&self, threshold: Severity) -> bool {
        self.vulnerability
            .as_ref()
            .is_some_and(|v| v.fix_available && v.effective_severity.is_at_least(threshold))
    }
}

/// Produces the vulnerability occurrences for a promotion's source image.
#[async_trait]
pub trait ImageVulnProducer: Send + Sync {
    /// Lists occurrences for `edge`'s source image.
    async fn occurrences(&self, edge: &PromotionEdge) -> Result<Vec<Occurrence>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOccurrencesResponse {
    #[serde(default)]
    occurrences: Vec<Occurrence>,
    #[serde(default)]
    next_page_token: String,
}

/// Lists occurrences through the Container Analysis REST API.
pub struct ContainerAnalysisClient {
    http: reqwest::Client,
    endpoint: String,
    config: ClientConfig,
    limiter: Option<RateLimiter>,
    tokens: Box<dyn TokenProvider>,
    service_account: String,
}

impl fmt::Debug for ContainerAnalysisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerAnalysisClient")
            .field("endpoint", &self.endpoint)
            .field("service_account", &self.service_account)
            .finish_non_exhaustive()
    }
}

impl ContainerAnalysisClient {
    /// Creates a client that authenticates as `service_account`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        config: ClientConfig,
        tokens: Box<dyn TokenProvider>,
        service_account: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RegistryError::ConnectionFailed {
                url: CONTAINER_ANALYSIS_ENDPOINT.to_string(),
                source: e,
            })?;

        Ok(Self {
            http,
            endpoint: CONTAINER_ANALYSIS_ENDPOINT.to_string(),
            limiter: config.rate_limit.map(RateLimiter::new),
            config,
            tokens,
            service_account: service_account.into(),
        })
    }

    /// Points the client at a different endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The occurrence filter for an edge's source image.
    #[must_use]
    pub fn filter_for(edge: &PromotionEdge) -> String {
        let resource_url = format!(
            "https://{}/{}@{}",
            edge.src_registry.name, edge.src_image_tag.name, edge.digest
        );
        format!("resourceUrl=\"{resource_url}\" AND kind=\"VULNERABILITY\"")
    }

    /// The project that owns an edge's source registry.
    fn project_for(edge: &PromotionEdge) -> Result<String> {
        let (_, _, repo_path) = token_key_domain_repo_path(&edge.src_registry.name).map_err(|_| {
            RegistryError::InvalidReference {
                reference: edge.src_registry.name.to_string(),
            }
        })?;
        Ok(repo_path.split('/').next().unwrap_or(repo_path).to_string())
    }

    async fn list_page(
        &self,
        url: &str,
        filter: &str,
        page_token: &str,
        bearer: &str,
    ) -> Result<ListOccurrencesResponse> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let mut query = vec![("filter", filter)];
        if !page_token.is_empty() {
            query.push(("pageToken", page_token));
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::from_status(url, status, body));
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ImageVulnProducer for ContainerAnalysisClient {
    async fn occurrences(&self, edge: &PromotionEdge) -> Result<Vec<Occurrence>> {
        let project = Self::project_for(edge)?;
        let url = format!("{}/projects/{project}/occurrences", self.endpoint);
        let filter = Self::filter_for(edge);
        let token = self.tokens.token(&self.service_account, true).await?;

        let mut occurrences = Vec::new();
        let mut page_token = String::new();
        loop {
            let (url, filter, page, bearer) =
                (url.as_str(), filter.as_str(), page_token.as_str(), token.expose());
            let page = retry_notify(
                &self.config.backoff,
                move || self.list_page(url, filter, page, bearer),
                |err, delay| {
                    tracing::warn!(error = %err, ?delay, "Listing occurrences failed, retrying");
                },
            )
            .await?;

            occurrences.extend(page.occurrences);
            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        tracing::debug!(edge = %edge, count = occurrences.len(), "Listed vulnerability occurrences");
        Ok(occurrences)
    }
}
