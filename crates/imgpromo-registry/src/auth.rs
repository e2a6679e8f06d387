//! Service account token providers.

use async_trait::async_trait;
use imgpromo_core::Token;
use tokio::process::Command;

use crate::api::TokenProvider;
use crate::error::{RegistryError, Result};

/// Obtains tokens from the `gcloud` CLI.
#[derive(Debug, Clone)]
pub struct GcloudTokenProvider {
    program: String,
}

impl Default for GcloudTokenProvider {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
        }
    }
}

impl GcloudTokenProvider {
    /// Uses a specific `gcloud` binary.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(service_account: &str, use_service_account: bool) -> Vec<&str> {
        let mut args = vec!["auth", "print-access-token"];
        if use_service_account {
            args.push(service_account);
        }
        args
    }
}

#[async_trait]
impl TokenProvider for GcloudTokenProvider {
    async fn token(&self, service_account: &str, use_service_account: bool) -> Result<Token> {
        let unavailable = |message: String| RegistryError::TokenUnavailable {
            account: service_account.to_string(),
            message,
        };

        let output = Command::new(&self.program)
            .args(Self::args(service_account, use_service_account))
            .output()
            .await
            .map_err(|e| unavailable(format!("could not run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(unavailable("empty token".to_string()));
        }
        tracing::debug!(service_account, "obtained access token");
        Ok(Token::new(token))
    }
}

/// Hands out the same token for every account.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(Token);

impl StaticTokenProvider {
    /// Creates a provider for a fixed token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Token::new(token))
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, _service_account: &str, _use_service_account: bool) -> Result<Token> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcloud_args() {
        assert_eq!(
            GcloudTokenProvider::args("sa@p", false),
            vec!["auth", "print-access-token"]
        );
        assert_eq!(
            GcloudTokenProvider::args("sa@p", true),
            vec!["auth", "print-access-token", "sa@p"]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_token_unavailable() {
        let provider = GcloudTokenProvider::with_program("/nonexistent/gcloud");
        let err = provider.token("sa@p", true).await.unwrap_err();
        assert!(matches!(err, RegistryError::TokenUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("t0k");
        assert_eq!(provider.token("any", true).await.unwrap().expose(), "t0k");
    }
}
