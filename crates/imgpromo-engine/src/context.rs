//! Per-run state shared by every stage of a promotion.
//!
//! A [`SyncContext`] lives for exactly one run. Its immutable parts
//! (configuration, registry contexts, tokens) are plain fields. Everything
//! workers write is behind the single named lock [`SyncContext::state`];
//! critical sections are short read-modify-writes and are never held across
//! an `.await`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use imgpromo_core::names::{
    parse_container_parts, split_by_known_registries, token_key_domain_repo_path,
};
use imgpromo_core::{
    DigestMediaType, ImageName, Manifest, MasterInventory, ParentDigest, RegistryContext,
    RegistryName, RootRepo, Set, Token,
};
use imgpromo_registry::TokenProvider;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::{EngineError, Result};

/// One error recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedError {
    /// What was being attempted.
    pub context: String,
    /// The failure.
    pub error: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

impl LoggedError {
    /// Records `error` under `context`, timestamped now.
    pub fn new(context: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            context: context.into(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Every error recorded during a run, printed in full at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectedLogs {
    /// Errors in the order they were collected.
    pub errors: Vec<LoggedError>,
}

/// Mutable run state, guarded by [`SyncContext::state`].
#[derive(Debug, Default)]
pub struct SyncState {
    /// Observed registry contents.
    pub inv: MasterInventory,
    /// Images whose source could not be read; they are skipped this run.
    pub inv_ignore: Set<ImageName>,
    /// Media type of every digest seen.
    pub digest_media_type: DigestMediaType,
    /// Child manifest digest to the manifest list that references it.
    pub parent_digest: ParentDigest,
    /// Errors collected so far.
    pub logs: CollectedLogs,
}

impl SyncState {
    /// Excludes the image behind `registry` (a full repository path such as
    /// `gcr.io/foo/bar/baz`) from promotion for the rest of the run.
    ///
    /// The image name is taken relative to the longest matching registry in
    /// `contexts`; GCR-style `{domain}/{project}` splitting is the fallback
    /// for paths outside every known registry.
    pub fn ignore_from_promotion(&mut self, registry: &RegistryName, contexts: &[RegistryContext]) {
        let image = match split_by_known_registries(registry.as_str(), contexts) {
            Ok((_, image)) => image,
            Err(_) => match parse_container_parts(registry.as_str()) {
                Ok((_, image)) => ImageName::from(image),
                Err(err) => {
                    tracing::error!(registry = %registry, error = %err, "Unable to ignore from promotion");
                    return;
                }
            },
        };
        tracing::info!(image = %image, "Ignoring from promotion");
        self.inv_ignore.insert(image);
    }
}

/// Process-wide state for one promotion run.
pub struct SyncContext {
    config: SyncConfig,
    registry_contexts: Vec<RegistryContext>,
    tokens: BTreeMap<RootRepo, Token>,

    /// The run's mutable state.
    pub state: Mutex<SyncState>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("registry_contexts", &self.registry_contexts)
            .field("tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Creates a context for the registries named across `manifests`.
    ///
    /// Registries are deduplicated and sorted longest name first (ties broken
    /// alphabetically) so that prefix matching prefers the most specific
    /// registry.
    pub fn new(manifests: &[Manifest], config: SyncConfig) -> Self {
        let mut registry_contexts: Vec<RegistryContext> = Vec::new();
        for rc in manifests.iter().flat_map(|m| &m.registries) {
            if !registry_contexts.contains(rc) {
                registry_contexts.push(rc.clone());
            }
        }
        registry_contexts.sort_by(|a, b| {
            b.name
                .as_str()
                .len()
                .cmp(&a.name.as_str().len())
                .then_with(|| a.name.cmp(&b.name))
        });

        Self {
            config,
            registry_contexts,
            tokens: BTreeMap::new(),
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Creates a context and, when the configuration asks for service
    /// accounts, obtains a token for every registry.
    pub async fn with_tokens(
        manifests: &[Manifest],
        config: SyncConfig,
        provider: &dyn TokenProvider,
    ) -> Result<Self> {
        let mut ctx = Self::new(manifests, config);
        if ctx.config.use_service_account {
            ctx.populate_tokens(provider).await?;
        }
        Ok(ctx)
    }

    /// Obtains a token for every registry context, keyed by root repository.
    pub async fn populate_tokens(&mut self, provider: &dyn TokenProvider) -> Result<()> {
        for rc in &self.registry_contexts {
            let token = provider
                .token(&rc.service_account, self.config.use_service_account)
                .await
                .map_err(|source| {
                    tracing::error!(service_account = %rc.service_account, "Could not get service account token");
                    EngineError::Token {
                        service_account: rc.service_account.clone(),
                        source,
                    }
                })?;
            let (key, _, _) = token_key_domain_repo_path(&rc.name)?;
            self.tokens.insert(RootRepo(key), token);
        }
        Ok(())
    }

    /// The run configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Registry contexts, longest name first.
    pub fn registry_contexts(&self) -> &[RegistryContext] {
        &self.registry_contexts
    }

    /// The token for the root repository that `registry` belongs to.
    pub fn token_for(&self, registry: &RegistryName) -> Option<&Token> {
        let (key, _, _) = token_key_domain_repo_path(registry).ok()?;
        self.tokens.get(&RootRepo(key))
    }

    /// The context registered under exactly `name`, if any.
    pub fn registry_context(&self, name: &RegistryName) -> Option<&RegistryContext> {
        self.registry_contexts.iter().find(|rc| rc.name == *name)
    }

    /// Appends errors to the run's log.
    pub fn record_errors(&self, errors: impl IntoIterator<Item = LoggedError>) {
        self.state.lock().logs.errors.extend(errors);
    }

    /// A copy of the current inventory.
    pub fn snapshot_inventory(&self) -> MasterInventory {
        self.state.lock().inv.clone()
    }

    /// Replaces the inventory wholesale.
    pub fn set_inventory(&self, inv: MasterInventory) {
        self.state.lock().inv = inv;
    }

    /// The collected errors as pretty-printed JSON.
    pub fn logs_json(&self) -> Result<String> {
        let logs = self.state.lock().logs.clone();
        serde_json::to_string_pretty(&logs).map_err(|e| EngineError::Internal(e.to_string()))
    }

    /// Logs the collected errors as pretty-printed JSON.
    pub fn log_json_summary(&self) {
        match self.logs_json() {
            Ok(json) => tracing::info!("{json}"),
            Err(err) => tracing::info!(error = %err, "There was a problem generating the JSON summary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use imgpromo_registry::StaticTokenProvider;

    use super::*;

    fn manifest(registries: &[&str]) -> Manifest {
        Manifest {
            registries: registries
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    if i == 0 {
                        RegistryContext::source(*name)
                    } else {
                        RegistryContext::new(*name)
                    }
                })
                .collect(),
            ..Manifest::default()
        }
    }

    #[test]
    fn test_registries_sorted_longest_first_and_unique() {
        let ctx = SyncContext::new(
            &[
                manifest(&["gcr.io/a", "gcr.io/bbb/ccc"]),
                manifest(&["gcr.io/a", "gcr.io/zz"]),
            ],
            SyncConfig::default(),
        );
        let names: Vec<&str> = ctx
            .registry_contexts()
            .iter()
            .map(|rc| rc.name.as_str())
            .collect();
        assert_eq!(names, vec!["gcr.io/bbb/ccc", "gcr.io/zz", "gcr.io/a"]);
    }

    #[test]
    fn test_ignore_from_promotion() {
        let mut state = SyncState::default();
        state.ignore_from_promotion(&RegistryName::from("gcr.io/staging/foo/bar"), &[]);
        state.ignore_from_promotion(&RegistryName::from("nonsense"), &[]);
        assert_eq!(
            state.inv_ignore.iter().collect::<Vec<_>>(),
            vec![&ImageName::from("foo/bar")]
        );
    }

    #[test]
    fn test_ignore_from_promotion_uses_known_registries() {
        let ctx = SyncContext::new(
            &[manifest(&[
                "gcr.io/staging",
                "us.gcr.io/k8s-artifacts-prod/team",
                "localhost:5000/prod",
            ])],
            SyncConfig::default(),
        );
        let mut state = SyncState::default();
        state.ignore_from_promotion(
            &RegistryName::from("us.gcr.io/k8s-artifacts-prod/team/foo"),
            ctx.registry_contexts(),
        );
        state.ignore_from_promotion(
            &RegistryName::from("localhost:5000/prod/bar/baz"),
            ctx.registry_contexts(),
        );
        assert_eq!(
            state.inv_ignore.iter().collect::<Vec<_>>(),
            vec![&ImageName::from("bar/baz"), &ImageName::from("foo")]
        );
    }

    #[tokio::test]
    async fn test_tokens_keyed_by_root_repo() {
        let config = SyncConfig::builder().use_service_account(true).build();
        let ctx = SyncContext::with_tokens(
            &[manifest(&["gcr.io/staging", "us.gcr.io/prod/sub"])],
            config,
            &StaticTokenProvider::new("tok"),
        )
        .await
        .unwrap();

        let token = ctx
            .token_for(&RegistryName::from("us.gcr.io/prod/sub/foo"))
            .unwrap();
        assert_eq!(token.expose(), "tok");
        assert!(ctx.token_for(&RegistryName::from("eu.gcr.io/other")).is_none());
    }

    #[tokio::test]
    async fn test_no_tokens_without_service_accounts() {
        let ctx = SyncContext::with_tokens(
            &[manifest(&["gcr.io/staging"])],
            SyncConfig::default(),
            &StaticTokenProvider::new("tok"),
        )
        .await
        .unwrap();
        assert!(ctx.token_for(&RegistryName::from("gcr.io/staging")).is_none());
    }

    #[test]
    fn test_logs_json() {
        let ctx = SyncContext::new(&[], SyncConfig::default());
        ctx.record_errors([LoggedError::new("reading registry tags", "boom")]);
        let json = ctx.logs_json().unwrap();
        assert!(json.contains("\"context\": \"reading registry tags\""));
        assert!(json.contains("\"error\": \"boom\""));
    }
}
