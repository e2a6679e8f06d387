//! Configuration for a promotion run.

/// Default number of concurrent request workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Configuration for one promotion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Number of concurrent request workers.
    pub workers: usize,

    /// Perform registry mutations. When false, requests are only captured and
    /// printed.
    pub confirm: bool,

    /// Impersonate each registry's service account when obtaining tokens.
    pub use_service_account: bool,

    /// Descend into child repositories when reading registries.
    pub recurse: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            confirm: false,
            use_service_account: false,
            recurse: true,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }
}

/// Builder for `SyncConfig`.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    workers: Option<usize>,
    confirm: Option<bool>,
    use_service_account: Option<bool>,
    recurse: Option<bool>,
}

impl SyncConfigBuilder {
    /// Sets the number of workers. Zero falls back to the default.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Enables or disables registry mutations.
    pub fn confirm(mut self, confirm: bool) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Enables or disables service account impersonation.
    pub fn use_service_account(mut self, enabled: bool) -> Self {
        self.use_service_account = Some(enabled);
        self
    }

    /// Enables or disables recursive registry reads.
    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = Some(recurse);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            workers: self
                .workers
                .filter(|w| *w > 0)
                .unwrap_or(defaults.workers),
            confirm: self.confirm.unwrap_or(defaults.confirm),
            use_service_account: self
                .use_service_account
                .unwrap_or(defaults.use_service_account),
            recurse: self.recurse.unwrap_or(defaults.recurse),
        }
    }
}
