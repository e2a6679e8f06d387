//! Configuration types for the registry client.

use std::time::Duration;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Ambient credentials for copies and deletions.
    pub auth: RegistryAuth,

    /// Retry policy for transient failures.
    pub backoff: BackoffPolicy,

    /// Client-side request rate limit. `None` disables limiting.
    pub rate_limit: Option<RateLimit>,

    /// URL scheme used to reach registries. Tests point this at `http`.
    pub scheme: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("imgpromo/{}", env!("CARGO_PKG_VERSION")),
            auth: RegistryAuth::None,
            backoff: BackoffPolicy::default(),
            rate_limit: Some(RateLimit::default()),
            scheme: "https".to_string(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use imgpromo_registry::{ClientConfig, RegistryAuth};
    ///
    /// let config = ClientConfig::builder()
    ///     .timeout(Duration::from_secs(10))
    ///     .auth(RegistryAuth::bearer("token"))
    ///     .build();
    /// assert_eq!(config.timeout, Duration::from_secs(10));
    /// assert_eq!(config.scheme, "https");
    /// ```
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Base URL for a registry domain.
    #[must_use]
    pub fn base_url(&self, domain: &str) -> String {
        format!("{}://{domain}", self.scheme)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    timeout: Option<Duration>,
    user_agent: Option<String>,
    auth: Option<RegistryAuth>,
    backoff: Option<BackoffPolicy>,
    rate_limit: Option<Option<RateLimit>>,
    scheme: Option<String>,
}

impl ClientConfigBuilder {
    /// Sets the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the ambient credentials.
    #[must_use]
    pub fn auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Sets the rate limit; `None` disables limiting.
    #[must_use]
    pub const fn rate_limit(mut self, rate_limit: Option<RateLimit>) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Sets the URL scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            auth: self.auth.unwrap_or(defaults.auth),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            rate_limit: self.rate_limit.unwrap_or(defaults.rate_limit),
            scheme: self.scheme.unwrap_or(defaults.scheme),
        }
    }
}

/// Authentication methods for registry access.
#[derive(Debug, Clone, Default)]
pub enum RegistryAuth {
    /// No authentication.
    #[default]
    None,

    /// Basic authentication (username/password or username/token).
    Basic {
        /// Username.
        username: String,
        /// Password or token.
        password: String,
    },

    /// Bearer token authentication (`OAuth2` / service account).
    Bearer {
        /// Token value.
        token: String,
    },
}

impl RegistryAuth {
    /// Creates basic authentication.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
    /// Each delay is scaled by a random factor in `1 +/- randomization_factor`.
    pub randomization_factor: f64,
    /// Upper bound on a single delay.
    pub max_interval: Duration,
    /// Stop retrying once this much time has passed.
    pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            multiplier: 1.0,
            randomization_factor: 0.0,
            max_interval: Duration::ZERO,
            max_elapsed: Duration::ZERO,
        }
    }

    /// Sets the initial interval.
    #[must_use]
    pub const fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the maximum elapsed time.
    #[must_use]
    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// The un-jittered delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exp);
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_interval)
    }
}

/// Client-side request rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Sustained requests per second across the whole client.
    pub requests_per_second: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_second: 50,
        }
    }
}

impl RateLimit {
    /// Creates a limit of `requests_per_second`.
    #[must_use]
    pub const fn per_second(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
        }
    }
}
