//! Client configuration types.
//!
//! Configuration is built with [`ClientConfig::builder`] or loaded from the
//! environment with [`ClientConfig::from_env`]. Both paths validate before
//! returning, so a [`ClientConfig`] in hand is always usable.

use crate::error::SdkError;
use crate::request::Runtime;
use reqwest::Url;
use std::time::Duration;

/// Default platform address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default image used when an intent does not name one.
pub const DEFAULT_IMAGE: &str = "alpine:latest";

/// Configuration for a [`BouvetClient`](crate::BouvetClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the platform, without trailing slash.
    pub base_url: String,
    /// API key sent as `x-api-key` on every call.
    pub api_key: Option<String>,
    /// Accept a missing API key (local development platforms).
    pub allow_anonymous: bool,
    /// Runtime selector applied when an intent does not pick one.
    pub runtime: Runtime,
    /// Derive cache keys for intents that do not carry one (default: true).
    pub cache_enabled: bool,
    /// Total attempts per call, including the first (default: 3).
    pub max_retries: u32,
    /// Base delay for exponential backoff (default: 100ms).
    pub retry_base_delay: Duration,
    /// Upper bound for a single backoff delay (default: 5s).
    pub retry_max_delay: Duration,
    /// Deadline for a single request/response exchange (default: 30s).
    pub request_timeout: Duration,
    /// Deadline for establishing a connection (default: 10s).
    pub connect_timeout: Duration,
    /// Image used when an intent does not name one.
    pub default_image: String,
    /// Round trips faster than this are inferred as cache hits when the
    /// platform does not say either way (default: 10ms).
    pub cache_hit_threshold: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            allow_anonymous: false,
            runtime: Runtime::Auto,
            cache_enabled: true,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            default_image: DEFAULT_IMAGE.to_string(),
            cache_hit_threshold: Duration::from_millis(10),
        }
    }
}

impl ClientConfig {
    /// Create a new config builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `BOUVET_API_URL` | `http://localhost:8080` |
    /// | `BOUVET_API_KEY` | unset (required) |
    /// | `BOUVET_RUNTIME` | `auto` (docker, firecracker, auto) |
    /// | `BOUVET_CACHE_ENABLED` | `true` |
    /// | `BOUVET_MAX_RETRIES` | `3` |
    /// | `BOUVET_TIMEOUT_SECS` | `30` |
    /// | `BOUVET_DEFAULT_IMAGE` | `alpine:latest` |
    pub fn from_env() -> Result<Self, SdkError> {
        let default = Self::default();

        let config = Self {
            base_url: std::env::var("BOUVET_API_URL").unwrap_or(default.base_url),
            api_key: std::env::var("BOUVET_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            runtime: std::env::var("BOUVET_RUNTIME")
                .ok()
                .and_then(|v| Runtime::parse(&v))
                .unwrap_or(default.runtime),
            cache_enabled: std::env::var("BOUVET_CACHE_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default.cache_enabled),
            max_retries: std::env::var("BOUVET_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_retries),
            request_timeout: std::env::var("BOUVET_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),
            default_image: std::env::var("BOUVET_DEFAULT_IMAGE").unwrap_or(default.default_image),
            ..default
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SdkError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            SdkError::Configuration(format!("invalid base_url {:?}: {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SdkError::Configuration(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        let missing_key = self.api_key.as_deref().map_or(true, str::is_empty);
        if missing_key && !self.allow_anonymous {
            return Err(SdkError::Configuration("API key required".into()));
        }
        if self.max_retries == 0 {
            return Err(SdkError::Configuration("max_retries must be >= 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(SdkError::Configuration(
                "request_timeout must be > 0".into(),
            ));
        }
        if self.default_image.trim().is_empty() {
            return Err(SdkError::Configuration("default_image is required".into()));
        }
        Ok(())
    }

    /// Join an API path onto the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Builder for ClientConfig.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the platform base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Allow building without an API key.
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.config.allow_anonymous = allow;
        self
    }

    /// Set the default runtime selector.
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.config.runtime = runtime;
        self
    }

    /// Enable or disable cache-key derivation.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Set the total attempt budget per call.
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    /// Set the base backoff delay.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    /// Set the backoff cap.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    /// Set the per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the connect deadline.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the image used when an intent does not name one.
    pub fn default_image(mut self, image: impl Into<String>) -> Self {
        self.config.default_image = image.into();
        self
    }

    /// Set the latency under which an unflagged response counts as a cache hit.
    pub fn cache_hit_threshold(mut self, threshold: Duration) -> Self {
        self.config.cache_hit_threshold = threshold;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<ClientConfig, SdkError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
