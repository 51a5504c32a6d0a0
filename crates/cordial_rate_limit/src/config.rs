//! Configuration structures for the router and gateway.
//!
//! This module provides TOML-based configuration. The configuration
//! system supports:
//! - Bundled defaults (include_str! from cordial.toml)
//! - User overrides (./cordial.toml or ~/.config/cordial/cordial.toml)
//! - Automatic merging with user values taking precedence

use crate::{Backoff, GlobalRateLimiter, IdentifyLimiter};
use config::{Config, File, FileFormat};
use cordial_error::{ConfigError, CordialError, CordialResult};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Request router settings.
///
/// # Example
///
/// ```toml
/// [rest]
/// max_retries = 5
/// queue_capacity = 256
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Getters)]
#[serde(default)]
pub struct RestConfig {
    /// API base URL, without trailing slash
    base_url: String,
    /// User-Agent sent with every request
    user_agent: String,
    /// Per-request timeout in seconds
    request_timeout_secs: u64,
    /// Retries for 5xx responses and transport failures
    max_retries: u32,
    /// First retry delay in milliseconds
    first_backoff_ms: u64,
    /// Retry delay cap in seconds
    max_backoff_secs: u64,
    /// Requests in flight at once across all buckets
    max_concurrent_requests: usize,
    /// Proactive global quota; `None` leaves only server-signalled limits
    requests_per_second: Option<u32>,
    /// Requests a single bucket lane may hold before rejecting
    queue_capacity: usize,
    /// Idle time after which an empty bucket lane is evicted
    bucket_idle_timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_string(),
            user_agent: format!(
                "DiscordBot (https://github.com/crumplecup/cordial, {})",
                env!("CARGO_PKG_VERSION")
            ),
            request_timeout_secs: 30,
            max_retries: 3,
            first_backoff_ms: 2000,
            max_backoff_secs: 30,
            max_concurrent_requests: 12,
            requests_per_second: Some(50),
            queue_capacity: 1024,
            bucket_idle_timeout_secs: 600,
        }
    }
}

impl RestConfig {
    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the retry backoff.
    pub fn with_backoff(mut self, first: Duration, max: Duration) -> Self {
        self.first_backoff_ms = first.as_millis() as u64;
        self.max_backoff_secs = max.as_secs().max(1);
        self
    }

    /// Override the global limits.
    pub fn with_global_limits(
        mut self,
        max_concurrent_requests: usize,
        requests_per_second: Option<u32>,
    ) -> Self {
        self.max_concurrent_requests = max_concurrent_requests;
        self.requests_per_second = requests_per_second;
        self
    }

    /// Override the per-lane queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Override the idle eviction timeout.
    pub fn with_bucket_idle_timeout(mut self, timeout: Duration) -> Self {
        self.bucket_idle_timeout_secs = timeout.as_secs();
        self
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Idle eviction timeout.
    pub fn bucket_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_timeout_secs)
    }

    /// Retry backoff for transient failures.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.first_backoff_ms),
            Duration::from_secs(self.max_backoff_secs),
        )
    }

    /// Global limiter built from these settings.
    pub fn global_limiter(&self) -> GlobalRateLimiter {
        GlobalRateLimiter::new(self.max_concurrent_requests, self.requests_per_second)
    }
}

/// Gateway session settings.
///
/// # Example
///
/// ```toml
/// [gateway]
/// max_retries = 10
/// max_concurrency = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Getters)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway URL used until the server hands out a resume URL
    url: String,
    /// Protocol version
    version: u8,
    /// Time allowed for Hello after the link opens
    hello_timeout_secs: u64,
    /// First reconnect delay in milliseconds
    first_backoff_ms: u64,
    /// Reconnect delay cap in seconds
    max_backoff_secs: u64,
    /// Consecutive failed reconnects before giving up; unbounded when `None`
    #[serde(skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    /// Minimum time between identify slots
    identify_spacing_ms: u64,
    /// Rolling window for the identify cap
    identify_window_secs: u64,
    /// Identifies allowed per window
    identify_limit: u32,
    /// Identifies allowed per spacing slot
    max_concurrency: u32,
    /// Outbound user payloads per session per minute
    outbound_per_minute: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg".to_string(),
            version: 10,
            hello_timeout_secs: 20,
            first_backoff_ms: 2000,
            max_backoff_secs: 120,
            max_retries: None,
            identify_spacing_ms: 5000,
            identify_window_secs: 86_400,
            identify_limit: 1000,
            max_concurrency: 1,
            outbound_per_minute: 115,
        }
    }
}

impl GatewayConfig {
    /// Override the gateway URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the reconnect bound.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the reconnect backoff.
    pub fn with_backoff(mut self, first: Duration, max: Duration) -> Self {
        self.first_backoff_ms = first.as_millis() as u64;
        self.max_backoff_secs = max.as_secs().max(1);
        self
    }

    /// Override the identify limits.
    pub fn with_identify_limits(
        mut self,
        spacing: Duration,
        limit: u32,
        max_concurrency: u32,
    ) -> Self {
        self.identify_spacing_ms = spacing.as_millis() as u64;
        self.identify_limit = limit;
        self.max_concurrency = max_concurrency;
        self
    }

    /// Time allowed for Hello.
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    /// Minimum time between identify slots.
    pub fn identify_spacing(&self) -> Duration {
        Duration::from_millis(self.identify_spacing_ms)
    }

    /// Rolling window for the identify cap.
    pub fn identify_window(&self) -> Duration {
        Duration::from_secs(self.identify_window_secs)
    }

    /// Jittered reconnect backoff.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.first_backoff_ms),
            Duration::from_secs(self.max_backoff_secs),
        )
        .with_jitter(true)
    }

    /// Identify limiter built from these settings.
    pub fn identify_limiter(&self) -> IdentifyLimiter {
        IdentifyLimiter::new(
            self.identify_limit,
            self.identify_window(),
            self.identify_spacing(),
            self.max_concurrency,
        )
    }

    /// Connection URL with version and encoding query parameters.
    ///
    /// ```
    /// use cordial_rate_limit::GatewayConfig;
    ///
    /// let config = GatewayConfig::default();
    /// assert_eq!(
    ///     config.connect_url("wss://gateway.discord.gg/"),
    ///     "wss://gateway.discord.gg/?v=10&encoding=json"
    /// );
    /// ```
    pub fn connect_url(&self, base: &str) -> String {
        let base = base.split('?').next().unwrap_or(base);
        let sep = if base.ends_with('/') { "" } else { "/" };
        format!("{}{}?v={}&encoding=json", base, sep, self.version)
    }
}

/// Top-level Cordial configuration.
///
/// Loads configuration from TOML files with a precedence system:
/// 1. Bundled defaults (include_str! from cordial.toml)
/// 2. User override (./cordial.toml or ~/.config/cordial/cordial.toml)
///
/// # Example
///
/// ```no_run
/// use cordial_rate_limit::CordialConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = CordialConfig::load()?;
/// println!("Retrying transient failures {} times", config.rest().max_retries());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, Getters)]
pub struct CordialConfig {
    /// Request router settings
    #[serde(default)]
    rest: RestConfig,
    /// Gateway settings
    #[serde(default)]
    gateway: GatewayConfig,
}

impl CordialConfig {
    /// Assemble a configuration from its parts.
    pub fn new(rest: RestConfig, gateway: GatewayConfig) -> Self {
        Self { rest, gateway }
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> CordialResult<Self> {
        debug!("Loading configuration from file");

        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                CordialError::from(ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    path.as_ref().display(),
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                CordialError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// Load configuration with precedence: user override > bundled default.
    ///
    /// Configuration sources in order of precedence (later sources override earlier):
    /// 1. Bundled defaults (cordial.toml shipped with library)
    /// 2. User config in home directory (~/.config/cordial/cordial.toml)
    /// 3. User config in current directory (./cordial.toml)
    ///
    /// User config files are optional and will be silently skipped if not found.
    #[instrument]
    pub fn load() -> CordialResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        const DEFAULT_CONFIG: &str = include_str!("../../../cordial.toml");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/cordial/cordial.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = builder.add_source(File::with_name("cordial").required(false));

        builder
            .build()
            .map_err(|e| {
                CordialError::from(ConfigError::new(format!(
                    "Failed to build configuration: {}",
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                CordialError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }
}
