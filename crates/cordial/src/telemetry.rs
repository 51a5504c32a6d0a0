use cordial_error::{ConfigError, CordialResult};
use tracing::debug;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,cordial=debug";

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is not set
    pub filter: String,
    /// Emit one JSON object per event instead of text
    pub json_logs: bool,
    /// Include the event target
    pub with_target: bool,
}

impl TelemetryConfig {
    /// Text logs with the default filter.
    pub fn new() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json_logs: false,
            with_target: true,
        }
    }

    /// Set the fallback filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enable JSON-formatted logs.
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    /// Filter from `RUST_LOG`, falling back to the configured directives.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback directives do not parse.
    pub fn env_filter(&self) -> CordialResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|e| {
                ConfigError::new(format!("Invalid log filter '{}': {}", self.filter, e)).into()
            }),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a text subscriber with the default filter.
pub fn init_tracing() -> CordialResult<()> {
    init_tracing_with_config(TelemetryConfig::new())
}

/// Install a JSON subscriber with the default filter.
pub fn init_json_tracing() -> CordialResult<()> {
    init_tracing_with_config(TelemetryConfig::new().with_json_logs(true))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already
/// installed.
pub fn init_tracing_with_config(config: TelemetryConfig) -> CordialResult<()> {
    let env_filter = config.env_filter()?;

    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_level(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_level(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConfigError::new(format!("Failed to install subscriber: {}", e)))?;

    debug!(json = config.json_logs, "Tracing initialized");
    Ok(())
}
