//! Entry point tying configuration, the request router and the gateway
//! together.

use cordial_error::{ConfigError, CordialResult};
use cordial_gateway::SessionGroupBuilder;
use cordial_rate_limit::CordialConfig;
use cordial_rest::{HttpTransport, ReqwestTransport, RequestRouter};
use tracing::{debug, info, instrument};

/// Environment variable holding the bot token.
pub const TOKEN_VAR: &str = "DISCORD_TOKEN";

/// A configured client: one request router plus a factory for gateway
/// session groups sharing the same token and settings.
///
/// # Example
///
/// ```no_run
/// use cordial::CordialClient;
///
/// # async fn run() -> cordial::CordialResult<()> {
/// let client = CordialClient::from_env()?;
/// let (mut group, mut events) = client.gateway().intents(1 << 9).start().await?;
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// group.shutdown().await;
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CordialClient {
    token: String,
    config: CordialConfig,
    router: RequestRouter,
}

impl CordialClient {
    /// Client using the reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is blank or the HTTP client cannot be
    /// built.
    pub fn new(token: impl Into<String>, config: CordialConfig) -> CordialResult<Self> {
        let token = token.into();
        let transport = ReqwestTransport::new(&token, config.rest())?;
        Self::with_transport(token, config, transport)
    }

    /// Client over a caller-supplied HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is blank.
    pub fn with_transport(
        token: impl Into<String>,
        config: CordialConfig,
        transport: impl HttpTransport + 'static,
    ) -> CordialResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ConfigError::new("Bot token is empty").into());
        }
        let router = RequestRouter::new(transport, config.rest().clone());
        debug!(base_url = %config.rest().base_url(), "Created client");
        Ok(Self {
            token,
            config,
            router,
        })
    }

    /// Client from `DISCORD_TOKEN` and the layered config files.
    ///
    /// A `.env` file in the working directory is honored when present.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set or configuration fails to
    /// load.
    #[instrument]
    pub fn from_env() -> CordialResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env");
        }
        let token = std::env::var(TOKEN_VAR)
            .map_err(|_| ConfigError::new(format!("{} environment variable not set", TOKEN_VAR)))?;
        let config = CordialConfig::load()?;
        info!("Client configured from environment");
        Self::new(token, config)
    }

    /// Request router for REST calls.
    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// Loaded configuration.
    pub fn config(&self) -> &CordialConfig {
        &self.config
    }

    /// Session group builder using this client's token, gateway settings
    /// and the recommended shard count.
    ///
    /// Call `shard_count` on the builder to pin the count instead.
    pub fn gateway(&self) -> SessionGroupBuilder {
        cordial_gateway::SessionGroup::builder()
            .token(self.token.clone())
            .config(self.config.gateway().clone())
            .recommended_shards(self.router.clone())
    }

    /// Stop the request router.
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
    }
}

impl std::fmt::Debug for CordialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CordialClient")
            .field("token", &"[redacted]")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish()
    }
}
