//! A set of sharded sessions sharing one identify budget.

use crate::{
    ConnectionSession, GatewayEvent, GatewayPayload, GatewayTransport, IdentifyOptionsBuilder,
    SessionHandle, SessionInfo, SessionState, ShardId, TungsteniteTransport, shard_for_guild,
};
use cordial_error::{
    BuilderError, BuilderErrorKind, CordialResult, GatewayError, GatewayErrorKind, GatewayResult,
};
use cordial_rate_limit::{GatewayConfig, IdentifyLimiter};
use cordial_rest::{GatewayBot, Payload, RequestRouter, routes};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// How many shards the group runs.
#[derive(Debug, Clone)]
pub enum ShardCount {
    /// A fixed total
    Fixed(u32),
    /// Whatever `GET /gateway/bot` recommends
    Recommended(RequestRouter),
}

/// Owner of every session in a shard set.
///
/// # Example
///
/// ```no_run
/// use cordial_gateway::SessionGroup;
///
/// # async fn run() -> cordial_error::CordialResult<()> {
/// let (mut group, mut events) = SessionGroup::builder()
///     .token("bot-token")
///     .intents(1 << 9)
///     .shard_count(2)
///     .start()
///     .await?;
///
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// group.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionGroup {
    shard_count: u32,
    sessions: BTreeMap<u32, SessionHandle>,
    limiter: Arc<IdentifyLimiter>,
}

impl SessionGroup {
    /// Start configuring a group.
    pub fn builder() -> SessionGroupBuilder {
        SessionGroupBuilder::default()
    }

    /// Total shard count used for routing.
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Indexes of the shards this group runs.
    pub fn shards(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    /// Shard responsible for a guild.
    pub fn shard_for_guild(&self, guild_id: u64) -> u32 {
        shard_for_guild(guild_id, self.shard_count)
    }

    /// Identify limiter shared by every session.
    pub fn identify_limiter(&self) -> &Arc<IdentifyLimiter> {
        &self.limiter
    }

    fn session(&self, shard: u32) -> GatewayResult<&SessionHandle> {
        self.sessions
            .get(&shard)
            .ok_or_else(|| GatewayError::new(GatewayErrorKind::UnknownShard(shard)))
    }

    /// Send a payload on one shard once it is ready.
    pub fn send(&self, shard: u32, payload: GatewayPayload) -> GatewayResult<()> {
        self.session(shard)?.send(payload)
    }

    /// Update presence on every shard.
    pub fn update_presence(&self, presence: Value) -> GatewayResult<()> {
        for handle in self.sessions.values() {
            handle.send(GatewayPayload::presence_update(presence.clone()))?;
        }
        Ok(())
    }

    /// Drop a shard's link and resume on a new one.
    pub fn reconnect(&self, shard: u32) -> GatewayResult<()> {
        self.session(shard)?.reconnect()
    }

    /// Lifecycle state of a shard.
    pub fn state(&self, shard: u32) -> Option<SessionState> {
        self.sessions.get(&shard).map(SessionHandle::state)
    }

    /// Snapshot of a shard's session.
    pub fn info(&self, shard: u32) -> Option<SessionInfo> {
        self.sessions.get(&shard).map(SessionHandle::info)
    }

    /// Close every link and wait for the sessions to stop.
    #[instrument(skip(self), fields(shards = self.sessions.len()))]
    pub async fn shutdown(&mut self) {
        for handle in self.sessions.values_mut() {
            handle.shutdown().await;
        }
        info!("Session group stopped");
    }
}

/// Builder for [`SessionGroup`].
#[derive(Default)]
pub struct SessionGroupBuilder {
    token: Option<String>,
    intents: u64,
    large_threshold: Option<u32>,
    presence: Option<Value>,
    shard_count: Option<ShardCount>,
    shards: Option<Vec<u32>>,
    config: GatewayConfig,
    transport: Option<Arc<dyn GatewayTransport>>,
}

impl SessionGroupBuilder {
    /// Bot token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Gateway intents.
    pub fn intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    /// Member count above which offline members are omitted.
    pub fn large_threshold(mut self, large_threshold: u32) -> Self {
        self.large_threshold = Some(large_threshold);
        self
    }

    /// Presence sent with Identify.
    pub fn presence(mut self, presence: Value) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Run a fixed number of shards.
    pub fn shard_count(mut self, count: u32) -> Self {
        self.shard_count = Some(ShardCount::Fixed(count));
        self
    }

    /// Ask the API how many shards to run.
    pub fn recommended_shards(mut self, router: RequestRouter) -> Self {
        self.shard_count = Some(ShardCount::Recommended(router));
        self
    }

    /// Run only these shard indexes out of the total.
    pub fn shards(mut self, indexes: impl IntoIterator<Item = u32>) -> Self {
        self.shards = Some(indexes.into_iter().collect());
        self
    }

    /// Gateway settings.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Link transport; defaults to tokio-tungstenite.
    pub fn transport(mut self, transport: Arc<dyn GatewayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Spawn every session and return the group with its event stream.
    ///
    /// Sessions start in shard order; their identifies are spaced by the
    /// shared limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing, a shard index is out of
    /// range, or the recommended shard count cannot be fetched.
    #[instrument(skip(self))]
    pub async fn start(
        self,
    ) -> CordialResult<(SessionGroup, mpsc::UnboundedReceiver<GatewayEvent>)> {
        let mut options = IdentifyOptionsBuilder::default();
        if let Some(token) = self.token {
            options.token(token);
        }
        options.intents(self.intents);
        if let Some(threshold) = self.large_threshold {
            options.large_threshold(threshold);
        }
        if let Some(presence) = self.presence {
            options.presence(presence);
        }
        let options = Arc::new(options.build()?);

        let (shard_count, gateway_url, limiter) = match self.shard_count {
            Some(ShardCount::Fixed(count)) => (
                count,
                self.config.url().clone(),
                self.config.identify_limiter(),
            ),
            None => (1, self.config.url().clone(), self.config.identify_limiter()),
            Some(ShardCount::Recommended(router)) => {
                let route = routes::GATEWAY_BOT.bind(&[])?;
                let bot: GatewayBot = router.request_json(route, Payload::empty()).await?;
                let limiter = limiter_for(&bot, &self.config);
                info!(
                    shards = bot.shards,
                    remaining = bot.session_start_limit.remaining,
                    "Fetched recommended shard count"
                );
                (bot.shards.max(1), bot.url, limiter)
            }
        };

        let indexes = match self.shards {
            Some(indexes) => indexes,
            None => (0..shard_count).collect(),
        };
        if indexes.is_empty() {
            return Err(BuilderError::new(BuilderErrorKind::InvalidField {
                field: "shards".to_string(),
                reason: "no shards selected".to_string(),
            })
            .into());
        }
        let shard_ids = indexes
            .iter()
            .map(|index| ShardId::new(*index, shard_count))
            .collect::<GatewayResult<Vec<_>>>()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TungsteniteTransport));
        let limiter = Arc::new(limiter);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut sessions = BTreeMap::new();
        for shard in shard_ids {
            debug!(%shard, "Spawning session");
            let handle = ConnectionSession::spawn(
                shard,
                Arc::clone(&options),
                self.config.clone(),
                gateway_url.clone(),
                Arc::clone(&transport),
                Arc::clone(&limiter),
                events_tx.clone(),
            );
            sessions.insert(shard.index(), handle);
        }

        info!(shard_count, running = sessions.len(), "Session group started");
        Ok((
            SessionGroup {
                shard_count,
                sessions,
                limiter,
            },
            events_rx,
        ))
    }
}

/// Identify limiter matching the server's session start budget.
fn limiter_for(bot: &GatewayBot, config: &GatewayConfig) -> IdentifyLimiter {
    let budget = bot.session_start_limit;
    let limiter = IdentifyLimiter::new(
        budget.total,
        config.identify_window(),
        config.identify_spacing(),
        budget.max_concurrency,
    );
    let used = budget.total.saturating_sub(budget.remaining);
    if used > 0 {
        limiter.seed_used(used, Duration::from_millis(budget.reset_after), Instant::now());
    }
    if budget.remaining == 0 {
        warn!(
            reset_after_ms = budget.reset_after,
            "Identify budget exhausted, sessions will wait for the reset"
        );
    }
    limiter
}
