//! Endpoint catalog.
//!
//! Only the endpoints the client itself needs, plus a few common ones.
//! Anything else can be reached with [`Endpoint::new`].

use cordial_error::RestResult;
use cordial_rate_limit::Route;
use reqwest::Method;
use serde::{Deserialize, Serialize};

/// A method and path template, not yet bound to parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    method: Method,
    template: &'static str,
}

impl Endpoint {
    /// Describe an endpoint.
    pub const fn new(method: Method, template: &'static str) -> Self {
        Self { method, template }
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path template.
    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Bind parameters, in placeholder order.
    ///
    /// ```
    /// use cordial_rest::routes;
    ///
    /// let route = routes::MESSAGE_DELETE.bind(&["10", "20"]).unwrap();
    /// assert_eq!(route.path(), "/channels/10/messages/20");
    /// ```
    pub fn bind(&self, params: &[&str]) -> RestResult<Route> {
        Route::new(self.method.clone(), self.template, params)
    }
}

/// Gateway URL plus recommended shard count and session start limits.
pub const GATEWAY_BOT: Endpoint = Endpoint::new(Method::GET, "/gateway/bot");

/// Fetch a channel.
pub const CHANNEL_GET: Endpoint = Endpoint::new(Method::GET, "/channels/{channel.id}");

/// Post a message to a channel.
pub const MESSAGE_CREATE: Endpoint =
    Endpoint::new(Method::POST, "/channels/{channel.id}/messages");

/// Delete a message.
pub const MESSAGE_DELETE: Endpoint =
    Endpoint::new(Method::DELETE, "/channels/{channel.id}/messages/{message.id}");

/// React to a message as the current user.
pub const REACTION_CREATE: Endpoint = Endpoint::new(
    Method::PUT,
    "/channels/{channel.id}/messages/{message.id}/reactions/{emoji}/@me",
);

/// Fetch a guild.
pub const GUILD_GET: Endpoint = Endpoint::new(Method::GET, "/guilds/{guild.id}");

/// Fetch the current user.
pub const CURRENT_USER_GET: Endpoint = Endpoint::new(Method::GET, "/users/@me");

/// Response of [`GATEWAY_BOT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBot {
    /// Gateway URL
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    /// Identify budget for this bot
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget reported by [`GATEWAY_BOT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Identifies allowed per window
    pub total: u32,
    /// Identifies left in the current window
    pub remaining: u32,
    /// Milliseconds until the window resets
    pub reset_after: u64,
    /// Identifies allowed per 5 second slot
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}
