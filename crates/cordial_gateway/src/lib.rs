//! Sharded gateway sessions for the Cordial client.
//!
//! A [`SessionGroup`] runs one [`ConnectionSession`] task per shard. Each
//! session keeps its link alive with heartbeats, resumes after drops, and
//! identifies from scratch only when the server discards the session. Cold
//! identifies across all shards go through one shared
//! [`IdentifyLimiter`](cordial_rate_limit::IdentifyLimiter).
//!
//! Everything the sessions observe arrives on a single unbounded
//! [`GatewayEvent`] channel.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod event;
mod group;
mod options;
mod payload;
mod session;
mod shard;
mod transport;

pub use event::{GatewayEvent, ReconnectReason};
pub use group::{SessionGroup, SessionGroupBuilder, ShardCount};
pub use options::{ConnectionProperties, IdentifyOptions, IdentifyOptionsBuilder};
pub use payload::{GatewayPayload, Hello, Opcode, ReadyInfo};
pub use session::{ConnectionSession, SessionCommand, SessionHandle, SessionInfo, SessionState};
pub use shard::{ShardId, shard_for_guild};
pub use transport::{Frame, GatewayConnection, GatewayTransport, TungsteniteTransport};
