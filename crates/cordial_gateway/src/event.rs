//! Events delivered to the consumer of a session group.

use crate::ShardId;
use cordial_error::GatewayErrorKind;
use serde_json::Value;

/// Why a session is reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ReconnectReason {
    /// Server sent op 7
    #[display("server requested reconnect")]
    ServerRequested,
    /// Server sent op 9
    #[display("session invalidated")]
    InvalidSession,
    /// Caller asked for a reconnect
    #[display("reconnect requested")]
    Requested,
    /// The link failed
    #[display("{}", _0)]
    Failure(GatewayErrorKind),
}

/// Something a shard wants the consumer to know.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A dispatch frame, forwarded as received
    Dispatch {
        /// Receiving shard
        shard: ShardId,
        /// Event name (`t`)
        name: String,
        /// Sequence number (`s`)
        sequence: Option<u64>,
        /// Event data (`d`)
        data: Value,
    },
    /// A new session is established
    Ready {
        /// Shard
        shard: ShardId,
        /// Session id for later resumes
        session_id: String,
    },
    /// A previous session was resumed
    Resumed {
        /// Shard
        shard: ShardId,
    },
    /// The link dropped and the session will reconnect after a backoff
    Reconnecting {
        /// Shard
        shard: ShardId,
        /// Consecutive failed attempts, starting at 1
        attempt: u32,
        /// Whether the next handshake will resume
        resumable: bool,
        /// What caused the reconnect
        reason: ReconnectReason,
    },
    /// The session was discarded; events may have been lost and the shard
    /// will identify from scratch
    SessionReset {
        /// Shard
        shard: ShardId,
    },
    /// The session stopped for good
    Disconnected {
        /// Shard
        shard: ShardId,
        /// Why, unless it was shut down on request
        fatal: Option<GatewayErrorKind>,
    },
}

impl GatewayEvent {
    /// Shard the event belongs to.
    pub fn shard(&self) -> ShardId {
        match self {
            GatewayEvent::Dispatch { shard, .. }
            | GatewayEvent::Ready { shard, .. }
            | GatewayEvent::Resumed { shard }
            | GatewayEvent::Reconnecting { shard, .. }
            | GatewayEvent::SessionReset { shard }
            | GatewayEvent::Disconnected { shard, .. } => *shard,
        }
    }

    /// True for everything except dispatches.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, GatewayEvent::Dispatch { .. })
    }
}
