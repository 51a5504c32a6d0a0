//! Gateway frame envelope and the payloads the session reads or writes.
//!
//! Every frame is `{op, d, s, t}`; `s` and `t` are only set on dispatches.

use crate::{IdentifyOptions, ShardId};
use cordial_error::{GatewayError, GatewayErrorKind, GatewayResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Gateway operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Opcode {
    /// Event dispatch (receive)
    Dispatch,
    /// Heartbeat (send, or receive as a request for one)
    Heartbeat,
    /// Start a new session (send)
    Identify,
    /// Update the client's presence (send)
    PresenceUpdate,
    /// Join, move or leave voice channels (send)
    VoiceStateUpdate,
    /// Replay missed events on a previous session (send)
    Resume,
    /// Server asks the client to reconnect and resume (receive)
    Reconnect,
    /// Request guild member chunks (send)
    RequestGuildMembers,
    /// Session is invalid; `d` says whether it can be resumed (receive)
    InvalidSession,
    /// First frame after connecting, carries the heartbeat interval (receive)
    Hello,
    /// Heartbeat acknowledged (receive)
    HeartbeatAck,
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::Dispatch => 0,
            Opcode::Heartbeat => 1,
            Opcode::Identify => 2,
            Opcode::PresenceUpdate => 3,
            Opcode::VoiceStateUpdate => 4,
            Opcode::Resume => 6,
            Opcode::Reconnect => 7,
            Opcode::RequestGuildMembers => 8,
            Opcode::InvalidSession => 9,
            Opcode::Hello => 10,
            Opcode::HeartbeatAck => 11,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Opcode::Dispatch,
            1 => Opcode::Heartbeat,
            2 => Opcode::Identify,
            3 => Opcode::PresenceUpdate,
            4 => Opcode::VoiceStateUpdate,
            6 => Opcode::Resume,
            7 => Opcode::Reconnect,
            8 => Opcode::RequestGuildMembers,
            9 => Opcode::InvalidSession,
            10 => Opcode::Hello,
            11 => Opcode::HeartbeatAck,
            other => return Err(format!("unknown opcode {}", other)),
        })
    }
}

/// One gateway frame.
///
/// # Example
///
/// ```
/// use cordial_gateway::{GatewayPayload, Opcode};
///
/// let frame: GatewayPayload =
///     serde_json::from_str(r#"{"op": 10, "d": {"heartbeat_interval": 41250}}"#).unwrap();
/// assert_eq!(frame.op, Opcode::Hello);
/// assert_eq!(frame.hello().unwrap().heartbeat_interval, 41250);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Operation code
    pub op: Opcode,
    /// Event data
    #[serde(default)]
    pub d: Value,
    /// Sequence number, dispatches only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, dispatches only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Data of a Hello frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Hello {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Session details from the READY dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadyInfo {
    /// Session id for resuming
    pub session_id: String,
    /// URL to use when resuming this session
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// Shard pair the server assigned
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

impl GatewayPayload {
    fn outbound(op: Opcode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last sequence seen.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::outbound(Opcode::Heartbeat, json!(sequence))
    }

    /// Identify for one shard.
    pub fn identify(options: &IdentifyOptions, shard: ShardId) -> Self {
        let mut d = json!({
            "token": options.token(),
            "properties": options.properties(),
            "compress": false,
            "large_threshold": options.large_threshold(),
            "shard": [shard.index(), shard.count()],
            "intents": options.intents(),
        });
        if let (Some(presence), Some(map)) = (options.presence(), d.as_object_mut()) {
            map.insert("presence".to_string(), presence.clone());
        }
        Self::outbound(Opcode::Identify, d)
    }

    /// Resume a previous session.
    pub fn resume(token: &str, session_id: &str, sequence: u64) -> Self {
        Self::outbound(
            Opcode::Resume,
            json!({
                "token": token,
                "session_id": session_id,
                "seq": sequence,
            }),
        )
    }

    /// Presence update.
    pub fn presence_update(presence: Value) -> Self {
        Self::outbound(Opcode::PresenceUpdate, presence)
    }

    /// Request guild members.
    pub fn request_guild_members(request: Value) -> Self {
        Self::outbound(Opcode::RequestGuildMembers, request)
    }

    /// Heartbeat interval, if this is a Hello.
    pub fn hello(&self) -> Option<Hello> {
        match self.op {
            Opcode::Hello => serde_json::from_value(self.d.clone()).ok(),
            _ => None,
        }
    }

    /// Resumability flag, if this is an Invalid Session.
    pub fn invalid_session_resumable(&self) -> Option<bool> {
        match self.op {
            Opcode::InvalidSession => Some(self.d.as_bool().unwrap_or(false)),
            _ => None,
        }
    }

    /// Decode a text frame.
    pub fn from_text(text: &str) -> GatewayResult<Self> {
        serde_json::from_str(text).map_err(|e| {
            GatewayError::new(GatewayErrorKind::InvalidPayload(format!(
                "Failed to decode frame: {}",
                e
            )))
        })
    }

    /// Encode for the wire.
    pub fn to_text(&self) -> GatewayResult<String> {
        serde_json::to_string(self).map_err(|e| {
            GatewayError::new(GatewayErrorKind::InvalidPayload(format!(
                "Failed to encode frame: {}",
                e
            )))
        })
    }

    /// Frame rendered for logs, with the token hidden.
    pub fn redacted(&self) -> String {
        let mut copy = self.clone();
        if let Some(token) = copy.d.get_mut("token") {
            *token = Value::String("[redacted]".to_string());
        }
        copy.to_text().unwrap_or_else(|_| format!("{:?}", copy.op))
    }
}
