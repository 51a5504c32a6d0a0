//! Shard identity and guild routing.

use cordial_error::{GatewayError, GatewayErrorKind, GatewayResult};
use serde::{Deserialize, Serialize};

/// One shard of a sharded connection set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    derive_more::Display,
)]
#[display("shard {}/{}", index, count)]
pub struct ShardId {
    index: u32,
    count: u32,
}

impl ShardId {
    /// Create a shard id; `index` must be below `count`.
    #[track_caller]
    pub fn new(index: u32, count: u32) -> GatewayResult<Self> {
        if count == 0 || index >= count {
            return Err(GatewayError::new(GatewayErrorKind::InvalidShard {
                index,
                count,
            }));
        }
        Ok(Self { index, count })
    }

    /// Shard index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Total shard count.
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Shard that receives events for a guild.
///
/// ```
/// use cordial_gateway::shard_for_guild;
///
/// assert_eq!(shard_for_guild(41771983423143937, 4), 2);
/// ```
pub fn shard_for_guild(guild_id: u64, count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    ((guild_id >> 22) % u64::from(count)) as u32
}
