use serde::{Deserialize, Serialize};

use crate::util::json_safe_u64;

/// Periodic message sent by the client to keep the voice websocket alive.
///
/// The nonce is echoed back in the matching [`HeartbeatAck`].
///
/// [`HeartbeatAck`]: super::HeartbeatAck
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Heartbeat {
    #[serde(deserialize_with = "json_safe_u64::deserialize")]
    pub nonce: u64,
}
