use serde::{Deserialize, Serialize};

use crate::util::json_safe_u64;

/// Acknowledgement from the server for a prior voice heartbeat.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HeartbeatAck {
    #[serde(deserialize_with = "json_safe_u64::deserialize")]
    pub nonce: u64,
}
