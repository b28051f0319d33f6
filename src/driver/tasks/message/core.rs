use earshot_voice_model::CloseCode;

use crate::info::ConnectionInfo;

#[derive(Debug)]
pub enum CoreMessage {
    /// Connect, or move to a new voice server.
    Connect(ConnectionInfo),
    /// Drop the current voice connection.
    Disconnect,
    /// Try to resume the voice session, falling back to a full connect.
    Reconnect,
    /// Open a fresh voice session with the last known connection info.
    FullReconnect,
    /// The voice server ended the session, and it must not be retried.
    Abandon(Option<CloseCode>),
    Poison,
}
