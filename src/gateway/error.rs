use std::error::Error as StdError;
use std::fmt;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// An error that occurred while attempting to deal with the main gateway.
///
/// Most of these are handled internally by reconnecting; the ones which cannot be fixed by
/// reconnecting end the session and are reported through
/// [`DisconnectReason::Gateway`](crate::DisconnectReason::Gateway).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// There was an error building a URL.
    BuildingUrl,
    /// The connection closed, potentially uncleanly.
    Closed(Option<CloseFrame<'static>>),
    /// When invalid authentication (a bad token) was sent in the IDENTIFY.
    InvalidAuthentication,
    /// When invalid sharding data was sent in the IDENTIFY.
    InvalidShardData,
    /// When no authentication was sent in the IDENTIFY.
    NoAuthentication,
    /// When a session Id was expected (for resuming), but was not present.
    NoSessionId,
    /// When the bot is in too many guilds to connect without sharding.
    OverloadedShard,
    /// When undocumented gateway intents are provided.
    InvalidGatewayIntents,
    /// When disallowed gateway intents are provided.
    ///
    /// If an connection has been established but privileged gateway intents were provided
    /// without enabling them prior.
    DisallowedGatewayIntents,
}

impl Error {
    /// Whether reconnecting with the same credentials cannot succeed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidAuthentication
                | Self::InvalidShardData
                | Self::OverloadedShard
                | Self::InvalidGatewayIntents
                | Self::DisallowedGatewayIntents
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildingUrl => f.write_str("Error building url"),
            Self::Closed(_) => f.write_str("Connection closed"),
            Self::InvalidAuthentication => f.write_str("Sent invalid authentication"),
            Self::InvalidShardData => f.write_str("Sent invalid shard data"),
            Self::NoAuthentication => f.write_str("Sent no authentication"),
            Self::NoSessionId => f.write_str("No Session Id present when required"),
            Self::OverloadedShard => f.write_str("Bot is in too many guilds for one shard"),
            Self::InvalidGatewayIntents => f.write_str("Invalid gateway intents were provided"),
            Self::DisallowedGatewayIntents => {
                f.write_str("Disallowed gateway intents were provided")
            },
        }
    }
}

impl StdError for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_and_intent_errors_are_fatal() {
        assert!(Error::InvalidAuthentication.is_fatal());
        assert!(Error::DisallowedGatewayIntents.is_fatal());
        assert!(!Error::Closed(None).is_fatal());
        assert!(!Error::NoSessionId.is_fatal());
        assert_eq!(Error::NoSessionId.to_string(), "No Session Id present when required");
    }
}
