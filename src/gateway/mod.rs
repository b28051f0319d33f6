//! The main gateway connection: the websocket a session logs in through, and the source
//! of the voice server details the driver connects with.
//!
//! The protocol logic lives in [`Shard`], which performs no I/O of its own; a runner task
//! owns the socket and heartbeat timer and acts on what the shard returns.

mod error;
mod event;
pub(crate) mod runner;
mod shard;
mod ws;

use bitflags::bitflags;

pub use self::error::Error as GatewayError;
pub use self::event::{
    CurrentUser,
    Event,
    GatewayEvent,
    ReadyEvent,
    VoiceServerUpdateEvent,
    VoiceStateUpdateEvent,
};
pub use self::shard::{ConnectionStage, ReconnectType, Shard, ShardAction, VoiceJoin};
pub use self::ws::WsClient;

bitflags! {
    /// [Gateway Intents] will limit the events your bot will receive via the gateway.
    ///
    /// Only guild and voice state events are needed to join a channel and listen to it; both
    /// are always sent, whatever else is configured.
    ///
    /// [Gateway Intents]: https://discord.com/developers/docs/topics/gateway#gateway-intents
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct GatewayIntents: u64 {
        /// Enables guild create, update and delete events.
        const GUILDS = 1;
        /// Enables guild member events. Privileged.
        const GUILD_MEMBERS = 1 << 1;
        /// Enables voice state update events.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Enables guild message events.
        const GUILD_MESSAGES = 1 << 9;
        /// Enables message content in message events. Privileged.
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl Default for GatewayIntents {
    fn default() -> Self {
        Self::GUILDS | Self::GUILD_VOICE_STATES
    }
}
