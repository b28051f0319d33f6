use std::fmt;

use earshot_voice_model::id::{ChannelId, GuildId, UserId};

/// Voice connection details gathered from the main gateway.
///
/// A voice server can only be contacted once both the bot's voice state (carrying the voice
/// session id) and the voice server update (carrying token and endpoint) have arrived, in
/// either order.
#[derive(Clone, Debug)]
pub(crate) enum ConnectionProgress {
    Complete(ConnectionInfo),
    Incomplete(Partial),
}

impl ConnectionProgress {
    pub fn new(guild_id: GuildId, channel_id: ChannelId, user_id: UserId) -> Self {
        ConnectionProgress::Incomplete(Partial {
            guild_id,
            channel_id,
            user_id,
            ..Default::default()
        })
    }

    pub(crate) fn info(&self) -> Option<&ConnectionInfo> {
        match self {
            ConnectionProgress::Complete(c) => Some(c),
            ConnectionProgress::Incomplete(_) => None,
        }
    }

    /// Returns whether a (re)connection to the voice server is now needed.
    pub(crate) fn apply_state_update(&mut self, session_id: String) -> bool {
        use ConnectionProgress::*;
        match self {
            Complete(c) => {
                let should_reconn = c.session_id != session_id;
                c.session_id = session_id;
                should_reconn
            },
            Incomplete(i) => i
                .apply_state_update(session_id)
                .map(|info| {
                    *self = Complete(info);
                })
                .is_some(),
        }
    }

    /// Returns whether a (re)connection to the voice server is now needed.
    pub(crate) fn apply_server_update(&mut self, endpoint: String, token: String) -> bool {
        use ConnectionProgress::*;
        match self {
            Complete(c) => {
                let should_reconn = c.endpoint != endpoint || c.token != token;

                c.endpoint = endpoint;
                c.token = token;

                should_reconn
            },
            Incomplete(i) => i
                .apply_server_update(endpoint, token)
                .map(|info| {
                    *self = Complete(info);
                })
                .is_some(),
        }
    }
}

/// Parameters needed to start communicating with a voice server.
#[derive(Clone)]
pub struct ConnectionInfo {
    /// Host (and optional port) of the voice websocket server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Voice session id, taken from the bot's own voice state.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// UserID of this bot.
    pub user_id: UserId,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Clone, Default)]
pub(crate) struct Partial {
    pub endpoint: Option<String>,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub user_id: UserId,
}

impl fmt::Debug for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("token_is_some", &self.token.is_some())
            .finish()
    }
}

impl Partial {
    fn finalise(&mut self) -> Option<ConnectionInfo> {
        if self.endpoint.is_none() || self.session_id.is_none() || self.token.is_none() {
            return None;
        }

        Some(ConnectionInfo {
            endpoint: self.endpoint.take()?,
            session_id: self.session_id.take()?,
            token: self.token.take()?,
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            user_id: self.user_id,
        })
    }

    fn apply_state_update(&mut self, session_id: String) -> Option<ConnectionInfo> {
        self.session_id = Some(session_id);

        self.finalise()
    }

    fn apply_server_update(&mut self, endpoint: String, token: String) -> Option<ConnectionInfo> {
        self.endpoint = Some(endpoint);
        self.token = Some(token);

        self.finalise()
    }
}
