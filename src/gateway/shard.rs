use std::fmt;
use std::time::{Duration, Instant};

use earshot_voice_model::id::{ChannelId, GuildId, UserId};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, error, info, instrument, trace, warn};

use super::event::{Event, GatewayEvent};
use super::GatewayError;
use crate::constants::close_codes;
use crate::error::{Error, Result};
use crate::heartbeat::{Beat, HeartbeatState};
use crate::info::{ConnectionInfo, ConnectionProgress};

/// A voice channel the session should sit in, with the flags sent when joining it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VoiceJoin {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// The main gateway protocol state for one connection, without any I/O.
///
/// The [`ShardRunner`] owns the websocket: it feeds every received frame through
/// [`Shard::handle_event`] and performs the [`ShardAction`] that comes back.
///
/// [`ShardRunner`]: super::ShardRunner
pub struct Shard {
    heartbeat: HeartbeatState,
    heartbeat_interval: Option<Duration>,
    seq: Option<u64>,
    session_id: Option<String>,
    resume_ws_url: Option<String>,
    user_id: Option<UserId>,
    stage: ConnectionStage,
    voice: Option<VoiceJoin>,
    progress: Option<ConnectionProgress>,
}

impl Shard {
    /// Creates the state for a session which joins `voice` once it is ready.
    #[must_use]
    pub fn new(voice: Option<VoiceJoin>) -> Self {
        Self {
            heartbeat: HeartbeatState::new(0, None),
            heartbeat_interval: None,
            seq: None,
            session_id: None,
            resume_ws_url: None,
            user_id: None,
            stage: ConnectionStage::Disconnected,
            voice,
            progress: None,
        }
    }

    /// Returns the current connection stage of the shard.
    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    /// Sequence number of the last dispatch received.
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The bot's own user, known once READY has arrived.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// Returns the heartbeat interval dictated by the gateway, if the Hello has been received.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Round trip between the last heartbeat and its acknowledgement.
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    pub fn voice_join(&self) -> Option<VoiceJoin> {
        self.voice
    }

    /// Voice server details, once both voice updates have arrived.
    pub fn voice_info(&self) -> Option<&ConnectionInfo> {
        self.progress.as_ref().and_then(ConnectionProgress::info)
    }

    /// URL to use for the next connection: the resume URL while a session can be resumed.
    pub fn ws_url<'a>(&'a self, base: &'a str, kind: &ReconnectType) -> &'a str {
        match (kind, &self.resume_ws_url) {
            (ReconnectType::Resume, Some(url)) if self.session_id.is_some() => url,
            _ => base,
        }
    }

    pub fn reconnection_type(&self) -> ReconnectType {
        if self.session_id.is_some() && self.seq.is_some() {
            ReconnectType::Resume
        } else {
            ReconnectType::Reidentify
        }
    }

    /// Marks the shard as opening a new websocket.
    pub fn connecting(&mut self) {
        self.stage = ConnectionStage::Connecting;
    }

    /// Marks a freshly opened websocket, which now waits for the Hello.
    pub fn connected(&mut self) {
        self.heartbeat.reset();
        self.heartbeat_interval = None;
        self.stage = ConnectionStage::Handshake;
    }

    /// Sets the shard as having sent an IDENTIFY.
    pub fn identified(&mut self) {
        self.stage = ConnectionStage::Identifying;
    }

    /// Sets the shard as resuming, returning the session id and sequence to resume from.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoSessionId`] if there is no session to resume.
    pub fn resuming(&mut self) -> Result<(String, u64), GatewayError> {
        match (&self.session_id, self.seq) {
            (Some(session_id), Some(seq)) => {
                self.stage = ConnectionStage::Resuming;
                Ok((session_id.clone(), seq))
            },
            _ => Err(GatewayError::NoSessionId),
        }
    }

    /// Forgets the session, so the next connection IDENTIFYs from scratch.
    #[instrument(skip(self))]
    pub fn reset(&mut self) {
        self.heartbeat.reset();
        self.heartbeat_interval = None;
        self.session_id = None;
        self.resume_ws_url = None;
        self.seq = None;
        self.progress = None;
        self.stage = ConnectionStage::Disconnected;
    }

    /// Handles the heartbeat timer firing.
    ///
    /// A heartbeat which is still unacknowledged when the next one is due means the
    /// connection is dead.
    pub fn tick(&mut self, now: Instant) -> Beat {
        let beat = self.heartbeat.tick(now);

        if beat == Beat::Dead {
            warn!("Last heartbeat not acknowledged");
        }

        beat
    }

    #[instrument(skip(self, event))]
    fn handle_gateway_dispatch(&mut self, seq: u64, event: Event) -> Option<ShardAction> {
        if let Some(last) = self.seq {
            if seq > last + 1 {
                warn!("Sequence off; them: {}, us: {}", seq, last);
            }
        }

        self.seq = Some(seq);

        match event {
            Event::Ready(ready) => {
                debug!("Received Ready");

                self.resume_ws_url = ready.resume_gateway_url;
                self.session_id = Some(ready.session_id);
                self.user_id = Some(ready.user.id);
                self.stage = ConnectionStage::Connected;

                let voice = self.voice?;
                self.progress =
                    Some(ConnectionProgress::new(voice.guild_id, voice.channel_id, ready.user.id));

                Some(ShardAction::JoinVoice(voice))
            },
            Event::Resumed => {
                info!("Resumed");

                self.stage = ConnectionStage::Connected;
                None
            },
            Event::VoiceStateUpdate(state) => {
                let guild = self.voice.map(|v| v.guild_id);
                if Some(state.user_id) != self.user_id || state.guild_id != guild {
                    return None;
                }

                if state.channel_id.is_none() {
                    info!("Removed from voice channel.");
                    self.progress = self
                        .voice
                        .zip(self.user_id)
                        .map(|(v, user)| ConnectionProgress::new(v.guild_id, v.channel_id, user));

                    return Some(ShardAction::LeaveVoice);
                }

                let progress = self.progress.as_mut()?;
                progress
                    .apply_state_update(state.session_id)
                    .then(|| progress.info().cloned().map(ShardAction::ConnectVoice))
                    .flatten()
            },
            Event::VoiceServerUpdate(server) => {
                if Some(server.guild_id) != self.voice.map(|v| v.guild_id) {
                    return None;
                }

                let Some(endpoint) = server.endpoint else {
                    debug!("Voice server is being reallocated.");
                    return None;
                };

                let progress = self.progress.as_mut()?;
                progress
                    .apply_server_update(endpoint, server.token)
                    .then(|| progress.info().cloned().map(ShardAction::ConnectVoice))
                    .flatten()
            },
            Event::Unknown(kind) => {
                trace!("Ignoring {} dispatch.", kind);
                None
            },
        }
    }

    #[instrument(skip(self))]
    fn handle_gateway_closed(
        &mut self,
        data: Option<&CloseFrame<'static>>,
    ) -> Result<Option<ShardAction>> {
        let num = data.map(|d| d.code.into());
        let clean = num == Some(1000);

        match num {
            Some(close_codes::UNKNOWN_OPCODE) => {
                warn!("Sent invalid opcode.");
            },
            Some(close_codes::DECODE_ERROR) => {
                warn!("Sent invalid message.");
            },
            Some(close_codes::NOT_AUTHENTICATED) => {
                warn!("Sent no authentication.");

                return Err(Error::Gateway(GatewayError::NoAuthentication));
            },
            Some(close_codes::AUTHENTICATION_FAILED) => {
                error!("Sent invalid authentication, please check the token.");

                return Err(Error::Gateway(GatewayError::InvalidAuthentication));
            },
            Some(close_codes::ALREADY_AUTHENTICATED) => {
                warn!("Already authenticated.");
            },
            Some(close_codes::INVALID_SEQUENCE) => {
                warn!("Sent invalid seq: {:?}.", self.seq);

                self.seq = None;
            },
            Some(close_codes::RATE_LIMITED) => {
                warn!("Gateway ratelimited.");
            },
            Some(close_codes::INVALID_SHARD) => {
                warn!("Sent invalid shard data.");

                return Err(Error::Gateway(GatewayError::InvalidShardData));
            },
            Some(close_codes::SHARDING_REQUIRED) => {
                error!("Bot has too many guilds for a single shard.");

                return Err(Error::Gateway(GatewayError::OverloadedShard));
            },
            Some(close_codes::SESSION_NO_LONGER_VALID | close_codes::SESSION_TIMEOUT) => {
                info!("Invalid session.");

                self.session_id = None;
            },
            Some(close_codes::INVALID_GATEWAY_INTENTS) => {
                error!("Invalid gateway intents have been provided.");

                return Err(Error::Gateway(GatewayError::InvalidGatewayIntents));
            },
            Some(close_codes::DISALLOWED_GATEWAY_INTENTS) => {
                error!("Disallowed gateway intents have been provided.");

                return Err(Error::Gateway(GatewayError::DisallowedGatewayIntents));
            },
            Some(other) if !clean => {
                warn!("Unknown unclean close {}: {:?}", other, data.map(|d| &d.reason));
            },
            _ => {},
        }

        Ok(Some(ShardAction::Reconnect(self.reconnection_type())))
    }

    /// Handles a frame, or a receive error, from the gateway.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the gateway closed the connection for a reason which
    /// reconnecting cannot fix, such as an invalid token or disallowed intents.
    #[instrument(skip(self, event))]
    pub fn handle_event(
        &mut self,
        event: Result<GatewayEvent>,
        now: Instant,
    ) -> Result<Option<ShardAction>> {
        match event {
            Ok(GatewayEvent::Dispatch {
                seq,
                event,
            }) => Ok(self.handle_gateway_dispatch(seq, event)),
            Ok(GatewayEvent::Heartbeat(s)) => {
                info!("Received shard heartbeat request {:?}", s);

                Ok(Some(ShardAction::Heartbeat))
            },
            Ok(GatewayEvent::HeartbeatAck) => {
                self.heartbeat.ack(now);

                trace!("Received heartbeat ack");

                Ok(None)
            },
            Ok(GatewayEvent::Hello(interval)) => {
                debug!("Received a Hello; interval: {}", interval);

                self.heartbeat_interval = Some(Duration::from_millis(interval));

                Ok(match self.stage {
                    ConnectionStage::Handshake => Some(ShardAction::Identify),
                    ConnectionStage::Resuming => None,
                    _ => {
                        debug!("Received late Hello; autoreconnecting");

                        Some(ShardAction::Reconnect(self.reconnection_type()))
                    },
                })
            },
            Ok(GatewayEvent::InvalidateSession(resumable)) => {
                info!("Received session invalidation");

                if !resumable {
                    self.session_id = None;
                }

                Ok(Some(ShardAction::Reconnect(self.reconnection_type())))
            },
            Ok(GatewayEvent::Reconnect) => {
                Ok(Some(ShardAction::Reconnect(self.reconnection_type())))
            },
            Err(Error::Gateway(GatewayError::Closed(data))) => {
                self.handle_gateway_closed(data.as_ref())
            },
            Err(Error::Tungstenite(why)) => {
                warn!("Websocket error: {:?}", why);
                info!("Will attempt to auto-reconnect");

                Ok(Some(ShardAction::Reconnect(self.reconnection_type())))
            },
            Err(why) => {
                warn!("Unhandled error: {:?}", why);
                Ok(None)
            },
        }
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("stage", &self.stage)
            .field("seq", &self.seq)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}

/// What the [`ShardRunner`](super::ShardRunner) should do after an event.
#[derive(Debug)]
#[non_exhaustive]
pub enum ShardAction {
    Heartbeat,
    Identify,
    Reconnect(ReconnectType),
    /// Send a voice state update joining the channel.
    JoinVoice(VoiceJoin),
    /// Both voice updates are in: (re)connect to the voice server.
    ConnectVoice(ConnectionInfo),
    /// The bot was removed from its voice channel.
    LeaveVoice,
}

/// Indicates the current connection stage of a [`Shard`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ConnectionStage {
    /// Indicator that the [`Shard`] is normally connected and is not in, e.g., a resume phase.
    Connected,
    /// Indicator that the [`Shard`] is connecting and is in, e.g., a resume phase.
    Connecting,
    /// Indicator that the [`Shard`] is fully disconnected and is not in a reconnecting phase.
    Disconnected,
    /// Indicator that the [`Shard`] is waiting for the gateway's Hello.
    Handshake,
    /// Indicator that the [`Shard`] has sent an IDENTIFY packet and is awaiting a READY packet.
    Identifying,
    /// Indicator that the [`Shard`] has sent a RESUME packet and is awaiting a RESUMED packet.
    Resuming,
}

impl ConnectionStage {
    /// Whether the stage is a form of connecting.
    ///
    /// ```rust
    /// use earshot::gateway::ConnectionStage;
    ///
    /// assert!(ConnectionStage::Identifying.is_connecting());
    /// assert!(!ConnectionStage::Connected.is_connecting());
    /// ```
    #[must_use]
    pub fn is_connecting(self) -> bool {
        use self::ConnectionStage::{Connecting, Handshake, Identifying, Resuming};
        matches!(self, Connecting | Handshake | Identifying | Resuming)
    }
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
            Self::Handshake => "handshaking",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
        })
    }
}

/// The type of reconnection that should be performed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReconnectType {
    /// Indicator that a new connection should be made by sending an IDENTIFY.
    Reidentify,
    /// Indicator that a new connection should be made by sending a RESUME.
    Resume,
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::super::event::{
        CurrentUser,
        ReadyEvent,
        VoiceServerUpdateEvent,
        VoiceStateUpdateEvent,
    };
    use super::*;

    const GUILD: GuildId = GuildId(41);
    const CHANNEL: ChannelId = ChannelId(7);
    const ME: UserId = UserId(100);

    fn join() -> VoiceJoin {
        VoiceJoin {
            guild_id: GUILD,
            channel_id: CHANNEL,
            self_mute: true,
            self_deaf: false,
        }
    }

    fn dispatch(seq: u64, event: Event) -> Result<GatewayEvent> {
        Ok(GatewayEvent::Dispatch {
            seq,
            event,
        })
    }

    fn ready() -> Event {
        Event::Ready(ReadyEvent {
            session_id: "main-session".into(),
            resume_gateway_url: Some("wss://resume.example".into()),
            user: CurrentUser {
                id: ME,
                username: "bot".into(),
            },
        })
    }

    fn state(user: UserId, channel: Option<ChannelId>, session: &str) -> Event {
        Event::VoiceStateUpdate(VoiceStateUpdateEvent {
            guild_id: Some(GUILD),
            channel_id: channel,
            user_id: user,
            session_id: session.into(),
        })
    }

    fn server(endpoint: &str, token: &str) -> Event {
        Event::VoiceServerUpdate(VoiceServerUpdateEvent {
            guild_id: GUILD,
            endpoint: Some(endpoint.into()),
            token: token.into(),
        })
    }

    fn closed(code: u16) -> Result<GatewayEvent> {
        Err(Error::Gateway(GatewayError::Closed(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Borrowed(""),
        }))))
    }

    fn connected_shard() -> Shard {
        let now = Instant::now();
        let mut shard = Shard::new(Some(join()));
        shard.connecting();
        shard.connected();
        shard.handle_event(Ok(GatewayEvent::Hello(41250)), now).unwrap();
        shard.identified();
        shard.handle_event(dispatch(1, ready()), now).unwrap();
        shard
    }

    #[test]
    fn hello_identifies_once() {
        let now = Instant::now();
        let mut shard = Shard::new(None);
        shard.connecting();
        shard.connected();

        let action = shard.handle_event(Ok(GatewayEvent::Hello(41250)), now).unwrap();
        assert!(matches!(action, Some(ShardAction::Identify)));
        assert_eq!(shard.heartbeat_interval(), Some(Duration::from_millis(41250)));
        shard.identified();

        // The first tick sends a heartbeat rather than identifying again.
        assert_eq!(shard.tick(now + Duration::from_millis(41250)), Beat::Send);
        assert_eq!(shard.stage(), ConnectionStage::Identifying);

        let action = shard.handle_event(Ok(GatewayEvent::Hello(41250)), now).unwrap();
        assert!(matches!(action, Some(ShardAction::Reconnect(ReconnectType::Reidentify))));
    }

    #[test]
    fn unacked_heartbeat_is_dead_once() {
        let now = Instant::now();
        let mut shard = connected_shard();
        let interval = Duration::from_millis(41250);

        assert_eq!(shard.tick(now), Beat::Send);
        let acked = now + Duration::from_millis(30);
        shard.handle_event(Ok(GatewayEvent::HeartbeatAck), acked).unwrap();
        assert_eq!(shard.latency(), Some(Duration::from_millis(30)));

        assert_eq!(shard.tick(now + interval), Beat::Send);
        assert_eq!(shard.tick(now + 2 * interval), Beat::Dead);
        assert_eq!(shard.tick(now + 3 * interval), Beat::AlreadyDead);

        assert_eq!(shard.reconnection_type(), ReconnectType::Resume);
    }

    #[test]
    fn ready_joins_voice() {
        let now = Instant::now();
        let mut shard = Shard::new(Some(join()));
        shard.connected();
        shard.handle_event(Ok(GatewayEvent::Hello(41250)), now).unwrap();
        shard.identified();

        let action = shard.handle_event(dispatch(1, ready()), now).unwrap();
        assert!(matches!(action, Some(ShardAction::JoinVoice(v)) if v == join()));
        assert_eq!(shard.stage(), ConnectionStage::Connected);
        assert_eq!(shard.session_id(), Some("main-session"));
        assert_eq!(shard.seq(), Some(1));
    }

    #[test]
    fn ready_without_voice_join_does_nothing() {
        let now = Instant::now();
        let mut shard = Shard::new(None);
        shard.connected();

        let action = shard.handle_event(dispatch(1, ready()), now).unwrap();
        assert!(action.is_none());
        assert_eq!(shard.user_id(), Some(ME));
    }

    #[test]
    fn voice_connects_once_both_updates_arrive() {
        let now = Instant::now();
        let mut shard = connected_shard();

        let event = dispatch(2, server("voice.example:80", "tok"));
        let action = shard.handle_event(event, now).unwrap();
        assert!(action.is_none());

        // Other users' voice states are not ours.
        let event = dispatch(3, state(UserId(5), Some(CHANNEL), "x"));
        let action = shard.handle_event(event, now).unwrap();
        assert!(action.is_none());

        let event = dispatch(4, state(ME, Some(CHANNEL), "voice-session"));
        let action = shard.handle_event(event, now).unwrap();
        let Some(ShardAction::ConnectVoice(info)) = action else {
            panic!("expected a voice connection");
        };
        assert_eq!(info.endpoint, "voice.example:80");
        assert_eq!(info.session_id, "voice-session");
        assert_eq!(info.token, "tok");
        assert_eq!(info.user_id, ME);
        assert_eq!(info.guild_id, GUILD);
    }

    #[test]
    fn voice_server_migration_reconnects() {
        let now = Instant::now();
        let mut shard = connected_shard();
        shard.handle_event(dispatch(2, state(ME, Some(CHANNEL), "voice-session")), now).unwrap();
        shard.handle_event(dispatch(3, server("a.example", "tok")), now).unwrap();

        let same = shard.handle_event(dispatch(4, server("a.example", "tok")), now).unwrap();
        assert!(same.is_none());

        let moved = shard.handle_event(dispatch(5, server("b.example", "tok2")), now).unwrap();
        assert!(matches!(
            moved,
            Some(ShardAction::ConnectVoice(info)) if info.endpoint == "b.example"
        ));
    }

    #[test]
    fn removed_from_channel_leaves_voice() {
        let now = Instant::now();
        let mut shard = connected_shard();
        shard.handle_event(dispatch(2, state(ME, Some(CHANNEL), "voice-session")), now).unwrap();
        shard.handle_event(dispatch(3, server("a.example", "tok")), now).unwrap();
        assert!(shard.voice_info().is_some());

        let event = dispatch(4, state(ME, None, "voice-session"));
        let action = shard.handle_event(event, now).unwrap();
        assert!(matches!(action, Some(ShardAction::LeaveVoice)));
        assert!(shard.voice_info().is_none());
    }

    #[test]
    fn fatal_close_codes() {
        let now = Instant::now();

        for code in [4004, 4013, 4014] {
            let mut shard = connected_shard();
            let err = shard.handle_event(closed(code), now).unwrap_err();
            assert!(matches!(err, Error::Gateway(e) if e.is_fatal()), "code {code}");
        }
    }

    #[test]
    fn invalid_session_close_reidentifies() {
        let now = Instant::now();
        let mut shard = connected_shard();

        let action = shard.handle_event(closed(4006), now).unwrap();
        assert!(matches!(action, Some(ShardAction::Reconnect(ReconnectType::Reidentify))));
    }

    #[test]
    fn transient_close_resumes() {
        let now = Instant::now();
        let mut shard = connected_shard();

        let action = shard.handle_event(closed(4000), now).unwrap();
        assert!(matches!(action, Some(ShardAction::Reconnect(ReconnectType::Resume))));
        assert_eq!(
            shard.ws_url("wss://gateway.example", &ReconnectType::Resume),
            "wss://resume.example"
        );

        let (session, seq) = shard.resuming().unwrap();
        assert_eq!((session.as_str(), seq), ("main-session", 1));
        assert_eq!(shard.stage(), ConnectionStage::Resuming);
    }

    #[test]
    fn invalidated_session_is_forgotten() {
        let now = Instant::now();
        let mut shard = connected_shard();

        let action = shard.handle_event(Ok(GatewayEvent::InvalidateSession(false)), now).unwrap();
        assert!(matches!(action, Some(ShardAction::Reconnect(ReconnectType::Reidentify))));
        assert!(matches!(shard.resuming(), Err(GatewayError::NoSessionId)));
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let now = Instant::now();
        let mut shard = connected_shard();
        let json_err = serde_json::from_str::<GatewayEvent>("{").unwrap_err();

        let action = shard.handle_event(Err(Error::Json(json_err)), now).unwrap();
        assert!(action.is_none());
        assert_eq!(shard.stage(), ConnectionStage::Connected);
    }
}
