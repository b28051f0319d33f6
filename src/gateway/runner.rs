use std::borrow::Cow;

use flume::{Receiver, Sender};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::{sleep_until, Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::event::GatewayEvent;
use super::shard::{ReconnectType, Shard, ShardAction};
use super::{GatewayError, GatewayIntents, WsClient};
use crate::constants::GATEWAY_VERSION;
use crate::driver::VoiceHandle;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, SessionEvent};
use crate::heartbeat::Beat;

/// A message to send from the session to its [`ShardRunner`].
#[derive(Debug)]
pub(crate) enum ShardRunnerMessage {
    /// Leave voice, close the websocket cleanly, and exit.
    Shutdown,
}

/// Everything a [`ShardRunner`] needs to get started.
pub(crate) struct ShardRunnerOptions {
    pub shard: Shard,
    pub token: SecretString,
    pub gateway_url: String,
    pub intents: GatewayIntents,
    pub reconnect_delay: Duration,
    pub voice: VoiceHandle,
    pub events: Sender<SessionEvent>,
}

/// Drives the main gateway connection of a session: owns the websocket and heartbeat
/// timer, and performs whatever the [`Shard`] asks for.
pub(crate) struct ShardRunner {
    shard: Shard,
    client: Option<WsClient>,
    /// Reconnection waiting on its delay, while no websocket is open.
    pending: Option<(ReconnectType, Instant)>,
    next_heartbeat: Option<Instant>,
    token: SecretString,
    gateway_url: String,
    intents: GatewayIntents,
    reconnect_delay: Duration,
    runner_rx: Receiver<ShardRunnerMessage>,
    voice: VoiceHandle,
    events: Sender<SessionEvent>,
}

impl ShardRunner {
    pub(crate) fn new(opt: ShardRunnerOptions, runner_rx: Receiver<ShardRunnerMessage>) -> Self {
        Self {
            shard: opt.shard,
            client: None,
            pending: Some((ReconnectType::Reidentify, Instant::now())),
            next_heartbeat: None,
            token: opt.token,
            gateway_url: opt.gateway_url,
            intents: opt.intents | GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES,
            reconnect_delay: opt.reconnect_delay,
            runner_rx,
            voice: opt.voice,
            events: opt.events,
        }
    }

    /// Runs until shutdown is requested, or the gateway refuses the session.
    #[instrument(skip(self))]
    pub(crate) async fn run(mut self) {
        info!("Running");

        loop {
            tokio::select! {
                msg = self.runner_rx.recv_async() => {
                    if let Ok(msg) = msg {
                        debug!("Runner message: {:?}", msg);
                    }
                    self.shutdown().await;
                    break;
                },
                () = sleep_opt(self.next_heartbeat) => {
                    if !self.heartbeat().await {
                        self.disconnect(self.shard.reconnection_type()).await;
                    }
                },
                () = sleep_opt(self.pending.map(|(_, at)| at)) => {
                    if let Some((kind, _)) = self.pending.take() {
                        if let Err(why) = self.connect(kind).await {
                            error!("Cannot connect to the gateway: {}", why);
                            self.disconnected(why);
                            break;
                        }
                    }
                },
                event = recv_opt(self.client.as_mut()) => {
                    let action = self.shard.handle_event(event, Instant::now().into_std());

                    if self.next_heartbeat.is_none() && self.client.is_some() {
                        self.next_heartbeat =
                            self.shard.heartbeat_interval().map(|i| Instant::now() + i);
                    }

                    match action {
                        Ok(Some(action)) => {
                            if let Err(why) = self.action(action).await {
                                warn!("Failed performing gateway action: {:?}", why);
                                self.disconnect(self.shard.reconnection_type()).await;
                            }
                        },
                        Ok(None) => {},
                        Err(Error::Gateway(why)) => {
                            error!("Gateway session ended: {}", why);
                            self.close(None).await;
                            self.voice.leave();
                            self.disconnected(why);
                            break;
                        },
                        Err(why) => {
                            warn!("Unexpected shard error: {:?}", why);
                            self.disconnect(self.shard.reconnection_type()).await;
                        },
                    }
                },
            }
        }

        debug!("Shard runner exited");
    }

    /// Returns whether the connection is still alive.
    async fn heartbeat(&mut self) -> bool {
        let Some(interval) = self.shard.heartbeat_interval() else {
            self.next_heartbeat = None;
            return true;
        };

        self.next_heartbeat = Some(Instant::now() + interval);

        match self.shard.tick(Instant::now().into_std()) {
            Beat::Send => match self.client.as_mut() {
                Some(client) => match client.send_heartbeat(self.shard.seq()).await {
                    Ok(()) => true,
                    Err(why) => {
                        warn!("Error sending heartbeat: {:?}", why);
                        false
                    },
                },
                None => true,
            },
            Beat::Dead => {
                self.log("Main gateway stopped acknowledging heartbeats; reconnecting.");
                false
            },
            Beat::AlreadyDead => true,
        }
    }

    async fn action(&mut self, action: ShardAction) -> Result<()> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };

        match action {
            ShardAction::Heartbeat => client.send_heartbeat(self.shard.seq()).await,
            ShardAction::Identify => {
                client.send_identify(self.token.expose_secret(), self.intents).await?;
                self.shard.identified();
                Ok(())
            },
            ShardAction::Reconnect(kind) => {
                self.disconnect(kind).await;
                Ok(())
            },
            ShardAction::JoinVoice(join) => {
                client
                    .send_voice_state_update(
                        join.guild_id,
                        Some(join.channel_id),
                        join.self_mute,
                        join.self_deaf,
                    )
                    .await?;
                self.log(format!(
                    "Joining voice channel {} in guild {}.",
                    join.channel_id, join.guild_id
                ));
                Ok(())
            },
            ShardAction::ConnectVoice(info) => {
                self.log(format!("Connecting to voice server {}.", info.endpoint));
                self.voice.connect(info);
                Ok(())
            },
            ShardAction::LeaveVoice => {
                self.log("Removed from the voice channel.");
                self.voice.leave();
                Ok(())
            },
        }
    }

    /// Opens a websocket, resuming when asked to and possible.
    ///
    /// Connection failures are retried after the reconnect delay; only a gateway URL which
    /// cannot be parsed is an error.
    #[instrument(skip(self))]
    async fn connect(&mut self, kind: ReconnectType) -> Result<(), GatewayError> {
        let url = build_url(self.shard.ws_url(&self.gateway_url, &kind))?;

        if kind == ReconnectType::Reidentify {
            self.shard.reset();
        }
        self.shard.connecting();

        let mut client = match WsClient::connect(url).await {
            Ok(client) => client,
            Err(why) => {
                warn!("Failed to connect to the gateway: {:?}", why);
                self.log(format!(
                    "Gateway connection failed; retrying in {:?}.",
                    self.reconnect_delay
                ));
                self.pending = Some((kind, Instant::now() + self.reconnect_delay));
                return Ok(());
            },
        };

        self.shard.connected();

        if kind == ReconnectType::Resume {
            match self.shard.resuming() {
                Ok((session_id, seq)) => {
                    let token = self.token.expose_secret();
                    if let Err(why) = client.send_resume(&session_id, seq, token).await {
                        warn!("Failed to resume: {:?}", why);
                        self.client = Some(client);
                        self.disconnect(ReconnectType::Reidentify).await;
                        return Ok(());
                    }
                },
                Err(why) => debug!("Cannot resume ({}); identifying instead", why),
            }
        }

        self.client = Some(client);
        self.log("Connected to the main gateway.");
        Ok(())
    }

    /// Closes the websocket, and schedules a new connection after the reconnect delay.
    async fn disconnect(&mut self, kind: ReconnectType) {
        info!("Reconnecting ({:?}) in {:?}", kind, self.reconnect_delay);

        self.close(Some(CloseFrame {
            code: CloseCode::Library(4000),
            reason: Cow::from(""),
        }))
        .await;
        self.pending = Some((kind, Instant::now() + self.reconnect_delay));
    }

    async fn close(&mut self, frame: Option<CloseFrame<'static>>) {
        self.next_heartbeat = None;

        if let Some(mut client) = self.client.take() {
            if let Err(why) = client.close(frame).await {
                debug!("Error closing websocket: {:?}", why);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.pending = None;

        if let (Some(client), Some(join)) = (self.client.as_mut(), self.shard.voice_join()) {
            let leave =
                client.send_voice_state_update(join.guild_id, None, join.self_mute, join.self_deaf);
            if let Err(why) = leave.await {
                debug!("Could not leave voice: {:?}", why);
            }
        }

        self.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::from(""),
        }))
        .await;
    }

    fn disconnected(&self, why: GatewayError) {
        let _ = self.events.send(SessionEvent::Disconnected(DisconnectReason::Gateway(why)));
    }

    fn log(&self, line: impl Into<String>) {
        let _ = self.events.send(SessionEvent::Log(line.into()));
    }
}

/// Appends the protocol version and encoding to a gateway URL.
pub(crate) fn build_url(base: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base).map_err(|_| GatewayError::BuildingUrl)?;
    url.query_pairs_mut()
        .clear()
        .append_pair("v", &GATEWAY_VERSION.to_string())
        .append_pair("encoding", "json");

    Ok(url)
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn recv_opt(client: Option<&mut WsClient>) -> Result<GatewayEvent> {
    let Some(client) = client else {
        return std::future::pending().await;
    };

    loop {
        if let Some(event) = client.recv_json().await? {
            return Ok(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_version_and_encoding() {
        let url = build_url("wss://gateway.discord.gg").unwrap();

        assert_eq!(url.as_str(), "wss://gateway.discord.gg/?v=10&encoding=json");
    }

    #[test]
    fn resume_url_query_is_replaced() {
        let url = build_url("wss://resume.example/?v=9").unwrap();

        assert_eq!(url.query(), Some("v=10&encoding=json"));
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(build_url("not a url"), Err(GatewayError::BuildingUrl)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_opt_without_deadline_never_fires() {
        let never = sleep_opt(None);
        let soon = sleep_opt(Some(Instant::now() + Duration::from_millis(10)));

        tokio::select! {
            () = never => panic!("no deadline was given"),
            () = soon => {},
        }
    }
}
