pub mod error;
pub(crate) mod message;
pub(crate) mod udp_rx;
pub(crate) mod udp_tx;
pub(crate) mod ws;

use flume::{Receiver, RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, instrument, warn};

use self::message::*;
use super::connection::error::Error as ConnectionError;
use super::connection::Connection;
use crate::config::Config;
use crate::events::{DisconnectReason, SessionEvent};
use crate::info::ConnectionInfo;

pub(crate) fn start(
    config: Config,
    interconnect: Interconnect,
    rx: Receiver<CoreMessage>,
    connected: watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Driver started.");
        runner(config, interconnect, rx, connected).await;
        info!("Driver finished.");
    })
}

/// A connection attempt waiting out the reconnect delay.
struct PendingConnect {
    info: ConnectionInfo,
    attempt: u32,
    at: Instant,
}

struct Core {
    config: Config,
    interconnect: Interconnect,
    connection: Option<Connection>,
    pending: Option<PendingConnect>,
    connected: watch::Sender<bool>,
}

impl Core {
    async fn connect(&mut self, info: ConnectionInfo, attempt: u32) {
        match Connection::new(info.clone(), &self.interconnect, &self.config).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.set_connected(true);
            },
            Err(why) if why.is_fatal() || attempt >= self.config.voice_connect_attempts => {
                error!("Catastrophic connection failure. Stopping. {:?}", why);

                let reason = match why {
                    ConnectionError::Closed(code) => DisconnectReason::VoiceClosed(code),
                    why => DisconnectReason::VoiceFailed(why),
                };
                let _ = self.interconnect.events.send(SessionEvent::Disconnected(reason));
            },
            Err(why) => {
                warn!("Voice connection attempt {} failed: {}.", attempt, why);
                self.interconnect.log(format!(
                    "Voice connection attempt {} failed ({}), retrying in {:?}.",
                    attempt, why, self.config.reconnect_delay
                ));

                self.pending = Some(PendingConnect {
                    info,
                    attempt: attempt + 1,
                    at: Instant::now() + self.config.reconnect_delay,
                });
            },
        }
    }

    /// Tears down the current connection, dropping state tied to its SSRCs.
    async fn drop_connection(&mut self) -> Option<ConnectionInfo> {
        self.pending = None;

        let connection = self.connection.take()?;
        let info = connection.info.clone();

        connection.shutdown().await;
        self.set_connected(false);

        self.interconnect.ssrcs.clear();
        let _ = self.interconnect.audio.send(AudioMessage::Reset);

        Some(info)
    }

    async fn reconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        self.set_connected(false);

        match connection.reconnect(&self.interconnect, &self.config).await {
            Ok(()) => {
                self.connection = Some(connection);
                self.set_connected(true);
            },
            Err(why) => {
                warn!("Voice resume failed, reconnecting fully: {}.", why);

                self.connection = Some(connection);
                self.full_reconnect().await;
            },
        }
    }

    async fn full_reconnect(&mut self) {
        if let Some(info) = self.drop_connection().await {
            self.interconnect.log("Opening a new voice session.");
            self.connect(info, 1).await;
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }
}

#[instrument(skip(config, interconnect, rx, connected))]
async fn runner(
    config: Config,
    interconnect: Interconnect,
    rx: Receiver<CoreMessage>,
    connected: watch::Sender<bool>,
) {
    let mut core = Core {
        config,
        interconnect,
        connection: None,
        pending: None,
        connected,
    };

    loop {
        let msg = if let Some(at) = core.pending.as_ref().map(|p| p.at) {
            tokio::select! {
                msg = rx.recv_async() => msg,
                () = sleep_until(at) => {
                    if let Some(pending) = core.pending.take() {
                        core.connect(pending.info, pending.attempt).await;
                    }
                    continue;
                },
            }
        } else {
            rx.recv_async().await
        };

        match msg {
            Ok(CoreMessage::Connect(info)) => {
                core.drop_connection().await;
                core.connect(info, 1).await;
            },
            Ok(CoreMessage::Disconnect) => {
                core.drop_connection().await;
            },
            Ok(CoreMessage::Reconnect) => {
                core.reconnect().await;
            },
            Ok(CoreMessage::FullReconnect) => {
                core.full_reconnect().await;
            },
            Ok(CoreMessage::Abandon(code)) => {
                if core.drop_connection().await.is_some() {
                    info!("Voice server ended the session: {:?}.", code);
                    let _ = core
                        .interconnect
                        .events
                        .send(SessionEvent::Disconnected(DisconnectReason::VoiceClosed(code)));
                }
            },
            Err(RecvError::Disconnected) | Ok(CoreMessage::Poison) => {
                break;
            },
        }
    }

    core.drop_connection().await;
    info!("Main thread exited");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use earshot_voice_model::id::{ChannelId, GuildId, UserId};

    use super::*;
    use crate::ssrc::SsrcTable;

    fn info(endpoint: &str) -> ConnectionInfo {
        ConnectionInfo {
            endpoint: endpoint.into(),
            guild_id: GuildId(1),
            channel_id: ChannelId(2),
            session_id: "session".into(),
            token: "token".into(),
            user_id: UserId(3),
        }
    }

    #[tokio::test]
    async fn invalid_endpoint_is_not_retried() {
        let (core_tx, core_rx) = flume::unbounded();
        let (audio, _audio_rx) = flume::unbounded();
        let (events, events_rx) = flume::unbounded();
        let (connected_tx, connected_rx) = watch::channel(false);

        let interconnect = Interconnect {
            core: core_tx.clone(),
            audio,
            events,
            ssrcs: Arc::new(SsrcTable::new()),
        };

        let config = Config::default().reconnect_delay(Duration::from_millis(1));
        let handle = start(config, interconnect, core_rx, connected_tx);

        core_tx.send(CoreMessage::Connect(info(""))).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            SessionEvent::Disconnected(DisconnectReason::VoiceFailed(ConnectionError::EndpointUrl))
        ));
        assert!(!*connected_rx.borrow());

        core_tx.send(CoreMessage::Poison).unwrap();
        handle.await.unwrap();
    }
}
