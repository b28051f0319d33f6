pub mod error;
pub(crate) mod handshake;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use earshot_voice_model::payload::{Identify, Resume};
use earshot_voice_model::Event as GatewayEvent;
use flume::Sender;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use self::error::{Error, Result};
use self::handshake::{Handshake, HandshakeAction};
use super::discovery;
use super::tasks::error::Recipient;
use super::tasks::message::*;
use super::tasks::{udp_rx, udp_tx, ws as ws_task};
use crate::config::Config;
use crate::constants::*;
use crate::heartbeat::HeartbeatState;
use crate::info::ConnectionInfo;
use crate::ws::{self, Error as WsError, ReceiverExt, SenderExt, WsStream};

/// A live voice connection: its websocket task plus the UDP receive and keepalive tasks.
pub(crate) struct Connection {
    pub(crate) info: ConnectionInfo,
    pub(crate) ssrc: u32,
    pub(crate) ws: Sender<WsMessage>,
    udp_rx: Sender<UdpRxMessage>,
    udp_tx: Sender<UdpTxMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    #[instrument(skip(interconnect, config))]
    pub(crate) async fn new(
        info: ConnectionInfo,
        interconnect: &Interconnect,
        config: &Config,
    ) -> Result<Connection> {
        let url = generate_url(&info.endpoint)?;
        let mut client = connect_ws(&url, config.handshake_timeout).await?;

        let mut handshake = Handshake::new(config.crypto_mode);
        let mut udp = None;

        let crypto = loop {
            let event = next_event(&mut client, config.handshake_timeout).await?;
            trace!("Handshake {:?} received {:?}.", handshake.stage(), event);

            match handshake.handle(event)? {
                HandshakeAction::Wait => {},
                HandshakeAction::Identify => {
                    client
                        .send_json(&GatewayEvent::from(Identify {
                            server_id: info.guild_id,
                            session_id: info.session_id.clone(),
                            token: info.token.clone(),
                            user_id: info.user_id,
                        }))
                        .await?;
                    handshake.identify_sent();
                },
                HandshakeAction::Discover {
                    ssrc,
                    server,
                    mode,
                } => {
                    let socket = bind_udp(server).await?;
                    let timeout = config.discovery_timeout;
                    let addr = discovery::discover_or_local(&socket, ssrc, timeout).await?;

                    debug!("Selecting {} at {:?}.", mode, addr);
                    let select = handshake.select_protocol(addr.addr())?;
                    client.send_json(&GatewayEvent::from(select)).await?;

                    udp = Some(socket);
                },
                HandshakeAction::Established(crypto) => break crypto,
                HandshakeAction::Resumed => return Err(Error::ExpectedHandshake),
            }
        };

        let (Some(udp), Some(ready), Some(heartbeat_interval)) =
            (udp, handshake.ready(), handshake.heartbeat_interval())
        else {
            return Err(Error::ExpectedHandshake);
        };
        let ssrc = ready.ssrc;

        info!("Connected to: {}", info.endpoint);
        info!("WS heartbeat duration {}ms.", heartbeat_interval);
        interconnect.log(format!(
            "Voice connected to {} as SSRC {} ({}).",
            info.endpoint,
            ssrc,
            crypto.mode()
        ));

        for event in handshake.take_deferred() {
            ws_task::apply_voice_event(interconnect, event);
        }

        let (ws_msg_tx, ws_msg_rx) = flume::unbounded();
        let (udp_sender_msg_tx, udp_sender_msg_rx) = flume::unbounded();
        let (udp_receiver_msg_tx, udp_receiver_msg_rx) = flume::unbounded();
        let udp = Arc::new(udp);

        let heartbeat = HeartbeatState::new(
            config.voice_heartbeat_max_missed,
            Some(config.voice_heartbeat_ack_timeout),
        );

        let tasks = vec![
            tokio::spawn(ws_task::runner(
                interconnect.clone(),
                ws_msg_rx,
                client,
                heartbeat_interval,
                heartbeat,
            )),
            tokio::spawn(udp_rx::runner(
                interconnect.clone(),
                udp_receiver_msg_rx,
                crypto,
                Arc::clone(&udp),
                config.udp_poll_timeout,
            )),
            tokio::spawn(udp_tx::runner(udp_sender_msg_rx, udp)),
        ];

        Ok(Connection {
            info,
            ssrc,
            ws: ws_msg_tx,
            udp_rx: udp_receiver_msg_tx,
            udp_tx: udp_sender_msg_tx,
            tasks,
        })
    }

    /// Resumes the voice session over a new websocket, keeping the UDP tasks and keys.
    ///
    /// # Errors
    ///
    /// Fails if the UDP tasks have stopped, in which case only a full reconnect helps, or if
    /// the server does not accept the resume.
    #[instrument(skip(self, interconnect, config))]
    pub(crate) async fn reconnect(
        &mut self,
        interconnect: &Interconnect,
        config: &Config,
    ) -> Result<()> {
        if self.udp_rx.is_disconnected() {
            return Err(Error::InterconnectFailure(Recipient::UdpRx));
        }
        if self.udp_tx.is_disconnected() {
            return Err(Error::InterconnectFailure(Recipient::UdpTx));
        }

        let url = generate_url(&self.info.endpoint)?;
        let mut client = connect_ws(&url, config.handshake_timeout).await?;

        client
            .send_json(&GatewayEvent::from(Resume {
                server_id: self.info.guild_id,
                session_id: self.info.session_id.clone(),
                token: self.info.token.clone(),
            }))
            .await?;

        let mut handshake = Handshake::resume();

        loop {
            let event = next_event(&mut client, config.handshake_timeout).await?;

            match handshake.handle(event)? {
                HandshakeAction::Resumed => break,
                HandshakeAction::Wait => {},
                _ => return Err(Error::ExpectedHandshake),
            }
        }

        let heartbeat_interval = handshake.heartbeat_interval().ok_or(Error::ExpectedHandshake)?;

        self.ws.send(WsMessage::SetKeepalive(heartbeat_interval))?;
        self.ws.send(WsMessage::Ws(Box::new(client)))?;

        for event in handshake.take_deferred() {
            ws_task::apply_voice_event(interconnect, event);
        }

        info!("Reconnected to: {}", &self.info.endpoint);
        interconnect.log(format!("Voice session resumed on {}.", self.info.endpoint));

        Ok(())
    }

    /// Stops every task of this connection and waits for them, closing both sockets.
    pub(crate) async fn shutdown(mut self) {
        self.poison();

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Voice task ended abnormally: {:?}.", e);
            }
        }
    }

    fn poison(&self) {
        let _ = self.ws.send(WsMessage::Poison);
        let _ = self.udp_rx.send(UdpRxMessage::Poison);
        let _ = self.udp_tx.send(UdpTxMessage::Poison);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.poison();
        info!("Disconnected");
    }
}

async fn connect_ws(url: &Url, wait: Duration) -> Result<WsStream> {
    Ok(timeout(wait, ws::create_client(url)).await.map_err(|_| Error::TimedOut)??)
}

/// Waits for the next event on the voice websocket, skipping frames which carry none.
async fn next_event(client: &mut WsStream, wait: Duration) -> Result<GatewayEvent> {
    loop {
        match timeout(wait, client.recv_json()).await {
            Err(_) => return Err(Error::TimedOut),
            Ok(Ok(Some(event))) => return Ok(event),
            Ok(Ok(None)) => {},
            Ok(Err(WsError::Json(e))) => {
                warn!("Skipping undecodable voice gateway payload: {}.", e);
            },
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

async fn bind_udp(server: SocketAddr) -> Result<UdpSocket> {
    let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

    let udp = UdpSocket::bind(local).await?;
    udp.connect(server).await?;

    Ok(udp)
}

/// Builds the voice gateway URL from the endpoint sent by the main gateway.
pub(crate) fn generate_url(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    let endpoint = endpoint.strip_prefix("wss://").unwrap_or(endpoint);
    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);

    if endpoint.is_empty() {
        return Err(Error::EndpointUrl);
    }

    Url::parse(&format!("wss://{}/?v={}", endpoint, VOICE_GATEWAY_VERSION))
        .or(Err(Error::EndpointUrl))
}
