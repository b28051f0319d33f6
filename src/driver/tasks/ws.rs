use std::time::{Duration, Instant as StdInstant, SystemTime, UNIX_EPOCH};

use earshot_voice_model::payload::Heartbeat;
use earshot_voice_model::{CloseCode, Event as GatewayEvent, FromPrimitive};
use flume::Receiver;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use super::message::*;
use crate::heartbeat::{Beat, HeartbeatState};
use crate::ws::{Error as WsError, ReceiverExt, Result, SenderExt, WsStream};

struct AuxNetwork {
    rx: Receiver<WsMessage>,
    ws_client: WsStream,
    dont_send: bool,

    heartbeat_interval: Duration,
    heartbeat: HeartbeatState,
    last_heartbeat_nonce: Option<u64>,
}

impl AuxNetwork {
    fn new(
        evt_rx: Receiver<WsMessage>,
        ws_client: WsStream,
        heartbeat_interval: f64,
        heartbeat: HeartbeatState,
    ) -> Self {
        Self {
            rx: evt_rx,
            ws_client,
            dont_send: false,

            heartbeat_interval: interval_from_ms(heartbeat_interval),
            heartbeat,
            last_heartbeat_nonce: None,
        }
    }

    #[instrument(skip(self, interconnect))]
    async fn run(&mut self, interconnect: &Interconnect) {
        let mut next_heartbeat = self.next_heartbeat();

        loop {
            let mut ws_error = None;

            tokio::select! {
                () = sleep_until(next_heartbeat) => {
                    match self.heartbeat.tick(StdInstant::now()) {
                        Beat::Send => if let Err(e) = self.send_heartbeat().await {
                            error!("Heartbeat send failure {:?}.", e);
                            ws_error = Some(CoreMessage::Reconnect);
                        },
                        Beat::Dead => {
                            warn!("Voice heartbeats unacknowledged, reconnecting.");
                            ws_error = Some(CoreMessage::Reconnect);
                        },
                        Beat::AlreadyDead => {},
                    }
                    next_heartbeat = self.next_heartbeat();
                }
                ws_msg = self.ws_client.recv_json(), if !self.dont_send => {
                    ws_error = match ws_msg {
                        Err(WsError::Json(e)) => {
                            warn!("Unexpected JSON {:?}.", e);
                            None
                        },
                        Err(WsError::WsClosed(frame)) => {
                            let code = frame.and_then(|f| CloseCode::from_u16(f.code.into()));
                            info!("Voice websocket closed: {:?}.", code);
                            Some(closure_message(code))
                        },
                        Err(e) => {
                            error!("Error processing ws {:?}.", e);
                            Some(CoreMessage::Reconnect)
                        },
                        Ok(Some(msg)) => {
                            self.process_ws(interconnect, msg);
                            None
                        },
                        Ok(None) => None,
                    };
                }
                inner_msg = self.rx.recv_async() => {
                    match inner_msg {
                        Ok(WsMessage::Ws(data)) => {
                            self.ws_client = *data;
                            self.heartbeat.reset();
                            self.last_heartbeat_nonce = None;
                            next_heartbeat = self.next_heartbeat();
                            self.dont_send = false;
                        },
                        Ok(WsMessage::SetKeepalive(keepalive)) => {
                            self.heartbeat_interval = interval_from_ms(keepalive);
                            next_heartbeat = self.next_heartbeat();
                        },
                        Err(_) | Ok(WsMessage::Poison) => {
                            break;
                        },
                    }
                }
            }

            if let Some(msg) = ws_error {
                if !self.dont_send {
                    let _ = interconnect.core.send(msg);
                }
                self.dont_send = true;
            }
        }

        let _ = self.ws_client.close(None).await;
    }

    fn next_heartbeat(&self) -> Instant {
        Instant::now() + self.heartbeat_interval
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.last_heartbeat_nonce = Some(nonce);

        trace!("Sent heartbeat {}.", nonce);

        if !self.dont_send {
            self.ws_client.send_json(&GatewayEvent::from(Heartbeat { nonce })).await?;
        }

        Ok(())
    }

    fn process_ws(&mut self, interconnect: &Interconnect, value: GatewayEvent) {
        match value {
            GatewayEvent::HeartbeatAck(ev) => {
                if let Some(nonce) = self.last_heartbeat_nonce.take() {
                    if ev.nonce != nonce {
                        warn!("Heartbeat nonce mismatch! Expected {}, saw {}.", nonce, ev.nonce);
                    }
                }

                let latency = self.heartbeat.ack(StdInstant::now());
                trace!("Heartbeat ACK received, latency {:?}.", latency);
            },
            other => apply_voice_event(interconnect, other),
        }
    }
}

/// Applies a voice gateway event which affects speaker attribution or buffered audio.
pub(crate) fn apply_voice_event(interconnect: &Interconnect, event: GatewayEvent) {
    match event {
        GatewayEvent::Speaking(ev) => {
            let Some(user) = ev.user_id else {
                trace!("Speaking update without user for SSRC {}.", ev.ssrc);
                return;
            };

            if interconnect.ssrcs.insert(ev.ssrc, user) != Some(user) {
                interconnect.log(format!("Speaker {} is on SSRC {}.", user, ev.ssrc));
            }

            let _ = interconnect.audio.send(AudioMessage::Speaking {
                ssrc: ev.ssrc,
                speaker: user,
                speaking: ev.speaking.is_speaking(),
            });
        },
        GatewayEvent::ClientConnect(ev) => {
            if ev.audio_ssrc != 0
                && interconnect.ssrcs.insert(ev.audio_ssrc, ev.user_id) != Some(ev.user_id)
            {
                interconnect.log(format!("Speaker {} is on SSRC {}.", ev.user_id, ev.audio_ssrc));
            }
        },
        GatewayEvent::ClientDisconnect(ev) => {
            debug!("User {} left the call.", ev.user_id);

            for ssrc in interconnect.ssrcs.remove_user(ev.user_id) {
                let _ = interconnect.audio.send(AudioMessage::Forget {
                    ssrc,
                });
            }
        },
        other => {
            trace!("Received other websocket data: {:?}", other);
        },
    }
}

/// Picks how the driver should react to the voice server closing the websocket.
pub(crate) fn closure_message(code: Option<CloseCode>) -> CoreMessage {
    match code {
        Some(code) if code.should_abandon() => CoreMessage::Abandon(Some(code)),
        Some(code) if !code.should_resume() => CoreMessage::FullReconnect,
        _ => CoreMessage::Reconnect,
    }
}

fn interval_from_ms(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::from_secs(5))
}

#[instrument(skip(interconnect, evt_rx, ws_client, heartbeat))]
pub(crate) async fn runner(
    interconnect: Interconnect,
    evt_rx: Receiver<WsMessage>,
    ws_client: WsStream,
    heartbeat_interval: f64,
    heartbeat: HeartbeatState,
) {
    info!("WS thread started.");
    let mut aux = AuxNetwork::new(evt_rx, ws_client, heartbeat_interval, heartbeat);

    aux.run(&interconnect).await;
    info!("WS thread finished.");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use earshot_voice_model::id::UserId;
    use earshot_voice_model::payload::{ClientConnect, ClientDisconnect, Speaking};
    use earshot_voice_model::SpeakingState;

    use super::*;
    use crate::ssrc::SsrcTable;

    fn interconnect() -> (Interconnect, Receiver<AudioMessage>) {
        let (core, _) = flume::unbounded();
        let (audio, audio_rx) = flume::unbounded();
        let (events, _) = flume::unbounded();

        let ic = Interconnect {
            core,
            audio,
            events,
            ssrcs: Arc::new(SsrcTable::new()),
        };

        (ic, audio_rx)
    }

    fn speaking(ssrc: u32, user: u64, on: bool) -> GatewayEvent {
        GatewayEvent::Speaking(Speaking {
            delay: None,
            speaking: if on { SpeakingState::MICROPHONE } else { SpeakingState::empty() },
            ssrc,
            user_id: Some(UserId(user)),
        })
    }

    #[test]
    fn speaking_maps_ssrc_and_notifies_audio() {
        let (ic, audio_rx) = interconnect();

        apply_voice_event(&ic, speaking(42, 7, true));
        apply_voice_event(&ic, speaking(42, 7, false));

        assert_eq!(ic.ssrcs.get(42), Some(UserId(7)));

        let msgs: Vec<_> = audio_rx.drain().collect();
        assert!(matches!(msgs[..], [
            AudioMessage::Speaking {
                ssrc: 42,
                speaking: true,
                ..
            },
            AudioMessage::Speaking {
                ssrc: 42,
                speaking: false,
                ..
            },
        ]));
    }

    #[test]
    fn client_connect_and_disconnect() {
        let (ic, audio_rx) = interconnect();

        apply_voice_event(
            &ic,
            GatewayEvent::ClientConnect(ClientConnect {
                audio_ssrc: 50,
                user_id: UserId(9),
                video_ssrc: 0,
            }),
        );
        assert_eq!(ic.ssrcs.get(50), Some(UserId(9)));

        apply_voice_event(
            &ic,
            GatewayEvent::ClientDisconnect(ClientDisconnect {
                user_id: UserId(9),
            }),
        );
        assert_eq!(ic.ssrcs.get(50), None);
        assert!(matches!(audio_rx.drain().collect::<Vec<_>>()[..], [AudioMessage::Forget {
            ssrc: 50
        }]));
    }

    #[test]
    fn close_codes_pick_reconnect_kind() {
        assert!(matches!(
            closure_message(Some(CloseCode::Disconnected)),
            CoreMessage::Abandon(Some(CloseCode::Disconnected))
        ));
        assert!(matches!(
            closure_message(Some(CloseCode::AuthenticationFailed)),
            CoreMessage::Abandon(_)
        ));
        assert!(matches!(
            closure_message(Some(CloseCode::VoiceServerCrash)),
            CoreMessage::Reconnect
        ));
        assert!(matches!(
            closure_message(Some(CloseCode::SessionTimeout)),
            CoreMessage::Reconnect
        ));
        assert!(matches!(
            closure_message(Some(CloseCode::SessionInvalid)),
            CoreMessage::FullReconnect
        ));
        assert!(matches!(closure_message(None), CoreMessage::Reconnect));
    }

    #[test]
    fn heartbeat_interval_conversion() {
        assert_eq!(interval_from_ms(13750.0), Duration::from_millis(13750));
        assert_eq!(interval_from_ms(f64::NAN), Duration::from_secs(5));
    }
}
