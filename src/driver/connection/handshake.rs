//! The voice gateway handshake as a socket-free state machine.
//!
//! [`Connection`] feeds received events into a [`Handshake`] and performs the I/O each
//! [`HandshakeAction`] asks for, which lets the negotiation be tested without a server.
//!
//! [`Connection`]: super::Connection
use std::fmt;
use std::net::SocketAddr;

use earshot_voice_model::payload::{Ready, SelectProtocol};
use earshot_voice_model::{Event, ProtocolData};
use tracing::{debug, info, trace};

use super::error::{Error, Result};
use crate::driver::crypto::{CryptoMode, EncryptionContext};

/// Progress of a voice gateway connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum VoiceStage {
    /// Waiting for the server's HELLO.
    AwaitingHello,
    /// HELLO received, IDENTIFY not yet sent.
    Identifying,
    /// IDENTIFY sent, waiting for READY.
    AwaitingReady,
    /// READY received; IP discovery is running.
    SelectingProtocol,
    /// SELECT PROTOCOL sent, waiting for the secret key.
    AwaitingSessionDescription,
    /// RESUME sent, waiting for HELLO and RESUMED.
    Resuming,
    /// Keys are known and media may flow.
    Ready,
}

impl fmt::Display for VoiceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::AwaitingHello => "awaiting hello",
            Self::Identifying => "identifying",
            Self::AwaitingReady => "awaiting ready",
            Self::SelectingProtocol => "selecting protocol",
            Self::AwaitingSessionDescription => "awaiting session description",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
        })
    }
}

/// I/O requested by the [`Handshake`] in response to an event.
#[derive(Debug)]
pub(crate) enum HandshakeAction {
    /// Nothing to do yet.
    Wait,
    /// Send IDENTIFY, then call [`Handshake::identify_sent`].
    Identify,
    /// Run IP discovery against the media server, then call [`Handshake::select_protocol`].
    Discover {
        ssrc: u32,
        server: SocketAddr,
        mode: CryptoMode,
    },
    /// The connection is established.
    Established(EncryptionContext),
    /// The session was resumed; media continues under the old keys.
    Resumed,
}

pub(crate) struct Handshake {
    stage: VoiceStage,
    preferred: Option<CryptoMode>,
    heartbeat_interval: Option<f64>,
    ready: Option<Ready>,
    mode: Option<CryptoMode>,
    resumed: bool,
    deferred: Vec<Event>,
}

impl Handshake {
    /// Starts a fresh session. `preferred` forces a single encryption mode.
    pub fn new(preferred: Option<CryptoMode>) -> Self {
        Self {
            stage: VoiceStage::AwaitingHello,
            preferred,
            heartbeat_interval: None,
            ready: None,
            mode: None,
            resumed: false,
            deferred: Vec::new(),
        }
    }

    /// Resumes an existing session, after RESUME has been sent.
    pub fn resume() -> Self {
        Self {
            stage: VoiceStage::Resuming,
            ..Self::new(None)
        }
    }

    pub fn stage(&self) -> VoiceStage {
        self.stage
    }

    /// Heartbeat interval from HELLO, in milliseconds.
    pub fn heartbeat_interval(&self) -> Option<f64> {
        self.heartbeat_interval
    }

    pub fn ready(&self) -> Option<&Ready> {
        self.ready.as_ref()
    }

    /// Events received mid-handshake which matter once media flows, such as speaking
    /// updates and client connects.
    pub fn take_deferred(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.deferred)
    }

    pub fn identify_sent(&mut self) {
        if self.stage == VoiceStage::Identifying {
            self.stage = VoiceStage::AwaitingReady;
        }
    }

    /// Builds SELECT PROTOCOL announcing `addr` as our media address.
    ///
    /// # Errors
    ///
    /// Fails if READY has not been handled yet.
    pub fn select_protocol(&mut self, addr: SocketAddr) -> Result<SelectProtocol> {
        let (VoiceStage::SelectingProtocol, Some(mode)) = (self.stage, self.mode) else {
            return Err(Error::ExpectedHandshake);
        };

        self.stage = VoiceStage::AwaitingSessionDescription;

        Ok(SelectProtocol {
            protocol: "udp".into(),
            data: ProtocolData {
                address: addr.ip(),
                mode: mode.to_request_str().into(),
                port: addr.port(),
            },
        })
    }

    /// Advances the handshake with a received event.
    ///
    /// # Errors
    ///
    /// Fails if the server offers no usable encryption mode, confirms a different mode from
    /// the one selected, sends an unusable key, or sends an event the handshake cannot be
    /// in at this stage.
    pub fn handle(&mut self, event: Event) -> Result<HandshakeAction> {
        match (self.stage, event) {
            (stage, Event::Hello(hello)) => {
                debug!("Voice HELLO, interval {}ms.", hello.heartbeat_interval);
                self.heartbeat_interval = Some(hello.heartbeat_interval);

                Ok(match stage {
                    VoiceStage::AwaitingHello => {
                        self.stage = VoiceStage::Identifying;
                        HandshakeAction::Identify
                    },
                    VoiceStage::Resuming => self.check_resumed(),
                    _ => HandshakeAction::Wait,
                })
            },
            (VoiceStage::AwaitingReady, Event::Ready(ready)) => {
                let mode = CryptoMode::negotiate(&ready.modes, self.preferred)
                    .ok_or(Error::CryptoModeUnavailable)?;

                info!("Voice READY: SSRC {}, mode {}.", ready.ssrc, mode);

                let action = HandshakeAction::Discover {
                    ssrc: ready.ssrc,
                    server: SocketAddr::new(ready.ip, ready.port),
                    mode,
                };

                self.mode = Some(mode);
                self.ready = Some(ready);
                self.stage = VoiceStage::SelectingProtocol;

                Ok(action)
            },
            (VoiceStage::AwaitingSessionDescription, Event::SessionDescription(desc)) => {
                let Some(mode) = self.mode else {
                    return Err(Error::ExpectedHandshake);
                };

                if desc.mode != mode.to_request_str() {
                    return Err(Error::CryptoModeInvalid);
                }

                let context = EncryptionContext::new(mode, &desc.secret_key)?;
                self.stage = VoiceStage::Ready;

                Ok(HandshakeAction::Established(context))
            },
            (VoiceStage::Resuming, Event::Resumed) => {
                self.resumed = true;
                Ok(self.check_resumed())
            },
            (_, Event::HeartbeatAck(_) | Event::Heartbeat(_)) => Ok(HandshakeAction::Wait),
            (
                _,
                evt @ (Event::Speaking(_) | Event::ClientConnect(_) | Event::ClientDisconnect(_)),
            ) => {
                trace!("Deferring {:?} until connected.", evt.kind());
                self.deferred.push(evt);

                Ok(HandshakeAction::Wait)
            },
            (stage, other) => {
                debug!("Unexpected {:?} while {}.", other.kind(), stage);

                Err(Error::ExpectedHandshake)
            },
        }
    }

    fn check_resumed(&mut self) -> HandshakeAction {
        if self.resumed && self.heartbeat_interval.is_some() {
            self.stage = VoiceStage::Ready;
            HandshakeAction::Resumed
        } else {
            HandshakeAction::Wait
        }
    }
}
