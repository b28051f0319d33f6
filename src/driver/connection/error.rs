//! Connection errors and convenience types.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;

use earshot_voice_model::{CloseCode, FromPrimitive};
use flume::SendError;
use serde_json::Error as JsonError;

use crate::driver::crypto::CryptoError;
use crate::driver::tasks::{error::Recipient, message::*};
use crate::ws::Error as WsError;

/// Errors encountered while connecting to a voice server.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The session key could not be turned into a cipher.
    Crypto(CryptoError),
    /// Server did not return the expected crypto mode during negotiation.
    CryptoModeInvalid,
    /// No offered crypto mode is supported, or the configured mode was not offered.
    CryptoModeUnavailable,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
    /// Hello/ready handshake was violated.
    ExpectedHandshake,
    /// The voice server failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// Could not parse the voice server's view of our IP.
    IllegalIp,
    /// Miscellaneous I/O error.
    Io(IoError),
    /// JSON (de)serialization error.
    Json(JsonError),
    /// Failed to message other background tasks after connection establishment.
    InterconnectFailure(Recipient),
    /// The voice gateway closed the websocket during the handshake.
    Closed(Option<CloseCode>),
    /// A handshake step or discovery reply did not arrive in time.
    TimedOut,
    /// Error communicating with gateway server over WebSocket.
    Ws(WsError),
}

impl Error {
    /// Whether retrying with the same connection details cannot succeed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::CryptoModeUnavailable | Self::CryptoModeInvalid | Self::EndpointUrl => true,
            Self::Closed(Some(code)) => code.should_abandon(),
            _ => false,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<SendError<WsMessage>> for Error {
    fn from(_e: SendError<WsMessage>) -> Error {
        Error::InterconnectFailure(Recipient::AuxNetwork)
    }
}

impl From<SendError<AudioMessage>> for Error {
    fn from(_e: SendError<AudioMessage>) -> Error {
        Error::InterconnectFailure(Recipient::Audio)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Error {
        match e {
            WsError::WsClosed(Some(frame)) => {
                Error::Closed(CloseCode::from_u16(frame.code.into()))
            },
            e => Error::Ws(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to voice server: ")?;
        match self {
            Self::Crypto(e) => e.fmt(f),
            Self::CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            Self::CryptoModeUnavailable => write!(f, "server did not offer a supported mode"),
            Self::EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            Self::ExpectedHandshake => write!(f, "voice initialisation protocol was violated"),
            Self::IllegalDiscoveryResponse => {
                write!(f, "IP discovery/NAT punching response was invalid")
            },
            Self::IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::InterconnectFailure(e) => write!(f, "failed to contact other task ({e:?})"),
            Self::Closed(code) => write!(f, "websocket closed during handshake ({code:?})"),
            Self::TimedOut => write!(f, "voice server did not respond in time"),
            Self::Ws(e) => write!(f, "websocket issue ({e:?})."),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Crypto(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience type for voice connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
