use std::error::Error as StdError;
use std::fmt;

use flume::SendError;

use super::message::AudioMessage;
use crate::driver::crypto::CryptoError;

/// The background task a failed message was addressed to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recipient {
    Audio,
    AuxNetwork,
    UdpRx,
    UdpTx,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while handling a single received packet.
///
/// None of these end a connection on their own: the packet is dropped.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Crypto(CryptoError),
    /// Received an illegal voice packet on the voice UDP socket.
    IllegalVoicePacket,
    InterconnectFailure(Recipient),
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<SendError<AudioMessage>> for Error {
    fn from(_e: SendError<AudioMessage>) -> Error {
        Error::InterconnectFailure(Recipient::Audio)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "packet could not be decrypted: {e}"),
            Self::IllegalVoicePacket => f.write_str("malformed voice packet"),
            Self::InterconnectFailure(r) => write!(f, "failed to contact {r:?} task"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            _ => None,
        }
    }
}
