//! Events delivered from a running [`Session`] to its owner.
//!
//! [`Session`]: crate::Session
use earshot_voice_model::id::UserId;
use earshot_voice_model::CloseCode;

use crate::driver::connection::error::Error as VoiceError;
use crate::gateway::GatewayError;

/// A finished utterance from one speaker.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSegment {
    /// The user the audio was attributed to, if their SSRC had been announced.
    pub speaker: Option<UserId>,
    /// RTP source the audio arrived on.
    pub ssrc: u32,
    /// Mono PCM samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSegment {
    /// Length of the audio in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }

        let frames = self.samples.len() as u64 / u64::from(self.channels);
        frames * 1000 / u64::from(self.sample_rate)
    }
}

/// Why a session (or its voice half) stopped.
#[derive(Debug)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// [`Session::stop`] was called.
    ///
    /// [`Session::stop`]: crate::Session::stop
    Requested,
    /// The main gateway refused the session, e.g. because the token is invalid.
    Gateway(GatewayError),
    /// The voice server ended the session and asked not to be reconnected to.
    VoiceClosed(Option<CloseCode>),
    /// A voice connection could not be established, even after retrying.
    VoiceFailed(VoiceError),
}

/// Output of a [`Session`], received through [`Session::events`].
///
/// [`Session`]: crate::Session
/// [`Session::events`]: crate::Session::events
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A speaker finished an utterance.
    SpeechSegmentReady(AudioSegment),
    /// A human-readable status line.
    Log(String),
    /// The session, or its voice connection, ended.
    Disconnected(DisconnectReason),
}
