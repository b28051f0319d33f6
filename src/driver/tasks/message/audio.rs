use earshot_voice_model::id::UserId;

/// Work for the audio worker.
///
/// Messages for one SSRC are handled strictly in the order they were sent.
#[derive(Debug)]
pub enum AudioMessage {
    /// A decrypted Opus frame.
    Packet {
        ssrc: u32,
        speaker: Option<UserId>,
        /// Opus payload, with RTP extensions and padding removed.
        frame: Vec<u8>,
        /// Number of packets lost immediately before this one.
        missed: u16,
    },
    /// No packets have arrived from `ssrc` for a receive timeout.
    SpeechEnd { ssrc: u32 },
    /// The voice gateway reported a change in `ssrc`'s speaking state.
    Speaking { ssrc: u32, speaker: UserId, speaking: bool },
    /// `ssrc` left the channel: flush what it said and drop its decoder.
    Forget { ssrc: u32 },
    /// Drop every buffer and decoder, emitting nothing.
    Reset,

    Poison,
}
