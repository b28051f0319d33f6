//! A set of constants used by the library.

use std::time::Duration;

use audiopus::SampleRate;

/// The gateway version used by the library. The gateway URL is retrieved via the REST API.
pub const GATEWAY_VERSION: u8 = 10;

/// Default URL of the main gateway, used when no override is configured.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = earshot_voice_model::constants::GATEWAY_VERSION;

/// Sample rate of audio received from the voice server.
pub const SAMPLE_RATE: SampleRate = SampleRate::Hz48000;

/// Sample rate of audio received from the voice server, as a plain number.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Sample rate of every emitted speech segment.
pub const SEGMENT_SAMPLE_RATE: u32 = 16_000;

/// Ratio between the decoder's rate and [`SEGMENT_SAMPLE_RATE`].
pub const DECIMATION_FACTOR: usize = SAMPLE_RATE_RAW / SEGMENT_SAMPLE_RATE as usize;

/// Number of audio frames/packets sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Number of samples in one complete frame of audio per channel.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of individual samples in one complete frame of stereo audio.
pub const STEREO_FRAME_SIZE: usize = 2 * MONO_FRAME_SIZE;

/// Longest Opus frame the decoder will accept (120ms), per channel.
pub const MAX_OPUS_FRAME_SIZE: usize = SAMPLE_RATE_RAW * 120 / 1000;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Size of a fixed RTP header, without CSRCs or extensions.
pub const RTP_HEADER_LEN: usize = 12;

/// Size of the Poly1305/GCM authentication tag carried by every encrypted packet.
pub const TAG_LEN: usize = 16;

/// Smallest datagram which may carry encrypted media: an RTP header plus one tag.
pub const MIN_MEDIA_PACKET: usize = RTP_HEADER_LEN + TAG_LEN;

/// Delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_secs(5);

/// Time allowed for an IP discovery reply before falling back to the local address.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Size of both the IP discovery request and its response.
pub const DISCOVERY_PACKET_LEN: usize = 74;

/// Opus silent frame, sent by clients around the end of speech.
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Payload type used by Opus audio traffic.
pub const RTP_PROFILE_TYPE: u8 = 120;

/// Gateway close codes. Voice gateway close codes live in
/// [`earshot_voice_model::CloseCode`].
pub mod close_codes {
    /// Unknown error occurred.
    pub const UNKNOWN_ERROR: u16 = 4000;
    /// An invalid opcode or invalid payload for an opcode was sent.
    pub const UNKNOWN_OPCODE: u16 = 4001;
    /// An invalid payload was sent.
    pub const DECODE_ERROR: u16 = 4002;
    /// A payload was sent prior to identifying.
    pub const NOT_AUTHENTICATED: u16 = 4003;
    /// The account token sent with the identify payload was incorrect.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// More than one identify payload was sent.
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    /// The session is no longer valid.
    pub const SESSION_NO_LONGER_VALID: u16 = 4006;
    /// The sequence sent when resuming the session was invalid.
    pub const INVALID_SEQUENCE: u16 = 4007;
    /// Payloads were being sent too quickly.
    pub const RATE_LIMITED: u16 = 4008;
    /// A session timed out.
    pub const SESSION_TIMEOUT: u16 = 4009;
    /// An invalid shard was sent when identifying.
    pub const INVALID_SHARD: u16 = 4010;
    /// The session would have had too many guilds.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// Undocumented gateway intents have been provided.
    pub const INVALID_GATEWAY_INTENTS: u16 = 4013;
    /// Disallowed gateway intents have been provided.
    pub const DISALLOWED_GATEWAY_INTENTS: u16 = 4014;
}

enum_number! {
    /// Enum to map main gateway opcodes.
    Opcode {
        /// Dispatches an event.
        Dispatch = 0,
        /// Used for ping checking.
        Heartbeat = 1,
        /// Used for client handshake.
        Identify = 2,
        /// Used to join/leave or move between voice channels.
        VoiceStateUpdate = 4,
        /// Used to resume a closed connection.
        Resume = 6,
        /// Used to tell clients to reconnect to the gateway.
        Reconnect = 7,
        /// Used to notify clients that they have an invalid session Id.
        InvalidSession = 9,
        /// Sent immediately after connection, contains heartbeat + server info.
        Hello = 10,
        /// Sent immediately following a client heartbeat that was received.
        HeartbeatAck = 11,
    }
}
