//! Tunables for a [`Session`](crate::Session), and the credentials it starts from.
use std::fmt;
use std::time::Duration;

use earshot_voice_model::id::{ChannelId, GuildId, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::constants::{DISCOVERY_TIMEOUT, GATEWAY_URL};
use crate::driver::CryptoMode;
use crate::gateway::GatewayIntents;

/// Configuration for a session's gateways and audio pipeline.
///
/// Every field has a default, so a partial document deserializes cleanly:
///
/// ```rust
/// let config: earshot::Config =
///     serde_json::from_str(r#"{ "silence_flush_ms": 700, "self_deaf": true }"#).unwrap();
///
/// assert_eq!(config.silence_flush.as_millis(), 700);
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[non_exhaustive]
#[must_use]
pub struct Config {
    /// Main gateway URL, without query parameters.
    pub gateway_url: String,
    /// Intents sent in the IDENTIFY. Guild and voice state intents are always added.
    #[serde(skip)]
    pub intents: GatewayIntents,
    /// Forces a single encryption mode instead of choosing the best one offered.
    ///
    /// If the voice server does not offer it, connecting fails.
    #[serde(deserialize_with = "crypto_mode")]
    pub crypto_mode: Option<CryptoMode>,
    /// Delay before reconnecting either gateway after a lost connection.
    #[serde(rename = "reconnect_delay_ms", deserialize_with = "millis")]
    pub reconnect_delay: Duration,
    /// Attempts made at a voice connection before giving up on it.
    pub voice_connect_attempts: u32,
    /// Number of consecutive unacknowledged voice heartbeats tolerated.
    pub voice_heartbeat_max_missed: u32,
    /// Longest acceptable voice heartbeat round trip.
    #[serde(rename = "voice_heartbeat_ack_timeout_ms", deserialize_with = "millis")]
    pub voice_heartbeat_ack_timeout: Duration,
    /// Time allowed for each step of the voice handshake.
    #[serde(rename = "handshake_timeout_ms", deserialize_with = "millis")]
    pub handshake_timeout: Duration,
    /// Time allowed for an IP discovery reply.
    #[serde(rename = "discovery_timeout_ms", deserialize_with = "millis")]
    pub discovery_timeout: Duration,
    /// Receive timeout of the UDP socket; a speaker silent for this long has stopped.
    #[serde(rename = "udp_poll_timeout_ms", deserialize_with = "millis")]
    pub udp_poll_timeout: Duration,
    /// RMS level, on the 16-bit sample scale, below which a frame counts as silence.
    pub silence_threshold: f32,
    /// Accumulated silence which ends an utterance.
    #[serde(rename = "silence_flush_ms", deserialize_with = "millis")]
    pub silence_flush: Duration,
    /// Utterances shorter than this are discarded.
    #[serde(rename = "min_segment_ms", deserialize_with = "millis")]
    pub min_segment: Duration,
    /// Utterances are cut at this length even if the speaker has not paused.
    #[serde(rename = "max_segment_ms", deserialize_with = "millis")]
    pub max_segment: Duration,
    /// Consecutive decode failures after which a speaker's decoder is rebuilt.
    pub decode_error_threshold: u32,
    /// Most lost packets concealed before a received frame.
    pub max_concealed_frames: u16,
    /// Whether the bot joins muted.
    pub self_mute: bool,
    /// Whether the bot joins deafened.
    pub self_deaf: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: GATEWAY_URL.to_owned(),
            intents: GatewayIntents::default(),
            crypto_mode: None,
            reconnect_delay: Duration::from_secs(5),
            voice_connect_attempts: 5,
            voice_heartbeat_max_missed: 3,
            voice_heartbeat_ack_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            discovery_timeout: DISCOVERY_TIMEOUT,
            udp_poll_timeout: Duration::from_millis(100),
            silence_threshold: 500.0,
            silence_flush: Duration::from_millis(1000),
            min_segment: Duration::from_millis(500),
            max_segment: Duration::from_secs(30),
            decode_error_threshold: 5,
            max_concealed_frames: 5,
            self_mute: true,
            self_deaf: false,
        }
    }
}

impl Config {
    /// Equivalent to [`Self::default`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn intents(mut self, intents: GatewayIntents) -> Self {
        self.intents = intents;
        self
    }

    /// Forces the use of `mode`, rather than the best mode the server offers.
    pub fn crypto_mode(mut self, mode: CryptoMode) -> Self {
        self.crypto_mode = Some(mode);
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn voice_connect_attempts(mut self, attempts: u32) -> Self {
        self.voice_connect_attempts = attempts;
        self
    }

    pub fn voice_heartbeat_max_missed(mut self, missed: u32) -> Self {
        self.voice_heartbeat_max_missed = missed;
        self
    }

    pub fn voice_heartbeat_ack_timeout(mut self, timeout: Duration) -> Self {
        self.voice_heartbeat_ack_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn udp_poll_timeout(mut self, timeout: Duration) -> Self {
        self.udp_poll_timeout = timeout;
        self
    }

    pub fn silence_threshold(mut self, rms: f32) -> Self {
        self.silence_threshold = rms;
        self
    }

    pub fn silence_flush(mut self, silence: Duration) -> Self {
        self.silence_flush = silence;
        self
    }

    pub fn min_segment(mut self, length: Duration) -> Self {
        self.min_segment = length;
        self
    }

    pub fn max_segment(mut self, length: Duration) -> Self {
        self.max_segment = length;
        self
    }

    pub fn decode_error_threshold(mut self, errors: u32) -> Self {
        self.decode_error_threshold = errors;
        self
    }

    pub fn max_concealed_frames(mut self, frames: u16) -> Self {
        self.max_concealed_frames = frames;
        self
    }

    pub fn self_mute(mut self, mute: bool) -> Self {
        self.self_mute = mute;
        self
    }

    pub fn self_deaf(mut self, deaf: bool) -> Self {
        self.self_deaf = deaf;
        self
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn crypto_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<CryptoMode>, D::Error> {
    let Some(name) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    CryptoMode::from_request_str(&name)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format_args!("unsupported crypto mode {name}")))
}

/// Who to log in as, and which voice channel to listen to.
#[derive(Clone)]
#[must_use]
pub struct Credentials {
    pub(crate) token: SecretString,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// If set, only utterances from this user are emitted.
    pub target_speaker: Option<UserId>,
}

impl Credentials {
    pub fn new(token: impl Into<String>, guild_id: GuildId, channel_id: ChannelId) -> Self {
        let token: String = token.into();
        let token = token.trim();
        let token = token.strip_prefix("Bot ").unwrap_or(token).to_owned();

        Self {
            token: SecretString::new(token),
            guild_id,
            channel_id,
            target_speaker: None,
        }
    }

    pub fn target_speaker(mut self, user: UserId) -> Self {
        self.target_speaker = Some(user);
        self
    }

    pub(crate) fn has_token(&self) -> bool {
        !self.token.expose_secret().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<secret>")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("target_speaker", &self.target_speaker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "crypto_mode": "xsalsa20_poly1305", "min_segment_ms": 250 }"#,
        )
        .unwrap();

        assert_eq!(config.crypto_mode, Some(CryptoMode::Normal));
        assert_eq!(config.min_segment, Duration::from_millis(250));
        assert_eq!(config.silence_flush, Duration::from_millis(1000));
        assert_eq!(config.max_segment, Duration::from_secs(30));
        assert_eq!(config.voice_heartbeat_max_missed, 3);
    }

    #[test]
    fn unknown_crypto_mode_is_rejected() {
        let res = serde_json::from_str::<Config>(r#"{ "crypto_mode": "rot13" }"#);

        assert!(res.is_err());
    }

    #[test]
    fn builder_setters() {
        let config = Config::new()
            .crypto_mode(CryptoMode::Suffix)
            .udp_poll_timeout(Duration::from_millis(50))
            .self_deaf(true);

        assert_eq!(config.crypto_mode, Some(CryptoMode::Suffix));
        assert_eq!(config.udp_poll_timeout, Duration::from_millis(50));
        assert!(config.self_deaf);
    }

    #[test]
    fn token_prefix_is_stripped() {
        let creds = Credentials::new("Bot abc.def ", GuildId(1), ChannelId(2));

        assert_eq!(creds.token.expose_secret(), "abc.def");
        assert!(creds.has_token());
        assert!(!Credentials::new("  ", GuildId(1), ChannelId(2)).has_token());
        assert!(!format!("{creds:?}").contains("abc.def"));
    }
}
