//! Payloads received over the main gateway.
//!
//! Only the dispatches needed to join a voice channel are modelled; every other dispatch is
//! kept by name only, so it can still advance the sequence number.
use earshot_voice_model::id::{ChannelId, GuildId, UserId};
use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::constants::Opcode;

/// A frame received over the main gateway.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum GatewayEvent {
    Dispatch { seq: u64, event: Event },
    /// The server asked for a heartbeat right away.
    Heartbeat(Option<u64>),
    Reconnect,
    /// Whether the session may be resumed.
    InvalidateSession(bool),
    /// Heartbeat interval, in milliseconds.
    Hello(u64),
    HeartbeatAck,
}

/// A dispatched (op 0) event.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    Ready(ReadyEvent),
    Resumed,
    VoiceStateUpdate(VoiceStateUpdateEvent),
    VoiceServerUpdate(VoiceServerUpdateEvent),
    /// Any other dispatch, by event name.
    Unknown(String),
}

impl Event {
    fn deserialize_with_type(kind: &str, payload: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            "READY" => Self::Ready(ReadyEvent::deserialize(payload)?),
            "RESUMED" => Self::Resumed,
            "VOICE_STATE_UPDATE" => {
                Self::VoiceStateUpdate(VoiceStateUpdateEvent::deserialize(payload)?)
            },
            "VOICE_SERVER_UPDATE" => {
                Self::VoiceServerUpdate(VoiceServerUpdateEvent::deserialize(payload)?)
            },
            other => Self::Unknown(other.to_owned()),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct ReadyEvent {
    pub session_id: String,
    /// Gateway URL to use when resuming this session.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    pub user: CurrentUser,
}

#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct CurrentUser {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
}

#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct VoiceStateUpdateEvent {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// `None` once the user has left voice.
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
}

#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct VoiceServerUpdateEvent {
    pub guild_id: GuildId,
    /// `None` while the voice server is being reallocated.
    pub endpoint: Option<String>,
    pub token: String,
}

impl<'de> Deserialize<'de> for GatewayEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::deserialize(deserializer)?;

        let op = map
            .remove("op")
            .ok_or_else(|| DeError::custom("expected op"))
            .and_then(|v| Opcode::deserialize(v).map_err(DeError::custom))?;

        Ok(match op {
            Opcode::Dispatch => {
                let seq = map
                    .remove("s")
                    .ok_or_else(|| DeError::custom("expected gateway event sequence"))
                    .and_then(|v| u64::deserialize(v).map_err(DeError::custom))?;
                let kind = map
                    .remove("t")
                    .ok_or_else(|| DeError::custom("expected gateway event type"))
                    .and_then(|v| String::deserialize(v).map_err(DeError::custom))?;
                let payload = map
                    .remove("d")
                    .ok_or_else(|| DeError::custom("expected gateway event d"))?;

                let event = Event::deserialize_with_type(&kind, payload).map_err(DeError::custom)?;

                GatewayEvent::Dispatch {
                    seq,
                    event,
                }
            },
            Opcode::Heartbeat => {
                let seq = match map.remove("d") {
                    Some(v) => Option::<u64>::deserialize(v).map_err(DeError::custom)?,
                    None => None,
                };

                GatewayEvent::Heartbeat(seq)
            },
            Opcode::Reconnect => GatewayEvent::Reconnect,
            Opcode::InvalidSession => {
                let resumable = map
                    .remove("d")
                    .ok_or_else(|| DeError::custom("expected gateway invalid session d"))
                    .and_then(|v| bool::deserialize(v).map_err(DeError::custom))?;

                GatewayEvent::InvalidateSession(resumable)
            },
            Opcode::Hello => {
                let mut d = map
                    .remove("d")
                    .ok_or_else(|| DeError::custom("expected gateway hello d"))
                    .and_then(|v| Map::deserialize(v).map_err(DeError::custom))?;
                let interval = d
                    .remove("heartbeat_interval")
                    .ok_or_else(|| DeError::custom("expected gateway hello interval"))
                    .and_then(|v| u64::deserialize(v).map_err(DeError::custom))?;

                GatewayEvent::Hello(interval)
            },
            Opcode::HeartbeatAck => GatewayEvent::HeartbeatAck,
            _ => return Err(DeError::custom("invalid opcode")),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> GatewayEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn hello() {
        let event =
            parse(json!({"op": 10, "d": {"heartbeat_interval": 41250}, "s": null, "t": null}));
        assert!(matches!(event, GatewayEvent::Hello(41250)));
    }

    #[test]
    fn ready_dispatch() {
        let event = parse(json!({
            "op": 0,
            "s": 1,
            "t": "READY",
            "d": {
                "v": 10,
                "session_id": "abc",
                "resume_gateway_url": "wss://gateway-us-east1-b.discord.gg",
                "user": {"id": "80351110224678912", "username": "Nelly", "bot": true},
                "guilds": [],
            },
        }));

        let GatewayEvent::Dispatch {
            seq: 1,
            event: Event::Ready(ready),
        } = event
        else {
            panic!("expected READY");
        };
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.user.id, UserId(80_351_110_224_678_912));
        assert_eq!(
            ready.resume_gateway_url.as_deref(),
            Some("wss://gateway-us-east1-b.discord.gg")
        );
    }

    #[test]
    fn voice_dispatches() {
        let state = parse(json!({
            "op": 0,
            "s": 5,
            "t": "VOICE_STATE_UPDATE",
            "d": {
                "guild_id": "41771983423143937",
                "channel_id": "127121515262115840",
                "user_id": "80351110224678912",
                "session_id": "90326bd25d71d39b9ef95b299e3872ff",
                "deaf": false,
                "mute": false,
                "self_deaf": false,
                "self_mute": true,
            },
        }));
        assert!(matches!(state, GatewayEvent::Dispatch {
            seq: 5,
            event: Event::VoiceStateUpdate(VoiceStateUpdateEvent {
                channel_id: Some(ChannelId(127_121_515_262_115_840)),
                ..
            }),
        }));

        let server = parse(json!({
            "op": 0,
            "s": 6,
            "t": "VOICE_SERVER_UPDATE",
            "d": {
                "token": "my_token",
                "guild_id": "41771983423143937",
                "endpoint": "smart.loyal.discord.gg",
            },
        }));
        let GatewayEvent::Dispatch {
            event: Event::VoiceServerUpdate(server),
            ..
        } = server
        else {
            panic!("expected VOICE_SERVER_UPDATE");
        };
        assert_eq!(server.endpoint.as_deref(), Some("smart.loyal.discord.gg"));
        assert_eq!(server.guild_id, GuildId(41_771_983_423_143_937));
    }

    #[test]
    fn other_dispatches_keep_their_name() {
        let event = parse(json!({"op": 0, "s": 9, "t": "MESSAGE_CREATE", "d": {}}));
        assert!(matches!(event, GatewayEvent::Dispatch {
            seq: 9,
            event: Event::Unknown(name),
        } if name == "MESSAGE_CREATE"));
    }

    #[test]
    fn control_opcodes() {
        assert!(matches!(parse(json!({"op": 11})), GatewayEvent::HeartbeatAck));
        assert!(matches!(parse(json!({"op": 1, "d": 17})), GatewayEvent::Heartbeat(Some(17))));
        assert!(matches!(parse(json!({"op": 7, "d": null})), GatewayEvent::Reconnect));
        assert!(matches!(
            parse(json!({"op": 9, "d": false})),
            GatewayEvent::InvalidateSession(false)
        ));
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert!(serde_json::from_value::<GatewayEvent>(json!({"op": 2, "d": {}})).is_err());
        assert!(serde_json::from_value::<GatewayEvent>(json!({"op": 99})).is_err());
    }
}
