use std::net::Ipv4Addr;

use serde_test::{Configure, Token};

use super::Event;
use crate::id::*;
use crate::opcode::Opcode;
use crate::payload::*;
use crate::protocol_data::ProtocolData;
use crate::speaking_state::SpeakingState;

#[test]
fn deserialize_ready_json() {
    let json_data = r#"{
        "op": 2,
        "d": {
            "ssrc": 1001,
            "ip": "10.0.0.9",
            "port": 5555,
            "modes": ["aead_xchacha20_poly1305_rtpsize", "xsalsa20_poly1305"],
            "heartbeat_interval": 1
        }
    }"#;

    let event = serde_json::from_str(json_data);

    let ready = Ready {
        ssrc: 1001,
        ip: Ipv4Addr::new(10, 0, 0, 9).into(),
        port: 5555,
        modes: vec!["aead_xchacha20_poly1305_rtpsize".into(), "xsalsa20_poly1305".into()],
        experiments: vec![],
    };

    assert!(matches!(event, Ok(Event::Ready(i)) if i == ready));
}

#[test]
fn deserialize_body_before_opcode() {
    let json_data = r#"{
        "d": {
            "mode": "aead_aes256_gcm_rtpsize",
            "secret_key": [251, 100, 11]
        },
        "op": 4
    }"#;
    let event = serde_json::from_str(json_data);

    let sd = SessionDescription {
        mode: "aead_aes256_gcm_rtpsize".into(),
        secret_key: vec![251, 100, 11],
    };

    assert!(matches!(event, Ok(Event::SessionDescription(i)) if i == sd));
}

#[test]
fn deserialize_ignores_unknown_keys() {
    let json_data = r#"{
        "op": 8,
        "seq": 12,
        "d": {
            "v": 4,
            "heartbeat_interval": 13750.25
        }
    }"#;

    let event = serde_json::from_str(json_data);

    assert!(match event {
        Ok(Event::Hello(i)) => (i.heartbeat_interval - 13750.25).abs() < f64::EPSILON,
        _ => false,
    });
}

#[test]
fn deserialize_speaking_bitfield_and_bool() {
    let bitfield = r#"{
        "op": 5,
        "d": {
            "speaking": 5,
            "delay": 0,
            "ssrc": 42,
            "user_id": "1234"
        }
    }"#;
    let legacy = r#"{"op": 5, "d": {"speaking": false, "ssrc": 42}}"#;

    let speak = Speaking {
        speaking: SpeakingState::PRIORITY | SpeakingState::MICROPHONE,
        ssrc: 42,
        delay: Some(0),
        user_id: Some(UserId(1234)),
    };

    assert!(matches!(serde_json::from_str(bitfield), Ok(Event::Speaking(i)) if i == speak));
    assert!(matches!(
        serde_json::from_str(legacy),
        Ok(Event::Speaking(Speaking { speaking, user_id: None, .. })) if !speaking.is_speaking()
    ));
}

#[test]
fn deserialize_heartbeat_ack_string_nonce() {
    let numeric = r#"{"op": 6, "d": 1501184119561}"#;
    let quoted = r#"{"op": 6, "d": "1501184119561"}"#;

    let hb = HeartbeatAck {
        nonce: 1501184119561,
    };

    assert!(matches!(serde_json::from_str(numeric), Ok(Event::HeartbeatAck(i)) if i == hb));
    assert!(matches!(serde_json::from_str(quoted), Ok(Event::HeartbeatAck(i)) if i == hb));
}

#[test]
fn deserialize_resumed_json() {
    let json_data = r#"{
      "op": 9,
      "d": null
    }"#;

    let event = serde_json::from_str(json_data);

    assert!(matches!(event, Ok(Event::Resumed)));
}

#[test]
fn deserialize_client_connect_without_video() {
    let json_data = r#"{
      "op": 12,
      "d": {
        "audio_ssrc": 5678,
        "user_id": "1234"
      }
    }"#;

    let event = serde_json::from_str(json_data);

    let conn = ClientConnect {
        audio_ssrc: 5678,
        user_id: UserId(1234),
        video_ssrc: 0,
    };

    assert!(matches!(event, Ok(Event::ClientConnect(i)) if i == conn));
}

#[test]
fn deserialize_client_disconnect_json() {
    let json_data = r#"{"op": 13, "d": {"user_id": "1234"}}"#;

    let event = serde_json::from_str(json_data);

    let conn = ClientDisconnect {
        user_id: UserId(1234),
    };

    assert!(matches!(event, Ok(Event::ClientDisconnect(i)) if i == conn));
}

#[test]
fn deserialize_rejects_unknown_opcode() {
    let json_data = r#"{"op": 18, "d": {}}"#;

    assert!(serde_json::from_str::<Event>(json_data).is_err());
}

#[test]
fn deserialize_rejects_missing_body() {
    let json_data = r#"{"op": 3}"#;

    assert!(serde_json::from_str::<Event>(json_data).is_err());
}

#[test]
fn serialize_identify() {
    let value: Event = Identify {
        server_id: GuildId(1),
        session_id: "56f88a86dce65c65b9".into(),
        token: "56f88a86dce65c65b8".into(),
        user_id: UserId(2),
    }
    .into();

    serde_test::assert_ser_tokens(&value, &[
        Token::Struct {
            name: "Event",
            len: 2,
        },
        Token::Str("op"),
        Token::U8(Opcode::Identify as u8),
        Token::Str("d"),
        Token::Struct {
            name: "Identify",
            len: 4,
        },
        Token::Str("server_id"),
        Token::NewtypeStruct {
            name: "GuildId",
        },
        Token::Str("1"),
        Token::Str("session_id"),
        Token::Str("56f88a86dce65c65b9"),
        Token::Str("token"),
        Token::Str("56f88a86dce65c65b8"),
        Token::Str("user_id"),
        Token::NewtypeStruct {
            name: "UserId",
        },
        Token::Str("2"),
        Token::StructEnd,
        Token::StructEnd,
    ]);
}

#[test]
fn serialize_select_protocol() {
    let value: Event = SelectProtocol {
        protocol: "udp".into(),
        data: ProtocolData {
            address: Ipv4Addr::new(203, 0, 113, 5).into(),
            port: 50000,
            mode: "aead_xchacha20_poly1305_rtpsize".into(),
        },
    }
    .into();

    serde_test::assert_ser_tokens(&value.readable(), &[
        Token::Struct {
            name: "Event",
            len: 2,
        },
        Token::Str("op"),
        Token::U8(Opcode::SelectProtocol as u8),
        Token::Str("d"),
        Token::Struct {
            name: "SelectProtocol",
            len: 2,
        },
        Token::Str("data"),
        Token::Struct {
            name: "ProtocolData",
            len: 3,
        },
        Token::Str("address"),
        Token::Str("203.0.113.5"),
        Token::Str("mode"),
        Token::Str("aead_xchacha20_poly1305_rtpsize"),
        Token::Str("port"),
        Token::U16(50000),
        Token::StructEnd,
        Token::Str("protocol"),
        Token::Str("udp"),
        Token::StructEnd,
        Token::StructEnd,
    ]);
}

#[test]
fn serialize_heartbeat() {
    let value: Event = Heartbeat {
        nonce: 1234567890,
    }
    .into();

    serde_test::assert_ser_tokens(&value, &[
        Token::Struct {
            name: "Event",
            len: 2,
        },
        Token::Str("op"),
        Token::U8(Opcode::Heartbeat as u8),
        Token::Str("d"),
        Token::U64(1234567890),
        Token::StructEnd,
    ]);
}
