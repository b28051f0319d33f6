use std::env::consts;
use std::io::Read;

use earshot_voice_model::id::{ChannelId, GuildId};
use flate2::read::ZlibDecoder;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace, warn};
use url::Url;

use super::{GatewayError, GatewayEvent, GatewayIntents};
use crate::constants::{self, Opcode};
use crate::error::{Error, Result};

/// A JSON websocket to the main gateway, inflating zlib-compressed binary frames.
pub struct WsClient(WebSocketStream<MaybeTlsStream<TcpStream>>);

const DECOMPRESSION_MULTIPLIER: usize = 3;

impl WsClient {
    pub(crate) async fn connect(url: Url) -> Result<Self> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = None;
        config.max_frame_size = None;

        let (stream, _) = connect_async_with_config(url.as_str(), Some(config), false).await?;

        Ok(Self(stream))
    }

    /// Receives the next frame, returning `None` for frames carrying no payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Closed`] once the gateway closes the connection, and a decoding
    /// error for payloads which do not parse.
    pub(crate) async fn recv_json(&mut self) -> Result<Option<GatewayEvent>> {
        let message = match self.0.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::Gateway(GatewayError::Closed(None))),
        };

        let value = match message {
            Message::Binary(bytes) => {
                let mut decompressed =
                    String::with_capacity(bytes.len() * DECOMPRESSION_MULTIPLIER);

                ZlibDecoder::new(&bytes[..]).read_to_string(&mut decompressed).map_err(|why| {
                    warn!("Err decompressing bytes: {:?}; bytes: {:?}", why, bytes);

                    why
                })?;

                serde_json::from_str(&decompressed).map_err(|why| {
                    warn!("Err deserializing bytes: {:?}; bytes: {:?}", why, bytes);

                    why
                })?
            },
            Message::Text(payload) => serde_json::from_str(&payload).map_err(|why| {
                warn!("Err deserializing text: {:?}; text: {}", why, payload);

                why
            })?,
            Message::Close(frame) => {
                return Err(Error::Gateway(GatewayError::Closed(frame)));
            },
            _ => return Ok(None),
        };

        Ok(Some(value))
    }

    pub(crate) async fn send_json(&mut self, value: &Value) -> Result<()> {
        let message = serde_json::to_string(value).map(Message::Text)?;

        self.0.send(message).await?;
        Ok(())
    }

    /// Delegate to `WebSocketStream::close`
    pub(crate) async fn close(&mut self, msg: Option<CloseFrame<'_>>) -> Result<()> {
        self.0.close(msg).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub(crate) async fn send_heartbeat(&mut self, seq: Option<u64>) -> Result<()> {
        trace!("Sending heartbeat d: {:?}", seq);

        self.send_json(&json!({
            "op": Opcode::Heartbeat,
            "d": seq,
        }))
        .await
    }

    #[instrument(skip(self, token))]
    pub(crate) async fn send_identify(
        &mut self,
        token: &str,
        intents: GatewayIntents,
    ) -> Result<()> {
        debug!("Identifying");

        self.send_json(&json!({
            "op": Opcode::Identify,
            "d": {
                "compress": true,
                "token": token,
                "intents": intents.bits(),
                "v": constants::GATEWAY_VERSION,
                "properties": {
                    "os": consts::OS,
                    "browser": "earshot",
                    "device": "earshot",
                },
            },
        }))
        .await
    }

    #[instrument(skip(self, token))]
    pub(crate) async fn send_resume(
        &mut self,
        session_id: &str,
        seq: u64,
        token: &str,
    ) -> Result<()> {
        debug!("Sending resume; seq: {}", seq);

        self.send_json(&json!({
            "op": Opcode::Resume,
            "d": {
                "session_id": session_id,
                "seq": seq,
                "token": token,
            },
        }))
        .await
    }

    /// Joins `channel_id`, or leaves voice in the guild when it is `None`.
    #[instrument(skip(self))]
    pub(crate) async fn send_voice_state_update(
        &mut self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        debug!("Updating voice state");

        self.send_json(&voice_state_update(guild_id, channel_id, self_mute, self_deaf)).await
    }
}

fn voice_state_update(
    guild_id: GuildId,
    channel_id: Option<ChannelId>,
    self_mute: bool,
    self_deaf: bool,
) -> Value {
    json!({
        "op": Opcode::VoiceStateUpdate,
        "d": {
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_join_payload() {
        let payload = voice_state_update(GuildId(41), Some(ChannelId(7)), true, false);

        assert_eq!(
            payload,
            json!({
                "op": 4,
                "d": {
                    "guild_id": "41",
                    "channel_id": "7",
                    "self_mute": true,
                    "self_deaf": false,
                },
            })
        );
    }

    #[test]
    fn voice_leave_payload() {
        let payload = voice_state_update(GuildId(41), None, false, false);

        assert_eq!(payload["d"]["channel_id"], Value::Null);
    }
}
