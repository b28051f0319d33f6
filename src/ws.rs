//! JSON websocket helpers for the voice gateway.
use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use earshot_voice_model::Event;
use futures::{SinkExt, StreamExt};
use serde_json::Error as JsonError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::Error as TungsteniteError;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{instrument, warn};
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Json(JsonError),

    /// The voice gateway does not support or offer zlib compression.
    /// As a result, only text messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    Ws(TungsteniteError),

    WsClosed(Option<CloseFrame<'static>>),
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Ws(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => e.fmt(f),
            Self::UnexpectedBinaryMessage(b) => {
                write!(f, "unexpected binary message ({}B)", b.len())
            },
            Self::Ws(e) => e.fmt(f),
            Self::WsClosed(Some(frame)) => write!(f, "websocket closed ({})", frame.code),
            Self::WsClosed(None) => f.write_str("websocket closed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Ws(e) => Some(e),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ReceiverExt {
    /// Receives the next event, or `None` for frames carrying no event (e.g. pings).
    async fn recv_json(&mut self) -> Result<Option<Event>>;
}

#[async_trait]
pub trait SenderExt {
    async fn send_json(&mut self, value: &Event) -> Result<()>;
}

#[async_trait]
impl ReceiverExt for WsStream {
    async fn recv_json(&mut self) -> Result<Option<Event>> {
        match self.next().await {
            Some(Ok(v)) => convert_ws_message(Some(v)),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::WsClosed(None)),
        }
    }
}

#[async_trait]
impl SenderExt for WsStream {
    async fn send_json(&mut self, value: &Event) -> Result<()> {
        Ok(serde_json::to_string(value)
            .map(Message::Text)
            .map_err(Error::from)
            .map(|m| self.send(m))?
            .await?)
    }
}

#[inline]
pub(crate) fn convert_ws_message(message: Option<Message>) -> Result<Option<Event>> {
    Ok(match message {
        Some(Message::Text(payload)) => match serde_json::from_str(&payload) {
            Ok(event) => Some(event),
            Err(why) => {
                warn!("Err deserializing text: {:?}; text: {}", why, payload);

                return Err(why.into());
            },
        },
        Some(Message::Binary(bytes)) => {
            return Err(Error::UnexpectedBinaryMessage(bytes));
        },
        Some(Message::Close(frame)) => {
            return Err(Error::WsClosed(frame));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}

/// Opens a websocket, over TLS for `wss` URLs, with message size limits lifted.
#[instrument]
pub(crate) async fn create_client(url: &Url) -> Result<WsStream> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = None;
    config.max_frame_size = None;

    let (stream, _) = connect_async_with_config(url.as_str(), Some(config), true).await?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use earshot_voice_model::payload::Hello;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn text_frames_parse() {
        let msg = Message::Text(r#"{"op":8,"d":{"heartbeat_interval":13750.0}}"#.into());

        let event = convert_ws_message(Some(msg)).unwrap();
        assert!(matches!(
            event,
            Some(Event::Hello(Hello { heartbeat_interval })) if heartbeat_interval == 13750.0
        ));
    }

    #[test]
    fn control_frames_carry_nothing() {
        assert!(convert_ws_message(Some(Message::Ping(vec![1]))).unwrap().is_none());
        assert!(convert_ws_message(None).unwrap().is_none());
    }

    #[test]
    fn close_frame_keeps_code() {
        let frame = CloseFrame {
            code: CloseCode::from(4014),
            reason: "".into(),
        };

        let err = convert_ws_message(Some(Message::Close(Some(frame)))).unwrap_err();
        assert!(matches!(err, Error::WsClosed(Some(f)) if u16::from(f.code) == 4014));
    }

    #[test]
    fn binary_and_garbage_are_errors() {
        assert!(matches!(
            convert_ws_message(Some(Message::Binary(vec![0x78, 0x9c]))),
            Err(Error::UnexpectedBinaryMessage(_))
        ));
        assert!(matches!(convert_ws_message(Some(Message::Text("{".into()))), Err(Error::Json(_))));
    }
}
