use crate::ws::WsStream;

pub enum WsMessage {
    /// Replaces the socket after a successful resume.
    Ws(Box<WsStream>),
    /// Sets the heartbeat interval, in milliseconds.
    SetKeepalive(f64),

    Poison,
}
