use super::Event;
use crate::payload::*;

/// Wraps each payload in the `Event` variant of the same name.
macro_rules! payload_into_event {
    ($($payload:ident),+ $(,)?) => {
        $(
            impl From<$payload> for Event {
                fn from(payload: $payload) -> Self {
                    Event::$payload(payload)
                }
            }
        )+
    };
}

payload_into_event!(
    ClientConnect,
    ClientDisconnect,
    Heartbeat,
    HeartbeatAck,
    Hello,
    Identify,
    Ready,
    Resume,
    SelectProtocol,
    SessionDescription,
    Speaking,
);
