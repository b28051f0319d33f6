mod audio;
mod core;
mod udp_rx;
mod udp_tx;
mod ws;

use std::sync::Arc;

use flume::Sender;

pub(crate) use self::audio::*;
pub(crate) use self::core::*;
pub(crate) use self::udp_rx::*;
pub(crate) use self::udp_tx::*;
pub(crate) use self::ws::*;
use crate::events::SessionEvent;
use crate::ssrc::SsrcTable;

/// Handles shared by every task belonging to one voice driver.
#[derive(Clone, Debug)]
pub(crate) struct Interconnect {
    pub core: Sender<CoreMessage>,
    pub audio: Sender<AudioMessage>,
    pub events: Sender<SessionEvent>,
    pub ssrcs: Arc<SsrcTable>,
}

impl Interconnect {
    /// Shuts down the audio worker, dropping every buffered utterance.
    pub fn poison_all(&self) {
        let _ = self.audio.send(AudioMessage::Poison);
    }

    /// Forwards a human-readable status line to the session's event stream.
    pub fn log(&self, line: impl Into<String>) {
        let _ = self.events.send(SessionEvent::Log(line.into()));
    }
}
