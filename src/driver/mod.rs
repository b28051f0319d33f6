//! The voice half of a session: the voice gateway connection, its UDP media tasks, and the
//! audio worker they feed.
//!
//! A [`Driver`] owns every task belonging to one voice session. The main gateway hands it
//! [`ConnectionInfo`] once both halves of the voice join have arrived, and it handles resumes
//! and reconnects on its own from then on.

pub(crate) mod connection;
pub mod crypto;
pub mod discovery;
pub(crate) mod tasks;

use std::sync::Arc;
use std::thread::JoinHandle as ThreadHandle;

use earshot_voice_model::id::UserId;
use flume::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use self::connection::error::Error as ConnectionError;
pub use self::connection::handshake::VoiceStage;
pub use self::crypto::{decrypt_packet, CryptoError, CryptoMode, EncryptionContext};
use self::tasks::message::{AudioMessage, CoreMessage, Interconnect};
use crate::audio::worker::{self, AudioSettings};
use crate::config::Config;
use crate::events::SessionEvent;
use crate::info::ConnectionInfo;
use crate::ssrc::SsrcTable;

/// Handle to the voice tasks of a session.
#[derive(Debug)]
pub(crate) struct Driver {
    interconnect: Interconnect,
    core_task: Option<JoinHandle<()>>,
    audio_thread: Option<ThreadHandle<()>>,
    connected: watch::Receiver<bool>,
}

impl Driver {
    /// Starts the driver's core task and audio worker thread.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        config: &Config,
        target_speaker: Option<UserId>,
        events: Sender<SessionEvent>,
    ) -> Self {
        let (core_tx, core_rx) = flume::unbounded();
        let (audio_tx, audio_rx) = flume::unbounded();
        let (connected_tx, connected_rx) = watch::channel(false);

        let interconnect = Interconnect {
            core: core_tx,
            audio: audio_tx,
            events: events.clone(),
            ssrcs: Arc::new(SsrcTable::new()),
        };

        let settings = AudioSettings::new(config, target_speaker);
        let audio_thread = std::thread::spawn(move || worker::runner(settings, audio_rx, events));

        let core_task = tasks::start(config.clone(), interconnect.clone(), core_rx, connected_tx);

        Self {
            interconnect,
            core_task: Some(core_task),
            audio_thread: Some(audio_thread),
            connected: connected_rx,
        }
    }

    /// Returns a handle through which the main gateway steers voice connections.
    pub(crate) fn handle(&self) -> VoiceHandle {
        VoiceHandle(self.interconnect.core.clone())
    }

    /// Whether a voice connection is currently established.
    pub(crate) fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub(crate) fn ssrcs(&self) -> &Arc<SsrcTable> {
        &self.interconnect.ssrcs
    }

    /// Stops every voice task and the audio worker, waiting for each to exit.
    ///
    /// Sockets are closed before the SSRC table is cleared, and buffered audio is dropped
    /// without being emitted. Calling this again does nothing.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(core_task) = self.core_task.take() {
            self.send(CoreMessage::Poison);

            if let Err(e) = core_task.await {
                warn!("Voice driver task ended abnormally: {:?}.", e);
            }
        }

        self.interconnect.ssrcs.clear();

        if let Some(audio_thread) = self.audio_thread.take() {
            self.interconnect.poison_all();

            match tokio::task::spawn_blocking(move || audio_thread.join()).await {
                Ok(Ok(())) => info!("Audio worker joined."),
                Ok(Err(_)) => warn!("Audio worker panicked."),
                Err(e) => warn!("Could not join audio worker: {:?}.", e),
            }
        }
    }

    fn send(&self, status: CoreMessage) {
        // Only fails once the core task has exited, after which nothing needs doing.
        let _ = self.interconnect.core.send(status);
    }
}

/// Cloneable link to a [`Driver`]'s core task.
#[derive(Clone, Debug)]
pub(crate) struct VoiceHandle(Sender<CoreMessage>);

impl VoiceHandle {
    /// Connects to a voice server, replacing any existing voice connection.
    pub(crate) fn connect(&self, info: ConnectionInfo) {
        let _ = self.0.send(CoreMessage::Connect(info));
    }

    /// Drops the voice connection, keeping the driver ready for a new one.
    pub(crate) fn leave(&self) {
        let _ = self.0.send(CoreMessage::Disconnect);
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.core_task.is_some() {
            self.send(CoreMessage::Poison);
        }
        if self.audio_thread.is_some() {
            self.interconnect.poison_all();
        }
    }
}
