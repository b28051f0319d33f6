//! The public entry point: one [`Session`] logs in, joins a voice channel and listens to it.
use flume::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, Credentials};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, SessionEvent};
use crate::gateway::runner::{ShardRunner, ShardRunnerMessage, ShardRunnerOptions};
use crate::gateway::{Shard, VoiceJoin};

/// A running voice receive session.
///
/// Finished utterances and status lines arrive on [`Self::events`]. Dropping the session
/// signals every task to exit without waiting for them; call [`Self::stop`] to wait.
///
/// ```rust,no_run
/// use earshot::id::{ChannelId, GuildId};
/// use earshot::{Config, Credentials, Session, SessionEvent};
///
/// # async fn run() -> earshot::Result<()> {
/// let credentials = Credentials::new("token", GuildId(1), ChannelId(2));
/// let mut session = Session::start(credentials, Config::default())?;
///
/// while let Ok(event) = session.events().recv_async().await {
///     if let SessionEvent::SpeechSegmentReady(segment) = event {
///         println!("{:?} spoke for {} ms", segment.speaker, segment.duration_ms());
///     }
/// }
///
/// session.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    driver: Driver,
    runner_tx: Sender<ShardRunnerMessage>,
    runner: Option<JoinHandle<()>>,
    events_tx: Sender<SessionEvent>,
    events: Receiver<SessionEvent>,
}

impl Session {
    /// Starts a session: connects to the main gateway, then joins the voice channel named by
    /// `credentials` once logged in.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingToken`] if the token is empty. Problems found once connected,
    /// such as the gateway rejecting the token, are reported as
    /// [`SessionEvent::Disconnected`].
    #[instrument(skip(credentials, config))]
    pub fn start(credentials: Credentials, config: Config) -> Result<Self> {
        if !credentials.has_token() {
            return Err(Error::MissingToken);
        }

        let (events_tx, events) = flume::unbounded();
        let (runner_tx, runner_rx) = flume::unbounded();

        let driver = Driver::new(&config, credentials.target_speaker, events_tx.clone());

        let shard = Shard::new(Some(VoiceJoin {
            guild_id: credentials.guild_id,
            channel_id: credentials.channel_id,
            self_mute: config.self_mute,
            self_deaf: config.self_deaf,
        }));

        let runner = ShardRunner::new(
            ShardRunnerOptions {
                shard,
                token: credentials.token,
                gateway_url: config.gateway_url,
                intents: config.intents,
                reconnect_delay: config.reconnect_delay,
                voice: driver.handle(),
                events: events_tx.clone(),
            },
            runner_rx,
        );

        info!("Starting session for guild {}", credentials.guild_id);

        Ok(Self {
            driver,
            runner_tx,
            runner: Some(tokio::spawn(runner.run())),
            events_tx,
            events,
        })
    }

    /// Stops the session, waiting for every task to finish.
    ///
    /// The main gateway leaves voice and closes first, then the voice connection and audio
    /// worker are torn down. Calling this more than once is harmless.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) {
        let Some(runner) = self.runner.take() else {
            debug!("Session already stopped");
            return;
        };

        let _ = self.runner_tx.send(ShardRunnerMessage::Shutdown);
        if let Err(e) = runner.await {
            warn!("Gateway task ended abnormally: {:?}.", e);
        }

        self.driver.shutdown().await;

        let _ = self.events_tx.send(SessionEvent::Disconnected(DisconnectReason::Requested));
        info!("Session stopped");
    }

    /// Whether the voice connection is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// The queue of speech segments, log lines and disconnections.
    #[must_use]
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Number of SSRCs currently attributed to a user.
    #[must_use]
    pub fn known_speakers(&self) -> usize {
        self.driver.ssrcs().len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.runner.is_some() {
            let _ = self.runner_tx.send(ShardRunnerMessage::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use earshot_voice_model::id::{ChannelId, GuildId};

    use super::*;
    use crate::gateway::GatewayError;

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let credentials = Credentials::new("Bot ", GuildId(1), ChannelId(2));

        assert!(matches!(Session::start(credentials, Config::default()), Err(Error::MissingToken)));
    }

    #[tokio::test]
    async fn invalid_gateway_url_ends_session() {
        let credentials = Credentials::new("token", GuildId(1), ChannelId(2));
        let config = Config::default().gateway_url("not a url");

        let mut session = Session::start(credentials, config).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match session.events().recv_async().await {
                    Ok(SessionEvent::Log(_)) => continue,
                    other => break other,
                }
            }
        })
        .await
        .unwrap();

        assert!(matches!(
            event,
            Ok(SessionEvent::Disconnected(DisconnectReason::Gateway(GatewayError::BuildingUrl)))
        ));
        assert!(!session.is_connected());

        session.stop().await;
        session.stop().await;

        let last = session.events().drain().last();
        assert!(matches!(last, Some(SessionEvent::Disconnected(DisconnectReason::Requested))));
    }
}
