//! Consumer sessions: a mirror of one producer plus its subscriptions.

use crate::error::Result;
use crate::mirror::Mirror;
use crate::network::{Message, NetworkTransport, PeerId};
use crate::subscription::{DeliveryPolicy, Observer, SubscriptionId, SubscriptionManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use ulid::Ulid;
use vigil_core::{AttributePath, ChangeSet, Resolved, Version};
use vigil_sync::ApplyOutcome;

/// Configuration for a consumer session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Name announced to the producer.
    pub name: String,
    /// The producer this session mirrors.
    pub producer: PeerId,
    /// Ask for the missing range as soon as a gap is detected.
    pub resync_on_gap: bool,
    /// Acknowledge every confirmed version.
    pub send_acks: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "viewer".to_string(),
            producer: PeerId::new("peer-0"),
            resync_on_gap: true,
            send_acks: true,
        }
    }
}

/// Builder for session configuration.
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn producer(mut self, producer: PeerId) -> Self {
        self.config.producer = producer;
        self
    }

    pub fn resync_on_gap(mut self, enabled: bool) -> Self {
        self.config.resync_on_gap = enabled;
        self
    }

    pub fn send_acks(mut self, enabled: bool) -> Self {
        self.config.send_acks = enabled;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Connected,
    /// The mirror is confirmed up to `version`.
    Synced { version: Version },
    /// Changes are missing after `resync_from`.
    GapDetected { resync_from: Version },
    /// The producer is about to send a snapshot.
    ResyncRequired { since: Version, horizon: Version },
    Closed,
}

/// A consumer's view of one producer.
pub struct Session<T: NetworkTransport> {
    id: Ulid,
    config: SessionConfig,
    transport: Arc<T>,
    mirror: Arc<Mirror>,
    subscriptions: Arc<SubscriptionManager>,
    closed: AtomicBool,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl<T: NetworkTransport> Session<T> {
    pub fn new(config: SessionConfig, transport: Arc<T>) -> Self {
        let mirror = Arc::new(Mirror::new());
        let subscriptions = Arc::new(SubscriptionManager::new(mirror.clone()));
        let (event_tx, _) = broadcast::channel(100);
        Self {
            id: Ulid::new(),
            config,
            transport,
            mirror,
            subscriptions,
            closed: AtomicBool::new(false),
            event_tx,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Shared handle for a [`Scheduler`](crate::Scheduler).
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Announce the session to the producer, which answers with changes.
    pub async fn connect(&self) -> Result<()> {
        let message = Message::Hello {
            name: self.config.name.clone(),
            confirmed: self.mirror.version(),
        };
        self.transport.send(&self.config.producer, message).await?;
        info!(session = %self.id, producer = %self.config.producer, "connected");
        let _ = self.event_tx.send(SessionEvent::Connected);
        Ok(())
    }

    /// Ask for every change after the confirmed version.
    pub async fn request_sync(&self) -> Result<()> {
        let since = self.mirror.version();
        self.transport
            .send(&self.config.producer, Message::SyncRequest { since })
            .await?;
        Ok(())
    }

    pub fn resolve(&self, pattern: &AttributePath) -> Vec<Resolved> {
        self.mirror.resolve(pattern)
    }

    pub fn subscribe(&self, pattern: AttributePath, policy: DeliveryPolicy) -> SubscriptionId {
        self.subscriptions.subscribe(pattern, policy)
    }

    pub fn watch(
        &self,
        pattern: AttributePath,
        policy: DeliveryPolicy,
        observer: impl Observer + 'static,
    ) -> Result<SubscriptionId> {
        self.subscriptions.watch(pattern, policy, observer)
    }

    pub fn cancel(&self, id: SubscriptionId) -> bool {
        self.subscriptions.cancel(id)
    }

    /// Apply a received ChangeSet and react to the outcome.
    pub async fn apply(&self, changes: &ChangeSet) -> Result<ApplyOutcome> {
        let outcome = self.mirror.apply(changes)?;
        self.subscriptions.notify_change_set(changes);

        match outcome {
            ApplyOutcome::Gap { resync_from, .. } => {
                warn!(session = %self.id, resync_from, "gap detected");
                let _ = self.event_tx.send(SessionEvent::GapDetected { resync_from });
                if self.config.resync_on_gap {
                    self.transport
                        .send(&self.config.producer, Message::SyncRequest { since: resync_from })
                        .await?;
                }
            }
            ApplyOutcome::Applied { version, .. } => {
                let _ = self.event_tx.send(SessionEvent::Synced { version });
                if self.config.send_acks {
                    self.transport
                        .send(&self.config.producer, Message::Ack { version })
                        .await?;
                }
            }
        }
        Ok(outcome)
    }

    /// Handle one message from the producer.
    pub async fn handle_message(&self, from: &PeerId, message: Message) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        match message {
            Message::Changes(wire) => {
                let changes = ChangeSet::try_from(wire)?;
                self.apply(&changes).await?;
                Ok(())
            }
            Message::ResyncRequired { since, horizon } => {
                info!(session = %self.id, since, horizon, "producer requires a resync");
                self.mirror.reset_pending();
                let _ = self
                    .event_tx
                    .send(SessionEvent::ResyncRequired { since, horizon });
                Ok(())
            }
            Message::Ping => {
                self.transport.send(from, Message::Pong).await?;
                Ok(())
            }
            other => {
                debug!(session = %self.id, peer = %from, message = ?other, "ignored");
                Ok(())
            }
        }
    }

    /// Process incoming messages until `shutdown` flips or the inbox closes.
    pub async fn run(
        &self,
        mut inbox: mpsc::Receiver<(PeerId, Message)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = inbox.recv() => {
                    let Some((from, message)) = received else { break };
                    if let Err(err) = self.handle_message(&from, message).await {
                        warn!(session = %self.id, error = %err, "failed to handle message");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(session = %self.id, "session loop ended");
    }

    /// End the session: every subscription is cancelled, the producer is
    /// told to stop counting this mirror, and later messages are ignored.
    ///
    /// Only the first call does anything. The session is closed even when
    /// the goodbye cannot be delivered.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let cancelled = self.subscriptions.cancel_all();
        info!(session = %self.id, cancelled, "session closed");
        let _ = self.event_tx.send(SessionEvent::Closed);
        self.transport
            .send(&self.config.producer, Message::Goodbye)
            .await?;
        Ok(())
    }
}
