//! Producer-side synchronization: serving ChangeSets to consumers.

use crate::error::Result;
use crate::network::{Message, NetworkTransport, PeerId};
use crate::producer::{ProducerEvent, ProducerHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use vigil_core::Version;
use vigil_sync::{AckTracker, ChangeSetWire};

/// Configuration for sync behavior.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// How often to push pending changes to consumers (in milliseconds).
    pub sync_interval_ms: u64,
    /// Push changes as soon as the producer commits them.
    pub push_on_commit: bool,
    /// Discard tombstones every consumer has acknowledged.
    pub compact_acknowledged: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 1000,
            push_on_commit: true,
            compact_acknowledged: true,
        }
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn sync_interval(mut self, ms: u64) -> Self {
        self.config.sync_interval_ms = ms;
        self
    }

    pub fn push_on_commit(mut self, enabled: bool) -> Self {
        self.config.push_on_commit = enabled;
        self
    }

    pub fn compact_acknowledged(mut self, enabled: bool) -> Self {
        self.config.compact_acknowledged = enabled;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by the sync manager.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A consumer said hello.
    PeerJoined(PeerId),
    /// A consumer said goodbye and no longer holds back compaction.
    PeerLeft(PeerId),
    /// Changes were sent to a consumer.
    Sent {
        peer_id: PeerId,
        base: Version,
        result: Version,
        snapshot: bool,
    },
    /// A consumer confirmed `version`.
    Acked { peer_id: PeerId, version: Version },
    /// Tombstones up to `horizon` were discarded.
    Compacted { horizon: Version, discarded: usize },
}

/// Serves a producer's changes to its consumers.
pub struct SyncManager<T: NetworkTransport> {
    transport: Arc<T>,
    producer: ProducerHandle,
    config: SyncConfig,
    acks: Mutex<AckTracker>,
    /// Highest version sent to each consumer.
    sent: Mutex<HashMap<PeerId, Version>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl<T: NetworkTransport> SyncManager<T> {
    pub fn new(transport: Arc<T>, producer: ProducerHandle, config: SyncConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            transport,
            producer,
            config,
            acks: Mutex::new(AckTracker::new()),
            sent: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Versions acknowledged per consumer.
    pub fn acked(&self, peer_id: &PeerId) -> Version {
        self.acks.lock().get_ack(peer_id.as_str())
    }

    pub fn peer_count(&self) -> usize {
        self.acks.lock().len()
    }

    /// Handle one message from a consumer.
    pub async fn handle_message(&self, from: &PeerId, message: Message) -> Result<()> {
        match message {
            Message::Hello { name, confirmed } => {
                info!(peer = %from, %name, confirmed, "consumer joined");
                self.acks.lock().register_peer(from.as_str());
                let _ = self.event_tx.send(SyncEvent::PeerJoined(from.clone()));
                self.serve(from, confirmed).await
            }
            Message::SyncRequest { since } => {
                debug!(peer = %from, since, "sync requested");
                self.serve(from, since).await
            }
            Message::Ack { version } => {
                self.acks.lock().update_ack(from.as_str(), version);
                let _ = self.event_tx.send(SyncEvent::Acked {
                    peer_id: from.clone(),
                    version,
                });
                if self.config.compact_acknowledged {
                    self.compact().await?;
                }
                Ok(())
            }
            Message::Goodbye => {
                info!(peer = %from, acked = self.acked(from), "consumer left");
                self.remove_peer(from);
                let _ = self.event_tx.send(SyncEvent::PeerLeft(from.clone()));
                if self.config.compact_acknowledged {
                    self.compact().await?;
                }
                Ok(())
            }
            Message::Ping => {
                self.transport.send(from, Message::Pong).await?;
                Ok(())
            }
            other => {
                debug!(peer = %from, message = ?other, "ignored");
                Ok(())
            }
        }
    }

    /// Send a consumer everything after `since`, or a snapshot if that range
    /// is no longer available.
    pub async fn serve(&self, peer_id: &PeerId, since: Version) -> Result<()> {
        let changes = self.producer.diff(since)?;
        if changes.is_snapshot() {
            let horizon = self.producer.horizon();
            warn!(peer = %peer_id, since, horizon, "consumer needs a snapshot");
            self.transport
                .send(peer_id, Message::ResyncRequired { since, horizon })
                .await?;
        }

        let (base, result, snapshot) = (
            changes.base_version(),
            changes.result_version(),
            changes.is_snapshot(),
        );
        self.transport
            .send(peer_id, Message::Changes(ChangeSetWire::from(&changes)))
            .await?;
        self.sent.lock().insert(peer_id.clone(), result);
        let _ = self.event_tx.send(SyncEvent::Sent {
            peer_id: peer_id.clone(),
            base,
            result,
            snapshot,
        });
        Ok(())
    }

    /// Push changes each consumer has not been sent yet. Returns how many
    /// consumers were sent something.
    pub async fn broadcast_changes(&self) -> Result<usize> {
        let version = self.producer.version();
        let behind: Vec<(PeerId, Version)> = {
            let acks = self.acks.lock();
            let sent = self.sent.lock();
            acks.peers()
                .map(|peer| {
                    let peer_id = PeerId::new(peer.clone());
                    let since = sent
                        .get(&peer_id)
                        .copied()
                        .unwrap_or(0)
                        .max(acks.get_ack(peer));
                    (peer_id, since)
                })
                .filter(|(_, since)| *since < version)
                .collect()
        };

        for (peer_id, since) in &behind {
            self.serve(peer_id, *since).await?;
        }
        Ok(behind.len())
    }

    /// Discard tombstones below the lowest acknowledged version.
    pub async fn compact(&self) -> Result<usize> {
        let Some(horizon) = self.acks.lock().min_acked() else {
            return Ok(0);
        };
        if horizon <= self.producer.horizon() {
            return Ok(0);
        }
        let discarded = self.producer.compact(horizon).await?;
        if discarded > 0 {
            let _ = self
                .event_tx
                .send(SyncEvent::Compacted { horizon, discarded });
        }
        Ok(discarded)
    }

    /// Forget a consumer so it no longer holds back compaction.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.acks.lock().remove_peer(peer_id.as_str());
        self.sent.lock().remove(peer_id);
    }

    /// Serve consumers until `shutdown` flips to `true` or the inbox closes.
    pub async fn run(
        &self,
        mut inbox: mpsc::Receiver<(PeerId, Message)>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut commits = self.producer.events();
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.sync_interval_ms));
        info!("sync manager started");

        loop {
            tokio::select! {
                received = inbox.recv() => {
                    let Some((from, message)) = received else { break };
                    if let Err(err) = self.handle_message(&from, message).await {
                        warn!(peer = %from, error = %err, "failed to handle message");
                    }
                }
                event = commits.recv() => match event {
                    Ok(ProducerEvent::Committed { .. }) if self.config.push_on_commit => {
                        self.push().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "commit events lagged");
                        self.push().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Ok(_) => {}
                },
                _ = interval.tick() => self.push().await,
                _ = shutdown.changed() => break,
            }
        }

        info!("sync manager stopped");
        Ok(())
    }

    async fn push(&self) {
        if let Err(err) = self.broadcast_changes().await {
            warn!(error = %err, "failed to push changes");
        }
    }
}
