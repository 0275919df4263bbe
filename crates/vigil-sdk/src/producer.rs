//! The producer side: one task owns the attribute tree.
//!
//! Samplers never touch the tree directly. They hold a [`ProducerHandle`]
//! and send mutations through a bounded queue; the producer task applies
//! them one at a time under a short write lock and answers through a
//! oneshot. Readers go through the same lock, so a leaf's value and version
//! are always observed together.

use crate::error::{Result, SdkError};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use vigil_core::{
    AttributePath, AttributeTree, AttributeValue, ChangeSet, CoreError, Resolved, Version,
};
use vigil_sync::SyncEngine;

/// Tree shared between its owner and read-only observers.
pub type SharedTree = Arc<RwLock<AttributeTree>>;

/// Configuration for the producer task.
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    /// Mutations that may wait in the queue before senders are suspended.
    pub queue_capacity: usize,
    /// Commit events buffered for slow event subscribers.
    pub event_capacity: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            event_capacity: 256,
        }
    }
}

/// Events emitted by the producer task.
#[derive(Clone, Debug, PartialEq)]
pub enum ProducerEvent {
    /// A mutation was committed at `version`.
    Committed { version: Version, path: AttributePath },
    /// Tombstones at or below `horizon` were discarded.
    Compacted { horizon: Version, discarded: usize },
}

enum Command {
    Upsert {
        path: AttributePath,
        value: AttributeValue,
        reply: oneshot::Sender<std::result::Result<Version, CoreError>>,
    },
    Declare {
        path: AttributePath,
        reply: oneshot::Sender<std::result::Result<Version, CoreError>>,
    },
    Remove {
        path: AttributePath,
        reply: oneshot::Sender<std::result::Result<Version, CoreError>>,
    },
    Compact {
        horizon: Version,
        reply: oneshot::Sender<usize>,
    },
}

/// The tree-owning task. Runs until every handle is dropped.
pub struct Producer {
    tree: SharedTree,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ProducerEvent>,
}

impl Producer {
    /// Create a producer and its first handle without starting it.
    pub fn new(config: ProducerConfig) -> (Self, ProducerHandle) {
        let tree: SharedTree = Arc::new(RwLock::new(AttributeTree::new()));
        let (command_tx, commands) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);

        let handle = ProducerHandle {
            commands: command_tx,
            tree: tree.clone(),
            events: events.clone(),
        };
        (
            Self {
                tree,
                commands,
                events,
            },
            handle,
        )
    }

    /// Create a producer and run it on the current tokio runtime.
    pub fn spawn(config: ProducerConfig) -> (ProducerHandle, JoinHandle<()>) {
        let (producer, handle) = Self::new(config);
        (handle, tokio::spawn(producer.run()))
    }

    pub async fn run(mut self) {
        info!("producer started");
        while let Some(command) = self.commands.recv().await {
            self.execute(command);
        }
        info!(version = self.tree.read().version(), "producer stopped");
    }

    fn execute(&self, command: Command) {
        match command {
            Command::Upsert { path, value, reply } => {
                let result = self.tree.write().upsert(&path, value);
                self.committed(&path, &result);
                let _ = reply.send(result);
            }
            Command::Declare { path, reply } => {
                let before = self.tree.read().version();
                let result = self.tree.write().declare(&path);
                if matches!(result, Ok(version) if version > before) {
                    self.committed(&path, &result);
                }
                let _ = reply.send(result);
            }
            Command::Remove { path, reply } => {
                let result = self.tree.write().remove(&path);
                self.committed(&path, &result);
                let _ = reply.send(result);
            }
            Command::Compact { horizon, reply } => {
                let discarded = self.tree.write().compact(horizon);
                if discarded > 0 {
                    debug!(horizon, discarded, "compacted tombstones");
                    let _ = self
                        .events
                        .send(ProducerEvent::Compacted { horizon, discarded });
                }
                let _ = reply.send(discarded);
            }
        }
    }

    fn committed(&self, path: &AttributePath, result: &std::result::Result<Version, CoreError>) {
        match result {
            Ok(version) => {
                trace!(%path, version, "committed");
                let _ = self.events.send(ProducerEvent::Committed {
                    version: *version,
                    path: path.clone(),
                });
            }
            Err(err) => debug!(%path, error = %err, "mutation rejected"),
        }
    }
}

/// Cloneable access to a producer: mutations go through the queue, reads
/// through the shared lock.
#[derive(Clone)]
pub struct ProducerHandle {
    commands: mpsc::Sender<Command>,
    tree: SharedTree,
    events: broadcast::Sender<ProducerEvent>,
}

impl ProducerHandle {
    pub async fn upsert(&self, path: &AttributePath, value: impl Into<AttributeValue>) -> Result<Version> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Upsert {
            path: path.clone(),
            value: value.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| SdkError::ProducerClosed)??)
    }

    /// Put a path into the namespace as `Absent` until its first sample.
    pub async fn declare(&self, path: &AttributePath) -> Result<Version> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Declare {
            path: path.clone(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| SdkError::ProducerClosed)??)
    }

    pub async fn remove(&self, path: &AttributePath) -> Result<Version> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Remove {
            path: path.clone(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| SdkError::ProducerClosed)??)
    }

    /// Discard tombstones at or below `horizon`.
    pub async fn compact(&self, horizon: Version) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Compact { horizon, reply }).await?;
        rx.await.map_err(|_| SdkError::ProducerClosed)
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SdkError::ProducerClosed)
    }

    pub fn version(&self) -> Version {
        self.tree.read().version()
    }

    pub fn horizon(&self) -> Version {
        self.tree.read().horizon()
    }

    pub fn resolve(&self, pattern: &AttributePath) -> Vec<Resolved> {
        self.tree.read().resolve(pattern)
    }

    pub fn get(&self, path: &AttributePath) -> Option<AttributeValue> {
        self.tree.read().get(path).cloned()
    }

    /// Changes after `since`, or a snapshot when `since` is out of range.
    pub fn diff(&self, since: Version) -> Result<ChangeSet> {
        Ok(SyncEngine::diff(&self.tree.read(), since)?)
    }

    pub fn snapshot(&self) -> ChangeSet {
        self.tree.read().snapshot()
    }

    pub fn events(&self) -> broadcast::Receiver<ProducerEvent> {
        self.events.subscribe()
    }

    pub fn tree(&self) -> SharedTree {
        self.tree.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> AttributePath {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_through_queue() {
        let (handle, _task) = Producer::spawn(ProducerConfig::default());
        let version = handle.upsert(&p("/memory/usage"), 42i64).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(handle.get(&p("/memory/usage")), Some(AttributeValue::Integer(42)));
    }

    #[tokio::test]
    async fn test_errors_come_back_to_caller() {
        let (handle, _task) = Producer::spawn(ProducerConfig::default());
        let err = handle.remove(&p("/cpu/9")).await.unwrap_err();
        assert!(matches!(err, SdkError::Core(CoreError::NotFound(_))));
        assert_eq!(handle.version(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_samplers_are_serialized() {
        let (handle, _task) = Producer::spawn(ProducerConfig::default());

        let mut samplers = Vec::new();
        for family in ["cpu", "memory", "proc"] {
            let handle = handle.clone();
            samplers.push(tokio::spawn(async move {
                for i in 0..50i64 {
                    let path: AttributePath = format!("/{}/{}", family, i % 5).parse().unwrap();
                    handle.upsert(&path, i).await.unwrap();
                }
            }));
        }
        for sampler in samplers {
            sampler.await.unwrap();
        }

        assert_eq!(handle.version(), 150);
        let leaves = handle.resolve(&p("/_/_"));
        assert_eq!(leaves.len(), 15);
        assert!(leaves
            .iter()
            .all(|leaf| leaf.value.as_integer().is_some_and(|v| v >= 45)));
    }

    #[tokio::test]
    async fn test_commit_events() {
        let (handle, _task) = Producer::spawn(ProducerConfig::default());
        let mut events = handle.events();

        handle.declare(&p("/uptime")).await.unwrap();
        handle.declare(&p("/uptime")).await.unwrap();
        handle.upsert(&p("/uptime"), 5i64).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ProducerEvent::Committed { version: 1, path: p("/uptime") }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ProducerEvent::Committed { version: 2, path: p("/uptime") }
        );
    }

    #[tokio::test]
    async fn test_compact_through_queue() {
        let (handle, _task) = Producer::spawn(ProducerConfig::default());
        handle.upsert(&p("/a"), 1i64).await.unwrap();
        handle.remove(&p("/a")).await.unwrap();

        assert_eq!(handle.compact(2).await.unwrap(), 1);
        assert_eq!(handle.horizon(), 2);
        assert!(handle.diff(0).unwrap().is_snapshot());
    }

    #[tokio::test]
    async fn test_closed_producer() {
        let (producer, handle) = Producer::new(ProducerConfig::default());
        drop(producer);
        assert!(matches!(
            handle.upsert(&p("/a"), 1i64).await,
            Err(SdkError::ProducerClosed)
        ));
    }
}
