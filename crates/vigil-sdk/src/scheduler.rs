//! Periodic driver for interval subscriptions.

use crate::subscription::SubscriptionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// A tokio task calling [`SubscriptionManager::poll`] every `tick`.
///
/// The timer lives exactly as long as the scheduler. `stop` ends the task;
/// dropping the scheduler closes the shutdown channel, which ends it too.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn(manager: Arc<SubscriptionManager>, tick: Duration) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?tick, "scheduler started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let delivered = manager.poll();
                        if delivered > 0 {
                            trace!(delivered, "poll tick");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("scheduler stopped");
        });
        Self { shutdown, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the timer and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
