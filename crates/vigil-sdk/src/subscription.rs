//! Subscriptions: watching patterns on a mirror.
//!
//! A subscription moves through `Created -> Pending -> Active -> Cancelled`.
//! It is `Pending` while nothing it matches carries a value and becomes
//! `Active` once a value has been delivered. Each subscription keeps the
//! last set of leaves it delivered; refreshing re-resolves the pattern and
//! notifies observers once per added, updated or removed leaf. Unchanged
//! leaves stay silent.
//!
//! Interval subscriptions are refreshed by [`SubscriptionManager::poll`],
//! which something outside (usually a [`Scheduler`](crate::Scheduler))
//! calls. Push subscriptions are refreshed by
//! [`SubscriptionManager::notify_change_set`] whenever an applied ChangeSet
//! touches their pattern.
//!
//! Observers are invoked after the registry lock is released, so they may
//! call back into the manager. Cancelled subscriptions are dropped from the
//! registry.

use crate::error::{Result, SdkError};
use crate::mirror::Mirror;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use vigil_core::{AttributePath, AttributeValue, ChangeSet, Resolved, Version};

/// Handle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle of an observer attached to a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// When a subscription re-resolves its pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// On `poll` once the interval has elapsed since the last refresh.
    Interval(Duration),
    /// As soon as an applied ChangeSet touches the pattern.
    Push,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered, not yet resolved.
    Created,
    /// Resolved, but no value has arrived yet.
    Pending,
    /// At least one value has been delivered.
    Active,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Added,
    Updated,
    Removed,
}

/// One changed leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub subscription: SubscriptionId,
    pub path: AttributePath,
    pub change: Change,
    /// The new value; `Absent` for removals.
    pub value: AttributeValue,
    /// The leaf's version, or the mirror version a removal was seen at.
    pub version: Version,
}

/// Receives notifications for a subscription.
///
/// Observers may subscribe, cancel or refresh from inside `on_change`. A
/// batch already handed out is still delivered in full even if the
/// subscription is cancelled part way through it.
pub trait Observer: Send + Sync {
    fn on_change(&self, notification: &Notification);
}

impl<F> Observer for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_change(&self, notification: &Notification) {
        self(notification)
    }
}

struct Subscription {
    pattern: AttributePath,
    policy: DeliveryPolicy,
    state: SubscriptionState,
    /// Last delivered leaves.
    delivered: BTreeMap<AttributePath, (AttributeValue, Version)>,
    observers: Vec<(ObserverId, Arc<dyn Observer>)>,
    next_due: Instant,
}

/// Notifications produced under the lock, delivered after it is released.
#[must_use]
struct Delivery {
    notifications: Vec<Notification>,
    observers: Vec<Arc<dyn Observer>>,
}

impl Delivery {
    fn dispatch(self) -> usize {
        for notification in &self.notifications {
            trace!(id = %notification.subscription, path = %notification.path, change = ?notification.change, "notify");
            for observer in &self.observers {
                observer.on_change(notification);
            }
        }
        self.notifications.len()
    }
}

fn dispatch_all(deliveries: Vec<Delivery>) -> usize {
    deliveries.into_iter().map(Delivery::dispatch).sum()
}

impl Subscription {
    /// Re-resolve against the mirror and collect the differences.
    fn refresh(&mut self, id: SubscriptionId, mirror: &Mirror) -> Delivery {
        let (version, resolved) = mirror.read(|tree| (tree.version(), tree.resolve(&self.pattern)));

        let fresh: BTreeMap<AttributePath, (AttributeValue, Version)> = resolved
            .into_iter()
            .map(|r| (r.path, (r.value, r.version)))
            .collect();

        let mut notifications = Vec::new();
        for (path, entry) in &fresh {
            let change = match self.delivered.get(path) {
                None => Change::Added,
                Some(old) if old != entry => Change::Updated,
                Some(_) => continue,
            };
            notifications.push(Notification {
                subscription: id,
                path: path.clone(),
                change,
                value: entry.0.clone(),
                version: entry.1,
            });
        }
        for path in self.delivered.keys().filter(|path| !fresh.contains_key(*path)) {
            notifications.push(Notification {
                subscription: id,
                path: path.clone(),
                change: Change::Removed,
                value: AttributeValue::Absent,
                version,
            });
        }

        self.delivered = fresh;
        if self.delivered.values().any(|(value, _)| !value.is_absent()) {
            self.state = SubscriptionState::Active;
        } else if self.state == SubscriptionState::Created {
            self.state = SubscriptionState::Pending;
        }

        Delivery {
            notifications,
            observers: self.observers.iter().map(|(_, observer)| observer.clone()).collect(),
        }
    }

    fn current(&self) -> Vec<Resolved> {
        if self.delivered.is_empty() && self.pattern.is_concrete() && !self.pattern.is_root() {
            return vec![Resolved {
                path: self.pattern.clone(),
                value: AttributeValue::Absent,
                version: 0,
            }];
        }
        self.delivered
            .iter()
            .map(|(path, (value, version))| Resolved {
                path: path.clone(),
                value: value.clone(),
                version: *version,
            })
            .collect()
    }
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_subscription: u64,
    next_observer: u64,
}

impl Registry {
    fn live_mut(&mut self, id: SubscriptionId) -> Result<&mut Subscription> {
        self.subscriptions
            .get_mut(&id)
            .ok_or(SdkError::SubscriptionNotFound(id))
    }

    /// Ids are handed out in order, so one that was issued but is no longer
    /// registered has been cancelled.
    fn was_issued(&self, id: SubscriptionId) -> bool {
        id.0 >= 1 && id.0 <= self.next_subscription
    }
}

/// All subscriptions of one consumer.
pub struct SubscriptionManager {
    mirror: Arc<Mirror>,
    registry: Mutex<Registry>,
}

impl SubscriptionManager {
    pub fn new(mirror: Arc<Mirror>) -> Self {
        Self {
            mirror,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Register interest in `pattern` and resolve it right away.
    ///
    /// A concrete path the mirror does not hold yet reads as one `Absent`
    /// entry and the subscription stays `Pending`.
    pub fn subscribe(&self, pattern: AttributePath, policy: DeliveryPolicy) -> SubscriptionId {
        let mut registry = self.registry.lock();
        registry.next_subscription += 1;
        let id = SubscriptionId(registry.next_subscription);

        let mut subscription = Subscription {
            pattern,
            policy,
            state: SubscriptionState::Created,
            delivered: BTreeMap::new(),
            observers: Vec::new(),
            next_due: next_due(policy, Instant::now()),
        };
        // No observers yet; only the delivered set and state matter.
        let _ = subscription.refresh(id, &self.mirror);
        debug!(%id, pattern = %subscription.pattern, state = ?subscription.state, "subscribed");

        registry.subscriptions.insert(id, subscription);
        id
    }

    /// Attach an observer. It is immediately told about every value the
    /// subscription currently holds.
    pub fn add_observer(&self, id: SubscriptionId, observer: impl Observer + 'static) -> Result<ObserverId> {
        let observer: Arc<dyn Observer> = Arc::new(observer);
        let (observer_id, catch_up) = {
            let mut registry = self.registry.lock();
            registry.next_observer += 1;
            let observer_id = ObserverId(registry.next_observer);

            let subscription = registry.live_mut(id)?;
            let notifications = subscription
                .delivered
                .iter()
                .filter(|(_, (value, _))| !value.is_absent())
                .map(|(path, (value, version))| Notification {
                    subscription: id,
                    path: path.clone(),
                    change: Change::Added,
                    value: value.clone(),
                    version: *version,
                })
                .collect();
            subscription.observers.push((observer_id, observer.clone()));
            (
                observer_id,
                Delivery {
                    notifications,
                    observers: vec![observer],
                },
            )
        };
        catch_up.dispatch();
        Ok(observer_id)
    }

    /// Detach an observer; the subscription is cancelled with its last one.
    pub fn remove_observer(&self, id: SubscriptionId, observer: ObserverId) -> Result<()> {
        let mut registry = self.registry.lock();
        let subscription = registry.live_mut(id)?;
        subscription.observers.retain(|(oid, _)| *oid != observer);
        if subscription.observers.is_empty() {
            remove(&mut registry, id);
        }
        Ok(())
    }

    /// `subscribe` followed by `add_observer`.
    pub fn watch(
        &self,
        pattern: AttributePath,
        policy: DeliveryPolicy,
        observer: impl Observer + 'static,
    ) -> Result<SubscriptionId> {
        let id = self.subscribe(pattern, policy);
        self.add_observer(id, observer)?;
        Ok(id)
    }

    /// Refresh every interval subscription whose interval has elapsed.
    /// Returns the number of notifications produced.
    pub fn poll(&self) -> usize {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&self, now: Instant) -> usize {
        let deliveries: Vec<Delivery> = {
            let mut registry = self.registry.lock();
            registry
                .subscriptions
                .iter_mut()
                .filter_map(|(id, subscription)| {
                    let DeliveryPolicy::Interval(interval) = subscription.policy else {
                        return None;
                    };
                    if subscription.next_due > now {
                        return None;
                    }
                    subscription.next_due = now + interval;
                    Some(subscription.refresh(*id, &self.mirror))
                })
                .collect()
        };
        dispatch_all(deliveries)
    }

    /// Refresh push subscriptions an applied ChangeSet may have affected.
    pub fn notify_change_set(&self, changes: &ChangeSet) -> usize {
        let deliveries: Vec<Delivery> = {
            let mut registry = self.registry.lock();
            registry
                .subscriptions
                .iter_mut()
                .filter(|(_, subscription)| {
                    subscription.policy == DeliveryPolicy::Push
                        && (changes.is_snapshot() || changes.touches(&subscription.pattern))
                })
                .map(|(id, subscription)| subscription.refresh(*id, &self.mirror))
                .collect()
        };
        dispatch_all(deliveries)
    }

    /// Re-resolve one subscription now, regardless of its policy.
    pub fn refresh(&self, id: SubscriptionId) -> Result<usize> {
        let delivery = {
            let mut registry = self.registry.lock();
            registry.live_mut(id)?.refresh(id, &self.mirror)
        };
        Ok(delivery.dispatch())
    }

    /// Cancel a subscription and drop it from the registry. Idempotent;
    /// returns whether it was live.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        remove(&mut self.registry.lock(), id)
    }

    /// Cancel everything, e.g. when the session ends.
    pub fn cancel_all(&self) -> usize {
        let mut registry = self.registry.lock();
        let cancelled = registry.subscriptions.len();
        for (id, subscription) in registry.subscriptions.drain() {
            debug!(%id, pattern = %subscription.pattern, "cancelled");
        }
        cancelled
    }

    /// `Cancelled` for ids this manager issued and has since dropped.
    pub fn state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        let registry = self.registry.lock();
        match registry.subscriptions.get(&id) {
            Some(subscription) => Some(subscription.state),
            None if registry.was_issued(id) => Some(SubscriptionState::Cancelled),
            None => None,
        }
    }

    /// What the subscription last delivered.
    pub fn current(&self, id: SubscriptionId) -> Result<Vec<Resolved>> {
        let mut registry = self.registry.lock();
        Ok(registry.live_mut(id)?.current())
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.registry.lock().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_due(policy: DeliveryPolicy, now: Instant) -> Instant {
    match policy {
        DeliveryPolicy::Interval(interval) => now + interval,
        DeliveryPolicy::Push => now,
    }
}

fn remove(registry: &mut Registry, id: SubscriptionId) -> bool {
    match registry.subscriptions.remove(&id) {
        Some(subscription) => {
            debug!(%id, pattern = %subscription.pattern, "cancelled");
            true
        }
        None => false,
    }
}
