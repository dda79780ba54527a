use std::{
    collections::BTreeMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{Instant, timeout_at},
};

use crate::{
    bus::types::{HubEvent, Topic},
    error::{HubError, internal_error},
};

pub type SubscriptionId = u64;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: HubEvent) -> Result<(), HubError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(HubEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HubError>> + Send,
{
    async fn handle(&self, event: HubEvent) -> Result<(), HubError> {
        (self.0)(event).await
    }
}

struct Subscriber {
    label: String,
    tx: mpsc::Sender<HubEvent>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    next_id: SubscriptionId,
    topics: BTreeMap<Topic, BTreeMap<SubscriptionId, Subscriber>>,
}

struct BusInner {
    state: RwLock<BusState>,
    queue_capacity: usize,
    published: AtomicU64,
    shed: AtomicU64,
    handler_failures: Arc<AtomicU64>,
}

/// Typed publish/subscribe dispatcher.
///
/// Every subscription owns a bounded FIFO queue drained by its own task, so
/// events published on one topic reach each subscriber in publish order, and
/// a failing or panicking handler only affects its own subscription.
///
/// [`EventBus::publish`] never blocks and sheds the event for any subscriber
/// whose queue is full; [`EventBus::publish_wait`] waits for queue space
/// instead.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: RwLock::new(BusState::default()),
                queue_capacity: queue_capacity.max(1),
                published: AtomicU64::new(0),
                shed: AtomicU64::new(0),
                handler_failures: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        label: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, HubError> {
        let label = label.into();
        let mut state = self.inner.state.write().expect("lock poisoned");
        if state.closed {
            return Err(internal_error(format!(
                "event bus is closed; cannot subscribe '{label}' to {topic}"
            )));
        }

        state.next_id = state.next_id.saturating_add(1);
        let id = state.next_id;
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let task = tokio::spawn(run_subscriber(
            topic,
            id,
            label.clone(),
            handler,
            rx,
            Arc::clone(&self.inner.handler_failures),
        ));

        state
            .topics
            .entry(topic)
            .or_default()
            .insert(id, Subscriber { label, tx, task });

        tracing::debug!(target: "bus", topic = %topic, subscription_id = id, "subscribed");
        Ok(Subscription {
            id,
            topic,
            bus: Arc::downgrade(&self.inner),
        })
    }

    pub fn subscribe_fn<F, Fut>(
        &self,
        topic: Topic,
        label: impl Into<String>,
        handler: F,
    ) -> Result<Subscription, HubError>
    where
        F: Fn(HubEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        self.subscribe(topic, label, Arc::new(FnHandler(handler)))
    }

    /// Enqueues `event` for every current subscriber of its topic and returns
    /// how many subscribers accepted it. Never blocks: a subscriber whose
    /// queue is full misses the event and the drop is counted in
    /// [`EventBus::shed_count`].
    pub fn publish(&self, event: HubEvent) -> usize {
        let topic = event.topic();
        let state = self.inner.state.read().expect("lock poisoned");
        if state.closed {
            tracing::debug!(target: "bus", topic = %topic, "publish_after_close_dropped");
            return 0;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let Some(subscribers) = state.topics.get(&topic) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, subscriber) in subscribers {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.shed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        target: "bus",
                        topic = %topic,
                        subscription_id = *id,
                        handler = %subscriber.label,
                        capacity = self.inner.queue_capacity,
                        "subscriber_queue_full_event_shed"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(
                        target: "bus",
                        topic = %topic,
                        subscription_id = *id,
                        handler = %subscriber.label,
                        "subscriber_queue_closed"
                    );
                }
            }
        }
        delivered
    }

    /// Like [`EventBus::publish`], but waits for room in each subscriber's
    /// queue, so a slow subscriber slows the publisher down instead of
    /// losing events.
    pub async fn publish_wait(&self, event: HubEvent) -> usize {
        let topic = event.topic();
        let targets: Vec<(SubscriptionId, String, mpsc::Sender<HubEvent>)> = {
            let state = self.inner.state.read().expect("lock poisoned");
            if state.closed {
                tracing::debug!(target: "bus", topic = %topic, "publish_after_close_dropped");
                return 0;
            }
            self.inner.published.fetch_add(1, Ordering::Relaxed);
            state
                .topics
                .get(&topic)
                .map(|subscribers| {
                    subscribers
                        .iter()
                        .map(|(id, subscriber)| {
                            (*id, subscriber.label.clone(), subscriber.tx.clone())
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for (id, label, tx) in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(
                    target: "bus",
                    topic = %topic,
                    subscription_id = id,
                    handler = %label,
                    "subscriber_queue_closed"
                );
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .topics
            .get(&topic)
            .map_or(0, BTreeMap::len)
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Events dropped by [`EventBus::publish`] because a queue was full.
    pub fn shed_count(&self) -> u64 {
        self.inner.shed.load(Ordering::Relaxed)
    }

    pub fn handler_failures(&self) -> u64 {
        self.inner.handler_failures.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.read().expect("lock poisoned").closed
    }

    /// Detaches every subscriber of `topic` while leaving the rest of the bus
    /// running. Later publishes on `topic` reach nobody.
    pub fn drain_topic(&self, topic: Topic) -> BusDrain {
        let mut state = self.inner.state.write().expect("lock poisoned");
        let subscribers = state.topics.remove(&topic).unwrap_or_default();
        drop(state);

        BusDrain {
            tasks: subscribers
                .into_values()
                .map(|subscriber| {
                    drop(subscriber.tx);
                    (subscriber.label, subscriber.task)
                })
                .collect(),
        }
    }

    /// Stops accepting publishes and subscriptions. Queued events are still
    /// handled; the returned drain waits for that up to a grace period.
    pub fn close(&self) -> BusDrain {
        let mut state = self.inner.state.write().expect("lock poisoned");
        state.closed = true;
        let topics = std::mem::take(&mut state.topics);
        drop(state);

        let tasks = topics
            .into_values()
            .flat_map(BTreeMap::into_values)
            .map(|subscriber| {
                drop(subscriber.tx);
                (subscriber.label, subscriber.task)
            })
            .collect();
        BusDrain { tasks }
    }
}

/// Cancellation handle for one subscription. Dropping it keeps the
/// subscription alive; call [`Subscription::cancel`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    bus: std::sync::Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Removes the subscription. Events already queued for it are still
    /// handled before its task exits. Returns false if it was already gone.
    pub fn cancel(&self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut state = inner.state.write().expect("lock poisoned");
        let removed = state
            .topics
            .get_mut(&self.topic)
            .and_then(|subscribers| subscribers.remove(&self.id));
        removed.is_some()
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner")
            .field("queue_capacity", &self.queue_capacity)
            .field("published", &self.published)
            .field("shed", &self.shed)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    pub completed: usize,
    pub aborted: Vec<String>,
}

pub struct BusDrain {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl BusDrain {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn wait(self, grace: Duration) -> DrainOutcome {
        self.wait_until(Instant::now() + grace).await
    }

    pub async fn wait_until(self, deadline: Instant) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        for (label, mut task) in self.tasks {
            match timeout_at(deadline, &mut task).await {
                Ok(_) => outcome.completed += 1,
                Err(_) => {
                    task.abort();
                    tracing::warn!(target: "bus", handler = %label, "subscriber_aborted_after_grace");
                    outcome.aborted.push(label);
                }
            }
        }
        outcome
    }
}

async fn run_subscriber(
    topic: Topic,
    id: SubscriptionId,
    label: String,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::Receiver<HubEvent>,
    failures: Arc<AtomicU64>,
) {
    while let Some(event) = rx.recv().await {
        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "bus",
                    topic = %topic,
                    subscription_id = id,
                    handler = %label,
                    error_kind = err.kind.as_str(),
                    error = %err,
                    "handler_failed"
                );
            }
            Err(_) => {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: "bus",
                    topic = %topic,
                    subscription_id = id,
                    handler = %label,
                    "handler_panicked"
                );
            }
        }
    }
    tracing::debug!(target: "bus", topic = %topic, subscription_id = id, "subscriber_stopped");
}
