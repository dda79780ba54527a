use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::{FutureExt, StreamExt};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval, sleep, sleep_until, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    bus::{EventBus, HubEvent},
    config::SensorsConfig,
    error::{HubError, HubErrorKind, feed_unavailable, internal_error},
    reliability::Backoff,
    sensors::{
        cache::ReadingCache,
        coalesce::Coalescer,
        normalize::normalize_sample,
        ports::{Feed, PullFeed, PushFeed, RawSample},
    },
    types::SensorReading,
};

/// Drives every configured feed and funnels normalized readings through the
/// de-duplication window onto the bus under "reading".
///
/// Feed loops never stop each other: a failing pull is logged and retried on
/// the next tick, and a dropped stream reconnects with capped backoff.
pub struct SensorIngestor {
    cache: Arc<ReadingCache>,
    intake: mpsc::Sender<SensorReading>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    feed_count: usize,
}

impl SensorIngestor {
    pub fn start(
        config: &SensorsConfig,
        bus: EventBus,
        feeds: Vec<Feed>,
        shutdown: CancellationToken,
    ) -> Self {
        let cache = Arc::new(ReadingCache::new(
            config.cache_capacity,
            Duration::from_millis(config.cache_ttl_ms),
        ));
        let cancel = shutdown.child_token();
        let tasks = TaskTracker::new();
        let (intake, intake_rx) = mpsc::channel(config.queue_capacity.max(1));

        tasks.spawn(run_coalescer(
            Coalescer::new(Duration::from_millis(config.dedup_window_ms)),
            intake_rx,
            Arc::clone(&cache),
            bus,
            cancel.clone(),
        ));

        let pull_timeout = Duration::from_millis(config.pull_timeout_ms.max(1));
        let reconnect = Backoff::new(config.reconnect_base_ms, config.reconnect_max_ms);
        let feed_count = feeds.len();
        for feed in feeds {
            tracing::info!(target: "sensors", source_id = feed.source_id(), "feed_started");
            match feed {
                Feed::Pull { feed, interval } => {
                    tasks.spawn(run_pull_feed(
                        feed,
                        interval,
                        pull_timeout,
                        intake.clone(),
                        cancel.clone(),
                    ));
                }
                Feed::Push(feed) => {
                    tasks.spawn(run_push_feed(
                        feed,
                        reconnect,
                        intake.clone(),
                        cancel.clone(),
                    ));
                }
            }
        }

        Self {
            cache,
            intake,
            cancel,
            tasks,
            feed_count,
        }
    }

    pub fn cache(&self) -> Arc<ReadingCache> {
        Arc::clone(&self.cache)
    }

    pub fn feed_count(&self) -> usize {
        self.feed_count
    }

    /// Normalizes and enqueues a sample as if `source_id`'s feed produced it.
    pub async fn submit(&self, source_id: &str, sample: RawSample) -> Result<(), HubError> {
        let reading = normalize_sample(source_id, sample)?;
        self.submit_reading(reading).await
    }

    pub async fn submit_reading(&self, reading: SensorReading) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(internal_error("sensor ingestor is stopped"));
        }
        self.intake
            .send(reading)
            .await
            .map_err(|_| internal_error("sensor ingestor is stopped"))
    }

    /// Stops all feed loops, flushes readings still held in the window, and
    /// waits up to `grace` for the tasks to exit. Returns false on timeout.
    pub async fn stop(self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tasks.close();
        drop(self.intake);

        let drained = timeout(grace, self.tasks.wait()).await.is_ok();
        if drained {
            tracing::info!(target: "sensors", "ingestor_stopped");
        } else {
            tracing::warn!(
                target: "sensors",
                grace_ms = grace.as_millis() as u64,
                "ingestor_stop_timed_out"
            );
        }
        drained
    }
}

async fn run_coalescer(
    mut coalescer: Coalescer,
    mut intake: mpsc::Receiver<SensorReading>,
    cache: Arc<ReadingCache>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    // Shutdown flush: never waits on subscribers.
    let emit_now = |reading: SensorReading| {
        cache.insert(reading.clone());
        let delivered = bus.publish(HubEvent::Reading(reading));
        tracing::debug!(target: "sensors", delivered = delivered, "reading_flushed");
    };

    let mut unsent = Vec::new();
    'intake: loop {
        let deadline = coalescer.next_deadline();
        let ready: Vec<SensorReading> = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'intake,
            received = intake.recv() => match received {
                Some(reading) => coalescer.offer(reading, Instant::now()).into_iter().collect(),
                None => break 'intake,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                coalescer.drain_due(Instant::now())
            }
        };

        let mut ready = ready.into_iter();
        while let Some(reading) = ready.next() {
            cache.insert(reading.clone());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        target: "sensors",
                        source_id = %reading.source_id,
                        "reading_publish_interrupted_by_shutdown"
                    );
                    unsent.extend(ready);
                    break 'intake;
                }
                delivered = bus.publish_wait(HubEvent::Reading(reading.clone())) => {
                    tracing::debug!(target: "sensors", delivered = delivered, "reading_published");
                }
            }
        }
    }

    for reading in unsent {
        emit_now(reading);
    }
    while let Ok(reading) = intake.try_recv() {
        if let Some(ready) = coalescer.offer(reading, Instant::now()) {
            emit_now(ready);
        }
    }
    for reading in coalescer.drain_all() {
        emit_now(reading);
    }
}

async fn run_pull_feed(
    feed: Arc<dyn PullFeed>,
    period: Duration,
    call_timeout: Duration,
    intake: mpsc::Sender<SensorReading>,
    cancel: CancellationToken,
) {
    let source_id = feed.source_id().to_string();
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = pull_once(feed.as_ref(), call_timeout) => fetched,
        };

        match fetched.and_then(|sample| normalize_sample(&source_id, sample)) {
            Ok(reading) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = intake.send(reading) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: "sensors",
                    source_id = %source_id,
                    error_kind = err.kind.as_str(),
                    error = %err,
                    "pull_feed_failed"
                );
            }
        }
    }
    tracing::debug!(target: "sensors", source_id = %source_id, "pull_feed_stopped");
}

async fn pull_once(feed: &dyn PullFeed, call_timeout: Duration) -> Result<RawSample, HubError> {
    match timeout(call_timeout, AssertUnwindSafe(feed.fetch()).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(feed_unavailable("pull feed panicked during fetch")),
        Err(_) => Err(feed_unavailable(format!(
            "pull timed out after {}ms",
            call_timeout.as_millis()
        ))),
    }
}

async fn run_push_feed(
    feed: Arc<dyn PushFeed>,
    backoff: Backoff,
    intake: mpsc::Sender<SensorReading>,
    cancel: CancellationToken,
) {
    let source_id = feed.source_id().to_string();
    let mut attempt: u32 = 0;

    'feed: loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break 'feed,
            connected = feed.connect() => connected,
        };

        match connected {
            Ok(mut stream) => {
                tracing::info!(target: "sensors", source_id = %source_id, "push_feed_connected");
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break 'feed,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(sample)) => match normalize_sample(&source_id, sample) {
                            Ok(reading) => {
                                attempt = 0;
                                tokio::select! {
                                    _ = cancel.cancelled() => break 'feed,
                                    sent = intake.send(reading) => {
                                        if sent.is_err() {
                                            break 'feed;
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    target: "sensors",
                                    source_id = %source_id,
                                    error = %err,
                                    "push_sample_rejected"
                                );
                            }
                        },
                        Some(Err(err)) if err.is(HubErrorKind::FeedUnavailable) => {
                            tracing::warn!(
                                target: "sensors",
                                source_id = %source_id,
                                error = %err,
                                "push_feed_read_failed"
                            );
                            break;
                        }
                        Some(Err(err)) => {
                            tracing::warn!(
                                target: "sensors",
                                source_id = %source_id,
                                error_kind = err.kind.as_str(),
                                error = %err,
                                "push_sample_rejected"
                            );
                        }
                        None => break,
                    }
                }
                tracing::warn!(target: "sensors", source_id = %source_id, "push_feed_disconnected");
            }
            Err(err) => {
                tracing::warn!(
                    target: "sensors",
                    source_id = %source_id,
                    attempt = attempt,
                    error = %err,
                    "push_feed_connect_failed"
                );
            }
        }

        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        tracing::debug!(
            target: "sensors",
            source_id = %source_id,
            delay_ms = delay.as_millis() as u64,
            "push_feed_reconnect_scheduled"
        );
        tokio::select! {
            _ = cancel.cancelled() => break 'feed,
            _ = sleep(delay) => {}
        }
    }
    tracing::debug!(target: "sensors", source_id = %source_id, "push_feed_stopped");
}
