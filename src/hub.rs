use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::{EventBus, HubEvent, Subscription, Topic},
    config::Config,
    error::{HubError, internal_error, invalid_input},
    pegging::PeggingController,
    prediction::{FeatureBuilder, ModelLoader, PredictionEngine},
    secure_store::{SealedStateFile, SecretKey},
    sensors::{Feed, RawSample, ReadingCache, SensorIngestor},
    training::{ContentStore, TrainingTrigger},
    types::{PegState, SensorReading, SourceId},
};

/// External collaborators injected at startup.
pub struct HubDependencies {
    pub model_loader: Arc<dyn ModelLoader>,
    pub content_store: Arc<dyn ContentStore>,
    pub feeds: Vec<Feed>,
    pub secret_key: Option<SecretKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubPhase {
    Idle,
    Predicting,
    Adjusting,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub model_loaded: bool,
    pub cached_readings: BTreeMap<SourceId, SensorReading>,
    pub last_peg: PegState,
    pub phase: HubPhase,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub feeds_stopped: bool,
    pub completed_handlers: usize,
    pub aborted_handlers: Vec<String>,
    pub aborted_stores: usize,
    /// Bus events dropped because a subscriber queue was full.
    pub shed_events: u64,
    pub peg_persisted: bool,
    pub final_peg: PegState,
}

/// `predicting` counts readings inside the predictor; `adjusting` counts
/// adjustments published but not yet applied by the peg controller.
#[derive(Default)]
struct PhaseCounters {
    predicting: AtomicUsize,
    adjusting: AtomicUsize,
}

impl PhaseCounters {
    fn adjustment_pending(&self) {
        self.adjusting.fetch_add(1, Ordering::AcqRel);
    }

    fn adjustment_settled(&self) {
        let _ = self
            .adjusting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            });
    }

    fn current(&self) -> HubPhase {
        if self.adjusting.load(Ordering::Acquire) > 0 {
            HubPhase::Adjusting
        } else if self.predicting.load(Ordering::Acquire) > 0 {
            HubPhase::Predicting
        } else {
            HubPhase::Idle
        }
    }
}

struct PhaseGuard<'a>(&'a AtomicUsize);

impl<'a> PhaseGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The assembled control hub.
///
/// Readings flow ingestor → "reading" → prediction → "adjustment" → peg
/// controller → "peg-changed"; the training gate listens on "reading" on its
/// own subscription.
pub struct Hub {
    config: Config,
    bus: EventBus,
    engine: PredictionEngine,
    controller: Arc<PeggingController>,
    ingestor: SensorIngestor,
    trigger: TrainingTrigger,
    sealed_peg: Option<Arc<SealedStateFile>>,
    phases: Arc<PhaseCounters>,
    shutdown: CancellationToken,
    subscriptions: Vec<Subscription>,
}

impl Hub {
    /// Builds and wires every component. Must be called inside a tokio
    /// runtime.
    pub fn start(config: Config, deps: HubDependencies) -> Result<Self, HubError> {
        let bus = EventBus::with_capacity(config.bus.queue_capacity);
        let controller = Arc::new(PeggingController::new(&config.pegging, bus.clone()));

        let sealed_peg = if config.secure_store.persist_peg {
            let key = deps.secret_key.clone().ok_or_else(|| {
                invalid_input("secure_store.persist_peg is set but no secret key is available")
            })?;
            let file = SealedStateFile::new(config.secure_store.state_path.clone(), key);
            if let Some(persisted) = file.load::<PegState>()? {
                controller.restore(persisted);
            }
            Some(Arc::new(file))
        } else {
            None
        };

        let engine = PredictionEngine::new(deps.model_loader, &config.prediction, bus.clone());
        let trigger = TrainingTrigger::new(
            &config.training,
            deps.content_store,
            bus.clone(),
            controller.subscribe_state(),
            deps.secret_key,
        )?;

        let shutdown = CancellationToken::new();
        let ingestor =
            SensorIngestor::start(&config.sensors, bus.clone(), deps.feeds, shutdown.clone());
        let features = FeatureBuilder::new(config.prediction.features.clone(), ingestor.cache());
        let phases = Arc::new(PhaseCounters::default());

        let mut subscriptions = Vec::new();
        subscriptions.push(subscribe_predictor(
            &bus,
            engine.clone(),
            features,
            Arc::clone(&phases),
        )?);
        subscriptions.push(subscribe_controller(
            &bus,
            Arc::clone(&controller),
            Arc::clone(&phases),
        )?);
        if config.training.enabled {
            let gate = trigger.clone();
            subscriptions.push(bus.subscribe_fn(
                Topic::Reading,
                "training-gate",
                move |event| {
                    if let HubEvent::Reading(reading) = &event {
                        gate.on_reading(reading);
                    }
                    async { Ok(()) }
                },
            )?);
        }
        if let Some(file) = &sealed_peg {
            subscriptions.push(subscribe_persistence(
                &bus,
                Arc::clone(&controller),
                Arc::clone(file),
            )?);
        }

        tracing::info!(
            target: "hub",
            feeds = ingestor.feed_count(),
            subscriptions = subscriptions.len(),
            peg = controller.current_value(),
            persist_peg = sealed_peg.is_some(),
            "hub_started"
        );

        Ok(Self {
            config,
            bus,
            engine,
            controller,
            ingestor,
            trigger,
            sealed_peg,
            phases,
            shutdown,
            subscriptions,
        })
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            model_loaded: self.engine.is_loaded(),
            cached_readings: self.ingestor.cache().snapshot(),
            last_peg: self.controller.snapshot(),
            phase: self.phases.current(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &PredictionEngine {
        &self.engine
    }

    pub fn controller(&self) -> &PeggingController {
        &self.controller
    }

    pub fn trigger(&self) -> &TrainingTrigger {
        &self.trigger
    }

    pub fn cache(&self) -> Arc<ReadingCache> {
        self.ingestor.cache()
    }

    pub async fn submit_reading(&self, reading: SensorReading) -> Result<(), HubError> {
        self.ingestor.submit_reading(reading).await
    }

    pub async fn submit_sample(&self, source_id: &str, sample: RawSample) -> Result<(), HubError> {
        self.ingestor.submit(source_id, sample).await
    }

    /// Stops feeds, lets queued work finish within the grace period, cancels
    /// whatever is left, and seals the final peg when persistence is on.
    pub async fn shutdown(self) -> ShutdownReport {
        let grace = Duration::from_millis(self.config.shutdown.grace_period_ms);
        let deadline = Instant::now() + grace;
        tracing::info!(target: "hub", grace_ms = self.config.shutdown.grace_period_ms, "hub_shutdown_started");

        self.shutdown.cancel();
        let feeds_stopped = self
            .ingestor
            .stop(deadline.saturating_duration_since(Instant::now()))
            .await;

        let readers = self.bus.drain_topic(Topic::Reading).wait_until(deadline).await;
        let aborted_stores = self.trigger.close().wait_until(deadline).await;
        let rest = self.bus.close().wait_until(deadline).await;
        drop(self.subscriptions);

        let final_peg = self.controller.snapshot();
        let peg_persisted = match &self.sealed_peg {
            Some(file) => match file.save(&final_peg) {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(target: "hub", error = %err, "final_peg_persist_failed");
                    false
                }
            },
            None => false,
        };

        let mut aborted_handlers = readers.aborted;
        aborted_handlers.extend(rest.aborted);
        let report = ShutdownReport {
            feeds_stopped,
            completed_handlers: readers.completed + rest.completed,
            aborted_handlers,
            aborted_stores,
            shed_events: self.bus.shed_count(),
            peg_persisted,
            final_peg,
        };
        tracing::info!(
            target: "hub",
            feeds_stopped = report.feeds_stopped,
            completed_handlers = report.completed_handlers,
            aborted_handlers = report.aborted_handlers.len(),
            aborted_stores = report.aborted_stores,
            shed_events = report.shed_events,
            peg_persisted = report.peg_persisted,
            final_peg = report.final_peg.current_value,
            "hub_shutdown_completed"
        );
        report
    }
}

fn subscribe_predictor(
    bus: &EventBus,
    engine: PredictionEngine,
    features: FeatureBuilder,
    phases: Arc<PhaseCounters>,
) -> Result<Subscription, HubError> {
    let publisher = bus.clone();
    bus.subscribe_fn(Topic::Reading, "predictor", move |event| {
        let engine = engine.clone();
        let features = features.clone();
        let phases = Arc::clone(&phases);
        let publisher = publisher.clone();
        async move {
            let HubEvent::Reading(reading) = event else {
                return Ok(());
            };
            let result = {
                let _phase = PhaseGuard::enter(&phases.predicting);
                engine.predict(features.build(&reading)).await?
            };
            phases.adjustment_pending();
            if publisher.publish_wait(HubEvent::Adjustment(result)).await == 0 {
                phases.adjustment_settled();
            }
            Ok(())
        }
    })
}

fn subscribe_controller(
    bus: &EventBus,
    controller: Arc<PeggingController>,
    phases: Arc<PhaseCounters>,
) -> Result<Subscription, HubError> {
    bus.subscribe_fn(Topic::Adjustment, "peg-controller", move |event| {
        if let HubEvent::Adjustment(result) = &event {
            controller.on_adjustment(result);
            phases.adjustment_settled();
        }
        async { Ok(()) }
    })
}

fn subscribe_persistence(
    bus: &EventBus,
    controller: Arc<PeggingController>,
    file: Arc<SealedStateFile>,
) -> Result<Subscription, HubError> {
    bus.subscribe_fn(Topic::PegChanged, "peg-persistence", move |_event| {
        let state = controller.snapshot();
        let file = Arc::clone(&file);
        async move {
            tokio::task::spawn_blocking(move || file.save(&state))
                .await
                .map_err(|err| internal_error(format!("peg persistence task failed: {err}")))?
        }
    })
}
