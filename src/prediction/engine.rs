use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use time::OffsetDateTime;
use tokio::time::{Instant, sleep, timeout};

use crate::{
    bus::{EventBus, HubEvent},
    config::{ModelLoadPolicy, PredictionConfig},
    error::{HubError, model_unavailable},
    prediction::ports::{Model, ModelLoader},
    reliability::Backoff,
    types::{AdjustmentResult, FeatureVector},
};

type LoadResult = Result<Arc<dyn Model>, HubError>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

enum ModelSlot {
    Empty,
    Loading { generation: u64, load: LoadFuture },
    Ready { generation: u64, model: Arc<dyn Model> },
}

struct EngineState {
    slot: ModelSlot,
    generation: u64,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct LoadSettings {
    policy: ModelLoadPolicy,
    max_attempts: u32,
    backoff: Backoff,
    attempt_timeout: Duration,
    cooldown: Duration,
}

struct EngineInner {
    loader: Arc<dyn ModelLoader>,
    settings: LoadSettings,
    bus: EventBus,
    state: Mutex<EngineState>,
    load_attempts: AtomicU64,
}

/// Turns feature vectors into adjustments with a lazily loaded model.
///
/// At most one load is in flight; concurrent callers await the same shared
/// load. A failed load leaves the slot empty so the next call retries, unless
/// `max_attempts` consecutive failures have opened the cooldown.
#[derive(Clone)]
pub struct PredictionEngine {
    inner: Arc<EngineInner>,
}

impl PredictionEngine {
    pub fn new(loader: Arc<dyn ModelLoader>, config: &PredictionConfig, bus: EventBus) -> Self {
        let settings = LoadSettings {
            policy: config.load_policy,
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::new(config.backoff_base_ms, config.backoff_max_ms),
            attempt_timeout: Duration::from_millis(config.load_timeout_ms.max(1)),
            cooldown: Duration::from_millis(config.cooldown_ms),
        };

        Self {
            inner: Arc::new(EngineInner {
                loader,
                settings,
                bus,
                state: Mutex::new(EngineState {
                    slot: ModelSlot::Empty,
                    generation: 0,
                    consecutive_failures: 0,
                    cooldown_until: None,
                }),
                load_attempts: AtomicU64::new(0),
            }),
        }
    }

    pub async fn predict(&self, vector: FeatureVector) -> Result<AdjustmentResult, HubError> {
        let (generation, model) = self.acquire().await?;
        let value = model.infer(vector.as_slice())?;

        if !value.is_finite() {
            self.inner.drop_model_if_current(generation);
            tracing::warn!(target: "prediction", generation = generation, "non_finite_prediction");
            return Err(model_unavailable(
                "model produced a non-finite adjustment; model invalidated",
            ));
        }

        let result = AdjustmentResult {
            value,
            inputs: vector,
            produced_at: OffsetDateTime::now_utc(),
        };
        self.inner
            .bus
            .publish(HubEvent::PredictionMade(result.clone()));
        tracing::debug!(target: "prediction", value = value, "prediction_made");
        Ok(result)
    }

    /// Loads the model now instead of on first use.
    pub async fn preload(&self) -> Result<(), HubError> {
        self.acquire().await.map(|_| ())
    }

    /// Drops the current model and failure history; the next call reloads.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        state.slot = ModelSlot::Empty;
        state.consecutive_failures = 0;
        state.cooldown_until = None;
        tracing::info!(target: "prediction", "model_invalidated");
    }

    pub fn is_loaded(&self) -> bool {
        matches!(
            self.inner.state.lock().expect("lock poisoned").slot,
            ModelSlot::Ready { .. }
        )
    }

    /// Number of times the loader has been invoked.
    pub fn load_attempts(&self) -> u64 {
        self.inner.load_attempts.load(Ordering::Relaxed)
    }

    async fn acquire(&self) -> Result<(u64, Arc<dyn Model>), HubError> {
        let settings = self.inner.settings;
        match settings.policy {
            ModelLoadPolicy::FailFast => self.acquire_once().await,
            ModelLoadPolicy::WaitAndRetry => {
                let mut attempt = 0;
                loop {
                    match self.acquire_once().await {
                        Ok(ready) => return Ok(ready),
                        Err(err) if self.inner.cooling_down() => return Err(err),
                        Err(err) => {
                            attempt += 1;
                            if attempt >= settings.max_attempts {
                                return Err(model_unavailable(format!(
                                    "model unavailable after {attempt} attempts: {err}"
                                )));
                            }
                            let delay = settings.backoff.delay(attempt - 1);
                            tracing::debug!(
                                target: "prediction",
                                attempt = attempt,
                                delay_ms = delay.as_millis() as u64,
                                "model_load_retry_scheduled"
                            );
                            sleep(delay).await;
                        }
                    }
                }
            }
        }
    }

    async fn acquire_once(&self) -> Result<(u64, Arc<dyn Model>), HubError> {
        let (generation, load) = {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            match &state.slot {
                ModelSlot::Ready { generation, model } => {
                    return Ok((*generation, Arc::clone(model)));
                }
                ModelSlot::Loading { generation, load } => (*generation, load.clone()),
                ModelSlot::Empty => {
                    if let Some(until) = state.cooldown_until {
                        if Instant::now() < until {
                            return Err(model_unavailable(format!(
                                "model loader is cooling down after {} consecutive failures",
                                state.consecutive_failures
                            )));
                        }
                        state.cooldown_until = None;
                    }

                    state.generation += 1;
                    let generation = state.generation;
                    let load = start_load(Arc::downgrade(&self.inner), generation);
                    state.slot = ModelSlot::Loading {
                        generation,
                        load: load.clone(),
                    };
                    (generation, load)
                }
            }
        };

        load.await.map(|model| (generation, model))
    }
}

impl EngineInner {
    fn cooling_down(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state
            .cooldown_until
            .is_some_and(|until| Instant::now() < until)
    }

    fn drop_model_if_current(&self, generation: u64) {
        let mut state = self.state.lock().expect("lock poisoned");
        if matches!(state.slot, ModelSlot::Ready { generation: current, .. } if current == generation)
        {
            state.slot = ModelSlot::Empty;
        }
    }

    fn finish_load(&self, generation: u64, outcome: &LoadResult) {
        let mut state = self.state.lock().expect("lock poisoned");
        let current = matches!(
            state.slot,
            ModelSlot::Loading { generation: loading, .. } if loading == generation
        );
        if !current {
            tracing::debug!(target: "prediction", generation = generation, "stale_model_load_ignored");
            return;
        }

        match outcome {
            Ok(model) => {
                state.slot = ModelSlot::Ready {
                    generation,
                    model: Arc::clone(model),
                };
                state.consecutive_failures = 0;
                state.cooldown_until = None;
                tracing::info!(target: "prediction", generation = generation, "model_loaded");
            }
            Err(err) => {
                state.slot = ModelSlot::Empty;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                tracing::warn!(
                    target: "prediction",
                    generation = generation,
                    consecutive_failures = state.consecutive_failures,
                    error = %err,
                    "model_load_failed"
                );
                if state.consecutive_failures >= self.settings.max_attempts {
                    state.cooldown_until = Some(Instant::now() + self.settings.cooldown);
                    tracing::warn!(
                        target: "prediction",
                        cooldown_ms = self.settings.cooldown.as_millis() as u64,
                        "model_load_cooldown_started"
                    );
                }
            }
        }
    }
}

fn start_load(inner: Weak<EngineInner>, generation: u64) -> LoadFuture {
    async move {
        let Some(engine) = inner.upgrade() else {
            return Err(model_unavailable("prediction engine was dropped"));
        };
        engine.load_attempts.fetch_add(1, Ordering::Relaxed);
        let loader = Arc::clone(&engine.loader);
        let attempt_timeout = engine.settings.attempt_timeout;
        drop(engine);

        let outcome =
            match timeout(attempt_timeout, AssertUnwindSafe(loader.load()).catch_unwind()).await {
                Ok(Ok(Ok(model))) => Ok(model),
                Ok(Ok(Err(err))) => Err(model_unavailable(format!("model load failed: {err}"))),
                Ok(Err(_)) => Err(model_unavailable("model loader panicked")),
                Err(_) => Err(model_unavailable(format!(
                    "model load timed out after {}ms",
                    attempt_timeout.as_millis()
                ))),
            };

        if let Some(engine) = inner.upgrade() {
            engine.finish_load(generation, &outcome);
        }
        outcome
    }
    .boxed()
    .shared()
}
