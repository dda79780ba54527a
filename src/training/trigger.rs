use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::{
    sync::watch,
    time::{Instant, timeout, timeout_at},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    bus::{EventBus, HubEvent, TrainingTriggered},
    config::TrainingConfig,
    error::{HubError, internal_error, invalid_input},
    secure_store::{SecretKey, SecureStore},
    training::{gate::GatePredicate, ports::ContentStore},
    types::{PegState, SensorReading, SourceId, TrainingContribution},
};

struct TriggerInner {
    predicate: GatePredicate,
    store: Arc<dyn ContentStore>,
    store_timeout: Duration,
    bus: EventBus,
    peg: watch::Receiver<PegState>,
    cipher: SecureStore,
    sealing_key: Option<SecretKey>,
    tasks: TaskTracker,
    abort: CancellationToken,
    stored: AtomicU64,
    dropped: AtomicU64,
    last: Mutex<Option<TrainingContribution>>,
}

/// Threshold-gated, best-effort hand-off of readings to a content store.
///
/// Every store call runs on its own tracked task bounded by a timeout. A
/// failed or timed-out call drops the contribution; there is no retry.
#[derive(Clone)]
pub struct TrainingTrigger {
    inner: Arc<TriggerInner>,
}

impl TrainingTrigger {
    pub fn new(
        config: &TrainingConfig,
        store: Arc<dyn ContentStore>,
        bus: EventBus,
        peg: watch::Receiver<PegState>,
        sealing_key: Option<SecretKey>,
    ) -> Result<Self, HubError> {
        let sealing_key = if config.encrypt_payloads {
            Some(sealing_key.ok_or_else(|| {
                invalid_input("training.encrypt_payloads is set but no secret key is available")
            })?)
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(TriggerInner {
                predicate: GatePredicate::new(config.mode, config.rules.clone()),
                store,
                store_timeout: Duration::from_millis(config.store_timeout_ms.max(1)),
                bus,
                peg,
                cipher: SecureStore::new(),
                sealing_key,
                tasks: TaskTracker::new(),
                abort: CancellationToken::new(),
                stored: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                last: Mutex::new(None),
            }),
        })
    }

    /// Evaluates the gate and, when it holds, starts a store call. Returns
    /// whether a contribution was dispatched.
    pub fn on_reading(&self, reading: &SensorReading) -> bool {
        let inner = &self.inner;
        if !inner.predicate.evaluate(reading) {
            return false;
        }
        if inner.tasks.is_closed() {
            tracing::debug!(
                target: "training",
                source_id = %reading.source_id,
                "training_trigger_closed_contribution_dropped"
            );
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let payload = json!({
            "contribution_id": Uuid::now_v7(),
            "reading": reading,
            "peg_value": inner.peg.borrow().current_value,
        });
        let bytes = match inner.encode(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "training", error = %err, "training_payload_encode_failed");
                return false;
            }
        };

        tracing::debug!(
            target: "training",
            source_id = %reading.source_id,
            bytes = bytes.len(),
            "training_gate_fired"
        );
        let task_inner = Arc::clone(inner);
        let source_id = reading.source_id.clone();
        inner.tasks.spawn(async move {
            task_inner.store_contribution(source_id, payload, bytes).await;
        });
        true
    }

    pub fn stored_count(&self) -> u64 {
        self.inner.stored.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn last_contribution(&self) -> Option<TrainingContribution> {
        self.inner.last.lock().expect("lock poisoned").clone()
    }

    /// Stops accepting contributions and hands back a drain over the store
    /// calls still running.
    pub fn close(&self) -> TrainingDrain {
        self.inner.tasks.close();
        TrainingDrain {
            tasks: self.inner.tasks.clone(),
            abort: self.inner.abort.clone(),
        }
    }
}

impl TriggerInner {
    fn encode(&self, payload: &Value) -> Result<Vec<u8>, HubError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|err| internal_error(format!("failed to encode contribution: {err}")))?;
        match &self.sealing_key {
            Some(key) => Ok(self.cipher.seal(&bytes, key)?.into_bytes()),
            None => Ok(bytes),
        }
    }

    async fn store_contribution(&self, source_id: SourceId, payload: Value, bytes: Vec<u8>) {
        let call = timeout(
            self.store_timeout,
            AssertUnwindSafe(self.store.store(bytes)).catch_unwind(),
        );
        let outcome = tokio::select! {
            _ = self.abort.cancelled() => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "training", source_id = %source_id, "training_store_aborted");
                return;
            }
            outcome = call => outcome,
        };

        let failure = match outcome {
            Ok(Ok(Ok(fingerprint))) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                *self.last.lock().expect("lock poisoned") = Some(TrainingContribution {
                    payload,
                    fingerprint: fingerprint.clone(),
                });
                tracing::info!(
                    target: "training",
                    source_id = %source_id,
                    fingerprint = %fingerprint,
                    "training_contribution_stored"
                );
                self.bus
                    .publish(HubEvent::TrainingTriggered(TrainingTriggered {
                        source_id,
                        fingerprint,
                    }));
                return;
            }
            Ok(Ok(Err(err))) => err.to_string(),
            Ok(Err(_)) => "content store panicked".to_string(),
            Err(_) => format!(
                "content store timed out after {}ms",
                self.store_timeout.as_millis()
            ),
        };

        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "training",
            source_id = %source_id,
            error = %failure,
            "training_store_failed"
        );
    }
}

/// Outstanding store calls after [`TrainingTrigger::close`].
pub struct TrainingDrain {
    tasks: TaskTracker,
    abort: CancellationToken,
}

impl TrainingDrain {
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for running store calls until `deadline`, then cancels the rest.
    /// Returns how many were cancelled.
    pub async fn wait_until(self, deadline: Instant) -> usize {
        if timeout_at(deadline, self.tasks.wait()).await.is_ok() {
            return 0;
        }

        let stragglers = self.tasks.len();
        self.abort.cancel();
        self.tasks.wait().await;
        tracing::warn!(target: "training", aborted = stragglers, "training_stores_aborted_after_grace");
        stragglers
    }
}
