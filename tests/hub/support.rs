use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use peghub::{
    Hub, HubDependencies, HubPhase,
    bus::{HubEvent, PegChange, Topic, TrainingTriggered},
    config::{Config, FeatureSource},
    error::{HubError, model_unavailable},
    prediction::{LinearModel, Model, ModelLoader},
    secure_store::SecretKey,
    training::{ContentStore, FileContentStore},
    types::{Fingerprint, SensorReading},
};

pub const INITIAL_PEG: f64 = 3_141_590_000_000.0;

/// One feature, `energy_price`, weighted 1e9.
pub struct EnergyModelLoader {
    fail: bool,
    calls: AtomicUsize,
}

impl EnergyModelLoader {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for EnergyModelLoader {
    async fn load(&self) -> Result<Arc<dyn Model>, HubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(model_unavailable("model registry offline"));
        }
        Ok(Arc::new(LinearModel::new(vec![1.0e9], 0.0)))
    }
}

/// Never finishes loading, so the predictor stalls on its first reading.
pub struct HangingModelLoader;

#[async_trait]
impl ModelLoader for HangingModelLoader {
    async fn load(&self) -> Result<Arc<dyn Model>, HubError> {
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub payloads: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn store(&self, bytes: Vec<u8>) -> Result<Fingerprint, HubError> {
        let fingerprint = FileContentStore::fingerprint_of(&bytes);
        self.payloads.lock().expect("lock poisoned").push(bytes);
        Ok(fingerprint)
    }
}

pub fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("peghub-{label}-{}", Uuid::now_v7().simple()))
}

pub fn hub_config() -> Config {
    let mut config = Config::default();
    config.prediction.features = vec![FeatureSource::field("energy_price")];
    config.sensors.dedup_window_ms = 0;
    config.shutdown.grace_period_ms = 1_000;
    config
}

pub fn dependencies(
    loader: Arc<dyn ModelLoader>,
    store: Arc<dyn ContentStore>,
    secret_key: Option<SecretKey>,
) -> HubDependencies {
    HubDependencies {
        model_loader: loader,
        content_store: store,
        feeds: Vec::new(),
        secret_key,
    }
}

pub fn energy_reading(value: f64) -> SensorReading {
    SensorReading::new(
        "iot",
        BTreeMap::from([("energy_price".to_string(), value)]),
        OffsetDateTime::now_utc(),
    )
}

pub fn peg_changes(hub: &Hub) -> mpsc::UnboundedReceiver<PegChange> {
    let (tx, rx) = mpsc::unbounded_channel();
    hub.bus()
        .subscribe_fn(Topic::PegChanged, "test-peg-ledger", move |event| {
            if let HubEvent::PegChanged(change) = event {
                let _ = tx.send(change);
            }
            async { Ok(()) }
        })
        .expect("subscribe should succeed");
    rx
}

pub fn training_notices(hub: &Hub) -> mpsc::UnboundedReceiver<TrainingTriggered> {
    let (tx, rx) = mpsc::unbounded_channel();
    hub.bus()
        .subscribe_fn(Topic::TrainingTriggered, "test-training", move |event| {
            if let HubEvent::TrainingTriggered(notice) = event {
                let _ = tx.send(notice);
            }
            async { Ok(()) }
        })
        .expect("subscribe should succeed");
    rx
}

pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("event should arrive in time")
        .expect("collector channel should stay open")
}

pub async fn wait_for_idle(hub: &Hub) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while hub.status().phase != HubPhase::Idle {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("hub should settle");
}
