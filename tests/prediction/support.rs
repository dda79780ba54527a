use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use peghub::{
    config::{ModelLoadPolicy, PredictionConfig},
    error::{HubError, model_unavailable},
    prediction::{LinearModel, Model, ModelLoader},
};

/// Loader double: fails the first `failures` calls, then hands out `model`.
pub struct ScriptedLoader {
    calls: AtomicUsize,
    failures: usize,
    delay: Duration,
    model: Arc<dyn Model>,
}

impl ScriptedLoader {
    pub fn succeeding(delay: Duration) -> Arc<Self> {
        Self::failing_first(0, delay)
    }

    pub fn failing_first(failures: usize, delay: Duration) -> Arc<Self> {
        Self::with_model(failures, delay, Arc::new(LinearModel::new(vec![1.0, 1.0], 0.0)))
    }

    pub fn with_model(failures: usize, delay: Duration, model: Arc<dyn Model>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures,
            delay,
            model,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load(&self) -> Result<Arc<dyn Model>, HubError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures {
            return Err(model_unavailable(format!("scripted failure #{}", call + 1)));
        }
        Ok(Arc::clone(&self.model))
    }
}

pub struct NanModel;

impl Model for NanModel {
    fn infer(&self, _vector: &[f64]) -> Result<f64, HubError> {
        Ok(f64::NAN)
    }
}

pub fn config(policy: ModelLoadPolicy, max_attempts: u32) -> PredictionConfig {
    PredictionConfig {
        load_policy: policy,
        max_attempts,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        load_timeout_ms: 2_000,
        cooldown_ms: 60_000,
        ..PredictionConfig::default()
    }
}
