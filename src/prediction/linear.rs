use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{HubError, invalid_input, model_unavailable},
    prediction::ports::{Model, ModelLoader},
};

/// `value = weights · vector + bias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
}

impl LinearModel {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }

    fn check(&self) -> Result<(), HubError> {
        if self.weights.is_empty() {
            return Err(model_unavailable("linear model has no weights"));
        }
        if !self.bias.is_finite() || self.weights.iter().any(|weight| !weight.is_finite()) {
            return Err(model_unavailable("linear model contains non-finite parameters"));
        }
        Ok(())
    }
}

impl Model for LinearModel {
    fn infer(&self, vector: &[f64]) -> Result<f64, HubError> {
        if vector.len() != self.weights.len() {
            return Err(invalid_input(format!(
                "feature vector has {} values, model expects {}",
                vector.len(),
                self.weights.len()
            )));
        }

        let dot: f64 = self
            .weights
            .iter()
            .zip(vector)
            .map(|(weight, value)| weight * value)
            .sum();
        Ok(dot + self.bias)
    }
}

/// Reads a `{ "weights": [..], "bias": n }` file on every load.
#[derive(Debug, Clone)]
pub struct LinearModelLoader {
    path: PathBuf,
}

impl LinearModelLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ModelLoader for LinearModelLoader {
    async fn load(&self) -> Result<Arc<dyn Model>, HubError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            model_unavailable(format!(
                "failed to read model '{}': {err}",
                self.path.display()
            ))
        })?;
        let model: LinearModel = serde_json::from_str(&content).map_err(|err| {
            model_unavailable(format!(
                "failed to parse model '{}': {err}",
                self.path.display()
            ))
        })?;
        model.check()?;

        tracing::debug!(
            target: "prediction",
            path = %self.path.display(),
            dimensions = model.weights.len(),
            "linear_model_read"
        );
        Ok(Arc::new(model))
    }
}
