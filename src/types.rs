use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type SourceId = String;
pub type Fingerprint = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub source_id: SourceId,
    pub fields: BTreeMap<String, f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl SensorReading {
    pub fn new(
        source_id: impl Into<SourceId>,
        fields: BTreeMap<String, f64>,
        observed_at: OffsetDateTime,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            fields,
            observed_at,
        }
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentResult {
    pub value: f64,
    pub inputs: FeatureVector,
    #[serde(with = "time::serde::rfc3339")]
    pub produced_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PegState {
    pub current_value: f64,
    pub last_adjustment: Option<AdjustmentResult>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PegState {
    pub fn initial(current_value: f64) -> Self {
        Self {
            current_value,
            last_adjustment: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingContribution {
    pub payload: serde_json::Value,
    pub fingerprint: Fingerprint,
}

pub fn unix_seconds(at: OffsetDateTime) -> f64 {
    at.unix_timestamp_nanos() as f64 / 1_000_000_000.0
}
