use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    error::{HubError, invalid_input},
    types::{AdjustmentResult, Fingerprint, SensorReading, SourceId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Reading,
    PredictionMade,
    Adjustment,
    PegChanged,
    TrainingTriggered,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Reading,
        Topic::PredictionMade,
        Topic::Adjustment,
        Topic::PegChanged,
        Topic::TrainingTriggered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Reading => "reading",
            Topic::PredictionMade => "prediction-made",
            Topic::Adjustment => "adjustment",
            Topic::PegChanged => "peg-changed",
            Topic::TrainingTriggered => "training-triggered",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = HubError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == raw)
            .ok_or_else(|| invalid_input(format!("unknown topic '{raw}'")))
    }
}

/// Payload of a "peg-changed" event, read by downstream ledger consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PegChange {
    pub old_value: f64,
    pub new_value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingTriggered {
    pub source_id: SourceId,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "kebab-case")]
pub enum HubEvent {
    Reading(SensorReading),
    /// Advisory only: insight consumers must not treat this as a control signal.
    PredictionMade(AdjustmentResult),
    Adjustment(AdjustmentResult),
    PegChanged(PegChange),
    TrainingTriggered(TrainingTriggered),
}

impl HubEvent {
    pub fn topic(&self) -> Topic {
        match self {
            HubEvent::Reading(_) => Topic::Reading,
            HubEvent::PredictionMade(_) => Topic::PredictionMade,
            HubEvent::Adjustment(_) => Topic::Adjustment,
            HubEvent::PegChanged(_) => Topic::PegChanged,
            HubEvent::TrainingTriggered(_) => Topic::TrainingTriggered,
        }
    }
}
