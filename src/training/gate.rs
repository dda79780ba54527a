use serde::{Deserialize, Serialize};

use crate::{config::GateMode, types::SensorReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOp {
    #[default]
    Above,
    AtLeast,
    Below,
    AtMost,
}

impl GateOp {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            GateOp::Above => value > threshold,
            GateOp::AtLeast => value >= threshold,
            GateOp::Below => value < threshold,
            GateOp::AtMost => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRule {
    pub field: String,
    #[serde(default)]
    pub op: GateOp,
    pub threshold: f64,
    /// Restricts the rule to readings from one source.
    #[serde(default)]
    pub source_id: Option<String>,
}

impl GateRule {
    pub fn above(field: &str, threshold: f64) -> Self {
        Self {
            field: field.to_string(),
            op: GateOp::Above,
            threshold,
            source_id: None,
        }
    }

    pub fn matches(&self, reading: &SensorReading) -> bool {
        if let Some(source_id) = &self.source_id
            && *source_id != reading.source_id
        {
            return false;
        }
        reading
            .field(&self.field)
            .is_some_and(|value| self.op.holds(value, self.threshold))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatePredicate {
    mode: GateMode,
    rules: Vec<GateRule>,
}

impl GatePredicate {
    pub fn new(mode: GateMode, rules: Vec<GateRule>) -> Self {
        Self { mode, rules }
    }

    /// An empty rule set never fires.
    pub fn evaluate(&self, reading: &SensorReading) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        match self.mode {
            GateMode::Any => self.rules.iter().any(|rule| rule.matches(reading)),
            GateMode::All => self.rules.iter().all(|rule| rule.matches(reading)),
        }
    }
}
