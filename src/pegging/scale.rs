use serde::{Deserialize, Serialize};

use crate::error::{HubError, invalid_input};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalePoint {
    pub input: f64,
    pub output: f64,
}

/// Maps a raw model adjustment to a peg delta.
///
/// `piecewise` interpolates linearly between breakpoints and holds the end
/// values outside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScaleFunction {
    Linear { factor: f64 },
    Piecewise { points: Vec<ScalePoint> },
}

impl Default for ScaleFunction {
    fn default() -> Self {
        ScaleFunction::Linear { factor: 1.0 }
    }
}

impl ScaleFunction {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            ScaleFunction::Linear { factor } => value * factor,
            ScaleFunction::Piecewise { points } => interpolate(points, value),
        }
    }

    pub fn validate(&self) -> Result<(), HubError> {
        match self {
            ScaleFunction::Linear { factor } => {
                if !factor.is_finite() {
                    return Err(invalid_input("linear scale factor must be finite"));
                }
            }
            ScaleFunction::Piecewise { points } => {
                if points.is_empty() {
                    return Err(invalid_input("piecewise scale needs at least one point"));
                }
                if points
                    .iter()
                    .any(|point| !point.input.is_finite() || !point.output.is_finite())
                {
                    return Err(invalid_input("piecewise scale points must be finite"));
                }
                if points.windows(2).any(|pair| pair[0].input >= pair[1].input) {
                    return Err(invalid_input(
                        "piecewise scale inputs must be strictly increasing",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn interpolate(points: &[ScalePoint], value: f64) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };
    if value <= first.input {
        return first.output;
    }
    if value >= last.input {
        return last.output;
    }

    for pair in points.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if value <= right.input {
            let span = right.input - left.input;
            let ratio = (value - left.input) / span;
            return left.output + ratio * (right.output - left.output);
        }
    }
    last.output
}
