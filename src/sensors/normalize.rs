use std::collections::BTreeMap;

use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    error::{HubError, invalid_input},
    sensors::ports::RawSample,
    types::SensorReading,
};

/// Turns a raw sample into a canonical reading.
///
/// Numbers and numeric strings are kept; everything else, and any
/// non-finite value, is dropped. A sample with nothing left is malformed.
pub fn normalize_sample(source_id: &str, sample: RawSample) -> Result<SensorReading, HubError> {
    if source_id.trim().is_empty() {
        return Err(invalid_input("sample has an empty source_id"));
    }

    let mut fields = BTreeMap::new();
    for (name, value) in sample.fields {
        let number = match &value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        match number {
            Some(number) if number.is_finite() => {
                fields.insert(name, number);
            }
            _ => {
                tracing::trace!(
                    target: "sensors",
                    source_id = source_id,
                    field = %name,
                    "non_numeric_field_dropped"
                );
            }
        }
    }

    if fields.is_empty() {
        return Err(invalid_input(format!(
            "sample from '{source_id}' has no numeric fields"
        )));
    }

    Ok(SensorReading::new(
        source_id,
        fields,
        sample.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
    ))
}

/// Reads a feed payload: either `{fields, timestamp?}` or a flat object of
/// fields.
pub fn sample_from_json(value: Value) -> Result<RawSample, HubError> {
    match value {
        Value::Object(object) if matches!(object.get("fields"), Some(Value::Object(_))) => {
            serde_json::from_value(Value::Object(object))
                .map_err(|err| invalid_input(format!("malformed sample envelope: {err}")))
        }
        Value::Object(object) => Ok(RawSample::new(object)),
        other => Err(invalid_input(format!(
            "sample must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
