//! Raw payload → ordered numeric feature vector.

use serde_json::{Map, Value};

use crate::error::{ServingError, ServingResult};
use crate::types::{TravelFrequency, FEATURE_TRAVEL_FREQUENCY};

/// Builds one value per entry of `feature_order`. Missing and null fields become 0,
/// unknown fields are ignored, and the categorical domain is checked even when the
/// categorical column is not part of the order.
pub fn normalize(payload: &Map<String, Value>, feature_order: &[String]) -> ServingResult<Vec<f64>> {
    let travel = encode_travel_frequency(payload.get(FEATURE_TRAVEL_FREQUENCY))?;

    feature_order
        .iter()
        .map(|feature| {
            if feature == FEATURE_TRAVEL_FREQUENCY {
                Ok(travel)
            } else {
                numeric_value(feature, payload.get(feature))
            }
        })
        .collect()
}

fn encode_travel_frequency(value: Option<&Value>) -> ServingResult<f64> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::String(raw)) => Ok(raw.parse::<TravelFrequency>()?.code()),
        Some(other) => Err(ServingError::invalid_category(
            FEATURE_TRAVEL_FREQUENCY,
            other.to_string(),
        )),
    }
}

fn numeric_value(feature: &str, value: Option<&Value>) -> ServingResult<f64> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(0.0),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(number) if number.is_finite() => Ok(number),
        _ => Err(ServingError::validation(format!(
            "{feature} must be numeric"
        ))),
    }
}
