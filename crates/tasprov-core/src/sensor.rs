//! Physical plausibility checks for telemetry sensor blocks
//!
//! A telemetry payload is a JSON object keyed by sensor-block name, e.g.
//! `{"Time": "...", "CustomBME280": {"Temperature": 22.5, "Humidity": 45.0, "Pressure": 1013.0}}`.
//! The ranges below are generous indoor/outdoor bounds meant to catch wiring or
//! firmware faults, not to verify calibration.

use serde_json::{Map, Value};

/// A measured quantity with its inclusive plausible range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

impl Quantity {
    pub const fn new(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, min, max }
    }

    /// Whether a value lies inside the inclusive range
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

pub const TEMPERATURE: Quantity = Quantity::new("Temperature", 10.0, 85.0);
pub const HUMIDITY: Quantity = Quantity::new("Humidity", 0.0, 100.0);
pub const PRESSURE: Quantity = Quantity::new("Pressure", 700.0, 1150.0);

/// Quantities every sensor block must report
pub const QUANTITIES: [Quantity; 3] = [TEMPERATURE, HUMIDITY, PRESSURE];

/// Validate the named sensor block of a telemetry payload.
///
/// Returns human-readable violations; an empty list means the block is valid.
pub fn validate_sensor_block(payload: &Value, sensor_name: &str) -> Vec<String> {
    let Some(block) = sensor_block(payload, sensor_name) else {
        return vec![format!("Sensor '{}' not found in JSON", sensor_name)];
    };

    let Some(fields) = block.as_object() else {
        return vec![format!("Sensor '{}' is not a JSON object", sensor_name)];
    };

    let mut errors: Vec<String> = QUANTITIES
        .iter()
        .filter_map(|quantity| check_quantity(fields, quantity))
        .collect();

    if let Some(warning) = suspicious_zero_reading(fields) {
        errors.push(warning);
    }

    errors
}

/// Look up a sensor block in a payload
pub fn sensor_block<'a>(payload: &'a Value, sensor_name: &str) -> Option<&'a Value> {
    payload.as_object()?.get(sensor_name)
}

/// Temperature and humidity both reading exactly zero almost always means the
/// sensor bus returned nothing, not a real measurement.
pub fn suspicious_zero_reading(fields: &Map<String, Value>) -> Option<String> {
    let is_zero = |name: &str| fields.get(name).and_then(Value::as_f64) == Some(0.0);

    if is_zero(TEMPERATURE.name) && is_zero(HUMIDITY.name) {
        Some(
            "Suspicious reading: Zero values might indicate sensor communication failure"
                .to_string(),
        )
    } else {
        None
    }
}

fn check_quantity(fields: &Map<String, Value>, quantity: &Quantity) -> Option<String> {
    let value = match fields.get(quantity.name) {
        None | Some(Value::Null) => {
            return Some(format!("Field {} is missing", quantity.name));
        }
        Some(value) => value,
    };

    let Some(number) = numeric_value(value) else {
        return Some(format!("Field {} is not a valid number", quantity.name));
    };

    if quantity.contains(number) {
        None
    } else {
        Some(format!(
            "Value {}={:?} out of range ({:?}..{:?})",
            quantity.name, number, quantity.min, quantity.max
        ))
    }
}

/// Firmware may report numbers as JSON numbers or as numeric strings
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
