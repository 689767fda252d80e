//! Run report assembled at the end of a provisioning run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::device::DeviceRecord;
use crate::outcome::{ProvisionOutcome, ValidationOutcome};

/// Timestamp format used in reports (UTC, second precision)
pub const REPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Key fragments that mark a configuration field as secret
const SECRET_MARKERS: [&str; 3] = ["password", "secret", "token"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub devices_found: usize,
    pub provisioning_count: usize,
    pub successful_validations: usize,
}

/// Aggregate result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub report_timestamp: String,
    pub summary: ReportSummary,
    /// Configuration of the run with secrets removed
    pub config_used: Value,
    pub discovered_devices: Vec<DeviceRecord>,
    /// Keyed by device address, or by serial port name for serial provisioning
    pub provisioning_logs: BTreeMap<String, ProvisionOutcome>,
    pub mqtt_validation: BTreeMap<String, ValidationOutcome>,
    /// Devices that could not be validated, with the reason
    #[serde(default)]
    pub validation_skips: BTreeMap<String, String>,
}

/// Accumulated per-run state that becomes a [`RunReport`]
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub devices: Vec<DeviceRecord>,
    pub provisioning: BTreeMap<String, ProvisionOutcome>,
    pub validation: BTreeMap<String, ValidationOutcome>,
    pub skips: BTreeMap<String, String>,
}

impl RunReport {
    /// Build the report, stamping it with the current time
    pub fn build(config: &Value, record: RunRecord) -> Self {
        Self::build_at(Utc::now(), config, record)
    }

    pub fn build_at(timestamp: DateTime<Utc>, config: &Value, record: RunRecord) -> Self {
        let summary = ReportSummary {
            devices_found: record.devices.len(),
            provisioning_count: record.provisioning.len(),
            successful_validations: record.validation.values().filter(|v| v.ok).count(),
        };

        Self {
            report_timestamp: timestamp.format(REPORT_TIMESTAMP_FORMAT).to_string(),
            summary,
            config_used: sanitize_config(config),
            discovered_devices: record.devices,
            provisioning_logs: record
                .provisioning
                .into_iter()
                .map(|(device, outcome)| (device, outcome.redacted()))
                .collect(),
            mqtt_validation: record.validation,
            validation_skips: record.skips,
        }
    }
}

/// Whether a configuration key names a secret
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Copy of a configuration value with every secret field removed, at any depth
pub fn sanitize_config(config: &Value) -> Value {
    match config {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_secret_key(key))
                .map(|(key, value)| (key.clone(), sanitize_config(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_config).collect()),
        other => other.clone(),
    }
}
