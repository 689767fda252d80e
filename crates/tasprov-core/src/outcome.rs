//! Per-device results of provisioning and telemetry validation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::settings::{secret_values, REDACTED};

/// Transport used to push configuration to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionMethod {
    Http,
    Serial,
}

impl std::fmt::Display for ProvisionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Serial => f.write_str("serial"),
        }
    }
}

/// Raw device responses captured during provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvisionResponses {
    /// Serial: whatever the device emitted after each command
    PerCommand(BTreeMap<String, String>),
    /// HTTP: the single response to the backlog command
    Aggregate(Value),
}

impl Default for ProvisionResponses {
    fn default() -> Self {
        Self::PerCommand(BTreeMap::new())
    }
}

/// Result of one provisioning attempt against one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub ok: bool,
    pub method: ProvisionMethod,
    /// Commands issued up to the point of failure, in order
    pub commands_sent: Vec<String>,
    pub responses: ProvisionResponses,
    pub error: Option<String>,
}

impl ProvisionOutcome {
    pub fn succeeded(
        method: ProvisionMethod,
        commands_sent: Vec<String>,
        responses: ProvisionResponses,
    ) -> Self {
        Self {
            ok: true,
            method,
            commands_sent,
            responses,
            error: None,
        }
    }

    pub fn failed(
        method: ProvisionMethod,
        commands_sent: Vec<String>,
        responses: ProvisionResponses,
        error: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            method,
            commands_sent,
            responses,
            error: Some(error.into()),
        }
    }

    /// Copy with credential values masked in the commands and in any echo of them
    pub fn redacted(self) -> Self {
        let secrets: Vec<String> = self
            .commands_sent
            .iter()
            .flat_map(|command| secret_values(command))
            .map(str::to_string)
            .collect();
        if secrets.is_empty() {
            return self;
        }

        let mask = |text: &str| {
            secrets
                .iter()
                .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
        };

        let commands_sent = self.commands_sent.iter().map(|c| mask(c)).collect();
        let responses = match self.responses {
            ProvisionResponses::PerCommand(map) => ProvisionResponses::PerCommand(
                map.into_iter().map(|(k, v)| (mask(&k), mask(&v))).collect(),
            ),
            ProvisionResponses::Aggregate(value) => {
                ProvisionResponses::Aggregate(mask_strings(value, &mask))
            }
        };

        Self {
            commands_sent,
            responses,
            ..self
        }
    }
}

fn mask_strings(value: Value, mask: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(text) => Value::String(mask(&text)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| mask_strings(v, mask)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, mask_strings(v, mask)))
                .collect(),
        ),
        other => other,
    }
}

/// Error recorded when a validation window closes without any other finding
pub const NO_TELEMETRY_ERROR: &str = "No valid telemetry received";

/// Result of telemetry validation against one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    /// Accepted messages: 1 on success, 0 otherwise
    pub received_messages: u32,
    /// Topic that was subscribed
    pub topic: String,
    /// Deduplicated errors from every rejected sample
    pub errors: Vec<String>,
    /// Sensor block of the accepted sample
    pub first_payload: Option<Value>,
    pub duration_sec: f64,
}

impl ValidationOutcome {
    pub fn accepted(topic: impl Into<String>, payload: Value, duration_sec: f64) -> Self {
        Self {
            ok: true,
            received_messages: 1,
            topic: topic.into(),
            errors: Vec::new(),
            first_payload: Some(payload),
            duration_sec,
        }
    }

    /// Build a failed outcome; errors are deduplicated in first-seen order and a
    /// generic error is synthesized when none were recorded.
    pub fn rejected(topic: impl Into<String>, errors: Vec<String>, duration_sec: f64) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(errors.len());
        for error in errors {
            if !unique.contains(&error) {
                unique.push(error);
            }
        }
        if unique.is_empty() {
            unique.push(NO_TELEMETRY_ERROR.to_string());
        }

        Self {
            ok: false,
            received_messages: 0,
            topic: topic.into(),
            errors: unique,
            first_payload: None,
            duration_sec,
        }
    }
}
