//! Sensor telemetry validation over a time budget

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tasprov_core::{sensor_block, validate_sensor_block, ValidationOutcome};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::source::{sensor_topic, TelemetryConnector, TelemetrySource};

/// Default time allowed for a valid sample to arrive
pub const DEFAULT_VALIDATION_BUDGET: Duration = Duration::from_secs(45);

/// Longest single wait for a message before the budget is re-checked
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a validation window; larger budgets are clamped to it
pub const MAX_VALIDATION_BUDGET: Duration = Duration::from_secs(86_400 * 365);

const INVALID_JSON_ERROR: &str = "Invalid JSON received";

/// Subscribes to a device's sensor topic and accepts the first physically plausible sample
pub struct TelemetryValidator {
    connector: Arc<dyn TelemetryConnector>,
    poll_interval: Duration,
}

impl TelemetryValidator {
    pub fn new(connector: Arc<dyn TelemetryConnector>) -> Self {
        Self {
            connector,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Validate telemetry from `device_topic` until a valid sample arrives or `budget` runs out.
    ///
    /// Every rejected sample contributes its errors to the outcome. A dropped
    /// connection ends the window early.
    pub async fn validate(
        &self,
        device_topic: &str,
        sensor_name: &str,
        budget: Duration,
    ) -> ValidationOutcome {
        let topic = sensor_topic(device_topic);
        let started = Instant::now();

        let mut source = match self.connector.subscribe(&topic).await {
            Ok(source) => source,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Could not subscribe to telemetry");
                return ValidationOutcome::rejected(
                    topic,
                    vec![e.to_string()],
                    started.elapsed().as_secs_f64(),
                );
            }
        };

        info!(topic = %topic, budget_secs = budget.as_secs(), "Waiting for telemetry");

        let deadline = started
            .checked_add(budget.min(MAX_VALIDATION_BUDGET))
            .unwrap_or(started);
        let outcome = self
            .consume(source.as_mut(), &topic, sensor_name, started, deadline)
            .await;
        source.close().await;
        outcome
    }

    async fn consume(
        &self,
        source: &mut dyn TelemetrySource,
        topic: &str,
        sensor_name: &str,
        started: Instant,
        deadline: Instant,
    ) -> ValidationOutcome {
        let mut errors: Vec<String> = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let payload = match source.next_payload(remaining.min(self.poll_interval)).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Telemetry stream ended");
                    errors.push(e.to_string());
                    break;
                }
            };

            let message: Value = match serde_json::from_slice(&payload) {
                Ok(message) => message,
                Err(e) => {
                    debug!(topic = %topic, error = %e, "Discarding malformed telemetry");
                    errors.push(INVALID_JSON_ERROR.to_string());
                    continue;
                }
            };

            let violations = validate_sensor_block(&message, sensor_name);
            if violations.is_empty() {
                let block = sensor_block(&message, sensor_name)
                    .cloned()
                    .unwrap_or(Value::Null);
                return ValidationOutcome::accepted(topic, block, started.elapsed().as_secs_f64());
            }

            debug!(topic = %topic, ?violations, "Rejected telemetry sample");
            errors.extend(violations);
        }

        ValidationOutcome::rejected(topic, errors, started.elapsed().as_secs_f64())
    }
}
