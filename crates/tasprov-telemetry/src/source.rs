//! Telemetry subscriptions as a message source

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("MQTT connection failed: {0}")]
    Connect(String),
    #[error("MQTT subscribe failed: {0}")]
    Subscribe(String),
    #[error("MQTT connection lost: {0}")]
    Stream(String),
}

/// Topic a Tasmota device publishes its sensor readings on
pub fn sensor_topic(device_topic: &str) -> String {
    format!("tele/{}/SENSOR", device_topic)
}

/// An active subscription delivering raw message payloads
#[async_trait]
pub trait TelemetrySource: Send {
    /// Wait at most `wait` for the next payload; `Ok(None)` when nothing arrived
    async fn next_payload(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TelemetryError>;

    /// Unsubscribe and disconnect
    async fn close(&mut self);
}

/// Opens subscriptions on a telemetry channel
#[async_trait]
pub trait TelemetryConnector: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TelemetrySource>, TelemetryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_topic() {
        assert_eq!(sensor_topic("tasmota_8C1F64"), "tele/tasmota_8C1F64/SENSOR");
    }
}
