//! tasprov Telemetry - MQTT sensor telemetry validation
//!
//! After provisioning, a device should publish sensor readings on
//! `tele/<topic>/SENSOR`. This crate subscribes to that topic and checks the
//! readings for physical plausibility within a time budget.

pub mod mqtt;
pub mod source;
pub mod validate;

pub use mqtt::{BrokerConfig, MqttConnector, MqttSubscription};
pub use source::{sensor_topic, TelemetryConnector, TelemetryError, TelemetrySource};
pub use validate::{TelemetryValidator, DEFAULT_VALIDATION_BUDGET, MAX_VALIDATION_BUDGET};
