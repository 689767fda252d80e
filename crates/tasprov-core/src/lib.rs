//! tasprov Core - Shared types for Tasmota provisioning runs
//!
//! This crate provides the foundational types for the tasprov system:
//! - Device records for discovered or operator-supplied devices
//! - Physical plausibility validation of telemetry sensor blocks
//! - Provisioning settings and the command sequence derived from them
//! - Provisioning/validation outcomes and the final run report

pub mod device;
pub mod outcome;
pub mod report;
pub mod sensor;
pub mod settings;

pub use device::{command_url, DeviceRecord, DiscoveryMethod, DEFAULT_DEVICE_PORT};
pub use outcome::{
    ProvisionMethod, ProvisionOutcome, ProvisionResponses, ValidationOutcome, NO_TELEMETRY_ERROR,
};
pub use report::{sanitize_config, ReportSummary, RunRecord, RunReport};
pub use sensor::{sensor_block, validate_sensor_block};
pub use settings::{secret_values, ProvisionSettings, REDACTED};
