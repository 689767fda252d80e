//! tasprov Provision - Pushing network and broker settings to Tasmota devices
//!
//! Two strategies produce the same [`tasprov_core::ProvisionOutcome`]:
//! - HTTP: one `Backlog` command sent to the device's command endpoint
//! - Serial: one console command per line over the device's UART
//!
//! The serial locator finds which local port, if any, has a device attached.

pub mod error;
pub mod http;
pub mod locator;
pub mod serial;
pub mod strategy;

pub use error::{ProvisionError, SerialError};
pub use http::{HttpProvisioner, HTTP_PROVISION_TIMEOUT};
pub use locator::{locate_device, LocatorOptions};
pub use serial::{
    SerialLink, SerialOpener, SerialOptions, SerialProvisioner, SystemSerial, TASMOTA_BAUD_RATE,
};
pub use strategy::{ProvisionTarget, Provisioner};
