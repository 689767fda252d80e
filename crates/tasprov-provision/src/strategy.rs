//! One provisioning capability over interchangeable transports

use tasprov_core::{
    DeviceRecord, ProvisionMethod, ProvisionOutcome, ProvisionResponses, ProvisionSettings,
};

use crate::http::HttpProvisioner;
use crate::serial::SerialProvisioner;

/// What a provisioning attempt is aimed at
#[derive(Debug, Clone, Copy)]
pub enum ProvisionTarget<'a> {
    /// A device reachable over the network
    Network(&'a DeviceRecord),
    /// A device attached to a local serial port
    SerialPort(&'a str),
}

impl ProvisionTarget<'_> {
    /// Key under which the attempt is logged in the run report
    pub fn report_key(&self) -> String {
        match self {
            Self::Network(device) => device.report_key(),
            Self::SerialPort(port) => port.to_string(),
        }
    }
}

/// Provisioning strategy, selected once per run
#[derive(Clone)]
pub enum Provisioner {
    Http(HttpProvisioner),
    Serial(SerialProvisioner),
}

impl Provisioner {
    pub fn method(&self) -> ProvisionMethod {
        match self {
            Self::Http(_) => ProvisionMethod::Http,
            Self::Serial(_) => ProvisionMethod::Serial,
        }
    }

    /// Push `settings` to `target`.
    ///
    /// A target the strategy cannot reach produces a failed outcome with no
    /// commands sent.
    pub async fn provision(
        &self,
        target: ProvisionTarget<'_>,
        settings: &ProvisionSettings,
    ) -> ProvisionOutcome {
        match (self, target) {
            (Self::Http(http), ProvisionTarget::Network(device)) => {
                http.provision(device, settings).await
            }
            (Self::Serial(serial), ProvisionTarget::SerialPort(port)) => {
                serial.provision(port, settings).await
            }
            (_, target) => ProvisionOutcome::failed(
                self.method(),
                Vec::new(),
                ProvisionResponses::default(),
                format!(
                    "{} provisioning cannot reach target {}",
                    self.method(),
                    target.report_key()
                ),
            ),
        }
    }
}
