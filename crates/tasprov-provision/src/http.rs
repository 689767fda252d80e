//! Provisioning over the HTTP command endpoint with a single `Backlog` command

use serde_json::Value;
use std::time::Duration;
use tasprov_core::{
    DeviceRecord, ProvisionMethod, ProvisionOutcome, ProvisionResponses, ProvisionSettings,
};
use tracing::{debug, info, warn};

use crate::error::ProvisionError;

/// Timeout for the backlog request
pub const HTTP_PROVISION_TIMEOUT: Duration = Duration::from_secs(5);

/// Pushes settings to a device as one batched HTTP command
#[derive(Clone)]
pub struct HttpProvisioner {
    client: reqwest::Client,
}

impl HttpProvisioner {
    pub fn new(timeout: Duration) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Send the backlog command to `device`.
    ///
    /// The composite command is always recorded, whether or not it was delivered.
    pub async fn provision(
        &self,
        device: &DeviceRecord,
        settings: &ProvisionSettings,
    ) -> ProvisionOutcome {
        let backlog = settings.backlog();
        let commands_sent = vec![backlog.clone()];

        info!(ip = %device.ip, port = device.port, "Provisioning over HTTP");

        match self.send(device, &backlog).await {
            Ok(body) => {
                debug!(ip = %device.ip, response = %body, "Backlog accepted");
                ProvisionOutcome::succeeded(
                    ProvisionMethod::Http,
                    commands_sent,
                    ProvisionResponses::Aggregate(body),
                )
            }
            Err(e) => {
                warn!(ip = %device.ip, error = %e, "HTTP provisioning failed");
                ProvisionOutcome::failed(
                    ProvisionMethod::Http,
                    commands_sent,
                    ProvisionResponses::Aggregate(Value::Object(Default::default())),
                    e.to_string(),
                )
            }
        }
    }

    async fn send(&self, device: &DeviceRecord, backlog: &str) -> Result<Value, ProvisionError> {
        let response = self
            .client
            .get(device.command_url())
            .query(&[("cmnd", backlog)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::Status(status.as_u16()));
        }

        // Devices answer with JSON, but the body is kept as text if it is not
        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
