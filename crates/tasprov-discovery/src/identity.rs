//! Tasmota identity queries (`/cm?cmnd=Status`)

use async_trait::async_trait;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;
use tasprov_core::{command_url, DeviceRecord, DiscoveryMethod};
use thiserror::Error;
use tracing::trace;

/// Command that returns the device identity block
pub const STATUS_COMMAND: &str = "Status";

/// Model name used when the device reports none
pub const DEFAULT_MODEL: &str = "Tasmota";

/// Timeout for a single discovery probe
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Response has no Status block")]
    MissingStatus,
    #[error("Status block has no Topic")]
    MissingTopic,
}

/// Identity reported by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub topic: String,
    pub model: String,
}

impl Identity {
    /// Turn the identity into a device record
    pub fn into_record(self, ip: IpAddr, port: u16, method: DiscoveryMethod) -> DeviceRecord {
        let mut record = DeviceRecord::new(ip, port, method);
        record.set_topic(&self.topic);
        record.model = Some(self.model);
        record
    }
}

/// Parse a `Status` command response.
///
/// The response must carry a top-level `Status` object with a string `Topic`.
/// The model comes from `DeviceName`, then `FriendlyName` (a string or, on
/// current firmware, an array of strings), then [`DEFAULT_MODEL`].
pub fn parse_identity(body: &Value) -> Result<Identity, IdentityError> {
    let status = body
        .get("Status")
        .and_then(Value::as_object)
        .ok_or(IdentityError::MissingStatus)?;

    let topic = status
        .get("Topic")
        .and_then(Value::as_str)
        .ok_or(IdentityError::MissingTopic)?
        .to_string();

    let friendly_name = match status.get("FriendlyName") {
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|n| !n.is_empty()),
        Some(Value::String(name)) => Some(name.as_str()),
        _ => None,
    };

    let model = status
        .get("DeviceName")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .or(friendly_name.filter(|n| !n.is_empty()))
        .unwrap_or(DEFAULT_MODEL)
        .to_string();

    Ok(Identity { topic, model })
}

/// Something that can ask a device for its identity
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn query(&self, ip: IpAddr, port: u16) -> Result<Identity, IdentityError>;
}

/// Identity probe over the device's HTTP command endpoint
#[derive(Clone)]
pub struct HttpIdentityProbe {
    client: reqwest::Client,
}

impl HttpIdentityProbe {
    /// Create a probe whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Probe with the standard discovery timeout
    pub fn for_discovery() -> Result<Self, IdentityError> {
        Self::new(PROBE_TIMEOUT)
    }
}

#[async_trait]
impl IdentityProbe for HttpIdentityProbe {
    async fn query(&self, ip: IpAddr, port: u16) -> Result<Identity, IdentityError> {
        let response = self
            .client
            .get(command_url(ip, port))
            .query(&[("cmnd", STATUS_COMMAND)])
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(IdentityError::Status(response.status().as_u16()));
        }

        let body: Value = response.json().await?;
        let identity = parse_identity(&body)?;
        trace!(ip = %ip, topic = %identity.topic, model = %identity.model, "Identity received");
        Ok(identity)
    }
}
