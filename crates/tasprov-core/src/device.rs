//! Device records for discovered or targeted hardware

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Default HTTP command port of a Tasmota device
pub const DEFAULT_DEVICE_PORT: u16 = 80;

/// Path of the Tasmota command endpoint
pub const COMMAND_PATH: &str = "/cm";

/// Topic value reported by devices that have not been given one yet
const UNKNOWN_TOPIC: &str = "unknown";

/// How a device record came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    /// Answered the identity query during a network sweep
    Scan,
    /// Supplied directly by the operator
    Manual,
    /// Found on the network after being provisioned over serial
    SerialRediscovery,
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scan => "scan",
            Self::Manual => "manual",
            Self::SerialRediscovery => "serial-rediscovery",
        };
        f.write_str(s)
    }
}

/// A device targeted during one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Network address of the device
    pub ip: IpAddr,
    /// HTTP command port
    pub port: u16,
    /// MQTT topic the device publishes telemetry under (resolved lazily)
    pub topic: Option<String>,
    /// Human-readable model or device name
    pub model: Option<String>,
    /// How the device was discovered
    pub discovered_by: DiscoveryMethod,
}

impl DeviceRecord {
    /// Create a record for a device that answered an identity query
    pub fn new(ip: IpAddr, port: u16, discovered_by: DiscoveryMethod) -> Self {
        Self {
            ip,
            port,
            topic: None,
            model: None,
            discovered_by,
        }
    }

    /// Create a record for an operator-supplied address on the default port
    pub fn manual(ip: IpAddr) -> Self {
        Self::new(ip, DEFAULT_DEVICE_PORT, DiscoveryMethod::Manual)
    }

    /// Set the topic, ignoring empty values and the firmware's "unknown" placeholder
    pub fn set_topic(&mut self, topic: &str) {
        let topic = topic.trim();
        if topic.is_empty() || topic.eq_ignore_ascii_case(UNKNOWN_TOPIC) {
            return;
        }
        self.topic = Some(topic.to_string());
    }

    /// Resolved telemetry topic, if any
    pub fn resolved_topic(&self) -> Option<&str> {
        self.topic
            .as_deref()
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case(UNKNOWN_TOPIC))
    }

    /// Key used for this device in the run report
    pub fn report_key(&self) -> String {
        self.ip.to_string()
    }

    pub fn command_url(&self) -> String {
        command_url(self.ip, self.port)
    }
}

/// URL of the command endpoint on a device
pub fn command_url(ip: IpAddr, port: u16) -> String {
    format!("http://{}{}", SocketAddr::new(ip, port), COMMAND_PATH)
}
