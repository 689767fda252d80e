//! Provisioning settings and the Tasmota command sequence built from them

use serde::{Deserialize, Serialize};

/// Default MQTT broker port
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default telemetry period in seconds
pub const DEFAULT_TELEPERIOD: u32 = 10;

/// Commands whose argument is a credential
const SECRET_COMMANDS: [&str; 2] = ["Password1", "MqttPassword"];

/// Replacement for credential values in recorded output
pub const REDACTED: &str = "****";

/// Configuration pushed to a device during provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionSettings {
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    /// Telemetry reporting period in seconds
    pub teleperiod: u32,
}

impl ProvisionSettings {
    pub fn new(mqtt_host: impl Into<String>) -> Self {
        Self {
            wifi_ssid: None,
            wifi_password: None,
            mqtt_host: mqtt_host.into(),
            mqtt_port: DEFAULT_BROKER_PORT,
            mqtt_user: None,
            mqtt_password: None,
            teleperiod: DEFAULT_TELEPERIOD,
        }
    }

    /// Ordered configuration commands, ending with a restart.
    ///
    /// Later commands depend on earlier ones having been queued, so callers must
    /// apply them in this order.
    pub fn commands(&self) -> Vec<String> {
        let mut commands = Vec::with_capacity(8);

        if let Some(ssid) = non_empty(&self.wifi_ssid) {
            commands.push(format!("SSID1 {}", ssid));
            if let Some(password) = non_empty(&self.wifi_password) {
                commands.push(format!("Password1 {}", password));
            }
        }

        commands.push(format!("MqttHost {}", self.mqtt_host));
        commands.push(format!("MqttPort {}", self.mqtt_port));
        commands.push(format!("TelePeriod {}", self.teleperiod));

        if let Some(user) = non_empty(&self.mqtt_user) {
            commands.push(format!("MqttUser {}", user));
        }
        if let Some(password) = non_empty(&self.mqtt_password) {
            commands.push(format!("MqttPassword {}", password));
        }

        commands.push("Restart 1".to_string());
        commands
    }

    /// All commands chained into a single `Backlog` command
    pub fn backlog(&self) -> String {
        format!("Backlog {}", self.commands().join("; "))
    }
}

/// Credential values carried by a command or a `Backlog` chain
pub fn secret_values(command: &str) -> Vec<&str> {
    let commands: Vec<&str> = match command.strip_prefix("Backlog ") {
        Some(chain) => chain.split(';').map(str::trim).collect(),
        None => vec![command.trim()],
    };

    commands
        .into_iter()
        .filter_map(|c| {
            let (name, value) = c.split_once(' ')?;
            let value = value.trim();
            let secret = SECRET_COMMANDS.iter().any(|s| s.eq_ignore_ascii_case(name));
            (secret && !value.is_empty()).then_some(value)
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
