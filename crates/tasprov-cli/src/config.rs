//! Configuration loading and validation

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tasprov_core::{ProvisionSettings, DEFAULT_DEVICE_PORT};
use tasprov_discovery::{AddressRange, RangeError, ScannerConfig, DEFAULT_CONCURRENCY};
use tasprov_provision::{LocatorOptions, SerialOptions, TASMOTA_BAUD_RATE};
use tasprov_telemetry::{BrokerConfig, MAX_VALIDATION_BUDGET};
use thiserror::Error;
use tracing::info;

use crate::pipeline::RunPlan;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MQTT broker host is required (--mqtt-host or [broker] host)")]
    MissingBrokerHost,
    #[error("invalid scan range: {0}")]
    InvalidRange(#[from] RangeError),
}

/// How settings are pushed to devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// One batched command over the device's HTTP endpoint
    #[default]
    Http,
    /// Console commands over a local serial port
    Serial,
    /// Skip provisioning and only validate
    None,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub settle: SettleConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Network range to sweep, e.g. 192.168.1.0/24
    pub cidr: Option<String>,
    /// Single device address; takes precedence over the range for network runs
    pub target_ip: Option<IpAddr>,
    /// Device HTTP port
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Maximum identity probes in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Identity probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            cidr: None,
            target_ip: None,
            port: default_device_port(),
            concurrency: default_concurrency(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_device_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    pub host: Option<String>,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: None,
            port: default_broker_port(),
            user: None,
            password: None,
        }
    }
}

fn default_broker_port() -> u16 {
    tasprov_core::settings::DEFAULT_BROKER_PORT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub via: Transport,
    /// Telemetry period pushed to devices, in seconds
    #[serde(default = "default_teleperiod")]
    pub teleperiod: u32,
    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            via: Transport::default(),
            teleperiod: default_teleperiod(),
            serial_baud: default_serial_baud(),
        }
    }
}

fn default_teleperiod() -> u32 {
    tasprov_core::settings::DEFAULT_TELEPERIOD
}

fn default_serial_baud() -> u32 {
    TASMOTA_BAUD_RATE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Sensor block expected in each telemetry message
    #[serde(default = "default_sensor_name")]
    pub sensor_name: String,
    /// Time allowed per device for a valid sample
    #[serde(default = "default_wait_secs")]
    pub wait_secs: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sensor_name: default_sensor_name(),
            wait_secs: default_wait_secs(),
        }
    }
}

fn default_sensor_name() -> String {
    "CustomBME280".to_string()
}

fn default_wait_secs() -> f64 {
    45.0
}

/// Waits after provisioning while devices reboot and rejoin the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default = "default_http_settle")]
    pub http_secs: u64,
    #[serde(default = "default_serial_settle")]
    pub serial_secs: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            http_secs: default_http_settle(),
            serial_secs: default_serial_settle(),
        }
    }
}

fn default_http_settle() -> u64 {
    15
}

fn default_serial_settle() -> u64 {
    20
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Report file; a timestamped name is used when unset
    pub path: Option<PathBuf>,
}

impl Config {
    fn broker_host(&self) -> Result<&str, ConfigError> {
        self.broker
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingBrokerHost)
    }

    /// Settings pushed to every provisioned device
    pub fn provision_settings(&self) -> Result<ProvisionSettings, ConfigError> {
        let host = self.broker_host()?;

        let mut settings = ProvisionSettings::new(host);
        settings.mqtt_port = self.broker.port;
        settings.mqtt_user = self.broker.user.clone();
        settings.mqtt_password = self.broker.password.clone();
        settings.wifi_ssid = self.wifi.ssid.clone();
        settings.wifi_password = self.wifi.password.clone();
        settings.teleperiod = self.provision.teleperiod;
        Ok(settings)
    }

    /// Broker connection used for telemetry validation
    pub fn broker_config(&self) -> Result<BrokerConfig, ConfigError> {
        let host = self.broker_host()?;

        let mut broker = BrokerConfig::new(host, self.broker.port);
        broker.user = self.broker.user.clone();
        broker.password = self.broker.password.clone();
        Ok(broker)
    }

    /// Validate the configuration and turn it into a run plan
    pub fn plan(&self) -> Result<RunPlan, ConfigError> {
        let range = self
            .scan
            .cidr
            .as_deref()
            .map(str::parse::<AddressRange>)
            .transpose()?;

        Ok(RunPlan {
            transport: self.provision.via,
            address: self.scan.target_ip,
            range,
            scanner: ScannerConfig {
                port: self.scan.port,
                concurrency: self.scan.concurrency,
            },
            settings: self.provision_settings()?,
            sensor_name: self.validation.sensor_name.clone(),
            validation_budget: Duration::try_from_secs_f64(self.validation.wait_secs)
                .unwrap_or(Duration::ZERO)
                .min(MAX_VALIDATION_BUDGET),
            http_settle: Duration::from_secs(self.settle.http_secs),
            serial_settle: Duration::from_secs(self.settle.serial_secs),
            serial: SerialOptions::default(),
            locator: LocatorOptions::default(),
        })
    }

    /// Probe timeout for discovery
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.probe_timeout_ms)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        scan: ScanConfig {
            cidr: Some("192.168.1.0/24".to_string()),
            ..ScanConfig::default()
        },
        broker: BrokerSection {
            host: Some("192.168.1.10".to_string()),
            ..BrokerSection::default()
        },
        ..Config::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
