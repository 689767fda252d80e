//! tasprov - Tasmota discovery, provisioning and telemetry validation
//!
//! Finds devices on a network range (or a serial port), pushes WiFi and MQTT
//! settings to them, then confirms they publish plausible sensor telemetry.
//! Every run ends with a JSON report.

mod config;
mod pipeline;
mod report;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tasprov_core::RunReport;
use tasprov_discovery::HttpIdentityProbe;
use tasprov_provision::{HttpProvisioner, SystemSerial, HTTP_PROVISION_TIMEOUT};
use tasprov_telemetry::MqttConnector;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{Config, Transport};
use pipeline::{Dependencies, Pipeline, TOPIC_QUERY_TIMEOUT};

#[derive(Parser, Debug)]
#[command(name = "tasprov")]
#[command(about = "Discover, provision and validate Tasmota sensor devices")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tasprov.toml")]
    config: PathBuf,

    /// Network range to scan (e.g. 192.168.1.0/24)
    #[arg(long)]
    cidr: Option<String>,

    /// Single device address
    #[arg(long)]
    target_ip: Option<IpAddr>,

    /// How to push settings to devices
    #[arg(long, value_enum)]
    provision_via: Option<Transport>,

    /// MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    #[arg(long)]
    mqtt_port: Option<u16>,

    #[arg(long)]
    mqtt_user: Option<String>,

    #[arg(long)]
    mqtt_password: Option<String>,

    #[arg(long)]
    wifi_ssid: Option<String>,

    #[arg(long)]
    wifi_password: Option<String>,

    /// Sensor block expected in telemetry
    #[arg(long)]
    sensor_name: Option<String>,

    /// Telemetry period pushed to devices, in seconds
    #[arg(long)]
    teleperiod: Option<u32>,

    /// Time allowed per device for valid telemetry, in seconds
    #[arg(long)]
    mqtt_wait_sec: Option<f64>,

    /// Path to save the JSON report
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Enable verbose console logging
    #[arg(long)]
    log: bool,

    /// Log level (trace, debug, info, warn, error); overrides --log
    #[arg(long)]
    log_level: Option<String>,

    /// Write a default configuration file and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

impl Args {
    fn level(&self) -> Level {
        match self.log_level.as_deref().map(str::to_lowercase).as_deref() {
            Some("trace") => Level::TRACE,
            Some("debug") => Level::DEBUG,
            Some("info") => Level::INFO,
            Some("warn") => Level::WARN,
            Some("error") => Level::ERROR,
            _ if self.log => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Command-line values take precedence over the configuration file
    fn apply(&self, config: &mut Config) {
        if let Some(cidr) = &self.cidr {
            config.scan.cidr = Some(cidr.clone());
        }
        if let Some(ip) = self.target_ip {
            config.scan.target_ip = Some(ip);
        }
        if let Some(via) = self.provision_via {
            config.provision.via = via;
        }
        if let Some(host) = &self.mqtt_host {
            config.broker.host = Some(host.clone());
        }
        if let Some(port) = self.mqtt_port {
            config.broker.port = port;
        }
        if let Some(user) = &self.mqtt_user {
            config.broker.user = Some(user.clone());
        }
        if let Some(password) = &self.mqtt_password {
            config.broker.password = Some(password.clone());
        }
        if let Some(ssid) = &self.wifi_ssid {
            config.wifi.ssid = Some(ssid.clone());
        }
        if let Some(password) = &self.wifi_password {
            config.wifi.password = Some(password.clone());
        }
        if let Some(sensor) = &self.sensor_name {
            config.validation.sensor_name = sensor.clone();
        }
        if let Some(teleperiod) = self.teleperiod {
            config.provision.teleperiod = teleperiod;
        }
        if let Some(wait) = self.mqtt_wait_sec {
            config.validation.wait_secs = wait;
        }
        if let Some(path) = &self.report_file {
            config.report.path = Some(path.clone());
        }
    }
}

fn system_dependencies(config: &Config) -> Result<Dependencies> {
    Ok(Dependencies {
        identity: Arc::new(HttpIdentityProbe::new(config.probe_timeout())?),
        topic_query: Arc::new(HttpIdentityProbe::new(TOPIC_QUERY_TIMEOUT)?),
        serial: Arc::new(SystemSerial::new(config.provision.serial_baud)),
        telemetry: Arc::new(MqttConnector::new(config.broker_config()?)),
        http: HttpProvisioner::new(HTTP_PROVISION_TIMEOUT)?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbose = args.level() >= Level::INFO;

    // Logs go to stderr; stdout is reserved for the report in quiet mode
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.write_default_config {
        config::save_default_config(path)?;
        info!(path = %path.display(), "Wrote default configuration");
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    args.apply(&mut config);

    let plan = config.plan()?;
    let pipeline = Pipeline::new(plan, system_dependencies(&config)?);
    let report_path = config
        .report
        .path
        .clone()
        .unwrap_or_else(|| report::default_report_path(Local::now()));

    info!("tasprov v{} started", env!("CARGO_PKG_VERSION"));

    let record = tokio::select! {
        record = pipeline.run() => record,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted by user");
            std::process::exit(1);
        }
    };

    let config_used = serde_json::to_value(&config).context("serializing configuration")?;
    let report = RunReport::build(&config_used, record);
    let json = report::write_report(&report, &report_path)?;

    if verbose {
        for (device, outcome) in &report.mqtt_validation {
            info!("{}: {}", device, if outcome.ok { "PASSED" } else { "FAILED" });
        }
        info!(
            devices = report.summary.devices_found,
            provisioned = report.summary.provisioning_count,
            passed = report.summary.successful_validations,
            "Run finished"
        );
        info!(path = %report_path.display(), "Detailed JSON report saved");
    } else {
        println!("{}", json);
    }

    Ok(())
}
