//! Run pipeline: provision or discover, validate telemetry, collect results

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tasprov_core::{DeviceRecord, DiscoveryMethod, ProvisionSettings, RunRecord};
use tasprov_discovery::{AddressRange, DiscoveryScanner, IdentityProbe, ScannerConfig};
use tasprov_provision::{
    locate_device, HttpProvisioner, LocatorOptions, ProvisionTarget, Provisioner, SerialOpener,
    SerialOptions, SerialProvisioner,
};
use tasprov_telemetry::{TelemetryConnector, TelemetryValidator};
use tracing::{debug, info, warn};

use crate::config::Transport;

/// Timeout of the identity re-query made for devices without a topic
pub const TOPIC_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Reason recorded for devices whose telemetry topic stays unknown
pub const UNRESOLVED_TOPIC: &str = "Could not determine MQTT topic";

/// Everything a run needs to know, validated up front
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub transport: Transport,
    /// Single operator-supplied device
    pub address: Option<IpAddr>,
    /// Range swept for devices
    pub range: Option<AddressRange>,
    pub scanner: ScannerConfig,
    pub settings: ProvisionSettings,
    pub sensor_name: String,
    pub validation_budget: Duration,
    pub http_settle: Duration,
    pub serial_settle: Duration,
    pub serial: SerialOptions,
    pub locator: LocatorOptions,
}

/// External systems the pipeline talks to
pub struct Dependencies {
    /// Identity probe used by the discovery sweep
    pub identity: Arc<dyn IdentityProbe>,
    /// Identity probe used to re-query missing topics
    pub topic_query: Arc<dyn IdentityProbe>,
    pub serial: Arc<dyn SerialOpener>,
    pub telemetry: Arc<dyn TelemetryConnector>,
    pub http: HttpProvisioner,
}

pub struct Pipeline {
    plan: RunPlan,
    scanner: DiscoveryScanner,
    topic_query: Arc<dyn IdentityProbe>,
    serial: Arc<dyn SerialOpener>,
    provisioner: Option<Provisioner>,
    validator: TelemetryValidator,
}

impl Pipeline {
    pub fn new(plan: RunPlan, deps: Dependencies) -> Self {
        let provisioner = match plan.transport {
            Transport::Http => Some(Provisioner::Http(deps.http)),
            Transport::Serial => Some(Provisioner::Serial(SerialProvisioner::new(
                deps.serial.clone(),
                plan.serial,
            ))),
            Transport::None => None,
        };

        Self {
            scanner: DiscoveryScanner::new(deps.identity, plan.scanner),
            topic_query: deps.topic_query,
            serial: deps.serial,
            provisioner,
            validator: TelemetryValidator::new(deps.telemetry),
            plan,
        }
    }

    /// Run every phase. Component failures end up in the record; nothing aborts the run.
    pub async fn run(&self) -> RunRecord {
        let mut record = RunRecord::default();

        match self.plan.transport {
            Transport::Serial => self.provision_serial(&mut record).await,
            Transport::Http | Transport::None => self.provision_network(&mut record).await,
        }

        self.validate(&mut record).await;
        record
    }

    async fn provision_serial(&self, record: &mut RunRecord) {
        let Some(provisioner) = &self.provisioner else {
            return;
        };

        let Some(port) = self.locate().await else {
            warn!("No Tasmota device found on serial ports");
            return;
        };

        let outcome = provisioner
            .provision(ProvisionTarget::SerialPort(&port), &self.plan.settings)
            .await;
        let ok = outcome.ok;
        info!(port = %port, ok, "Serial provisioning finished");
        record.provisioning.insert(port, outcome);

        if !ok {
            return;
        }
        let Some(range) = &self.plan.range else {
            info!("No scan range given, skipping network rediscovery");
            return;
        };

        info!(
            secs = self.plan.serial_settle.as_secs(),
            "Waiting for device to reboot and join WiFi"
        );
        tokio::time::sleep(self.plan.serial_settle).await;

        info!(range = %range, "Scanning network to locate provisioned device");
        let mut devices = self.scanner.scan(range).await;
        for device in &mut devices {
            device.discovered_by = DiscoveryMethod::SerialRediscovery;
        }
        record.devices = devices;
    }

    async fn locate(&self) -> Option<String> {
        let opener = self.serial.clone();
        let options = self.plan.locator;

        match tokio::task::spawn_blocking(move || locate_device(opener.as_ref(), &options)).await {
            Ok(port) => port,
            Err(e) => {
                warn!(error = %e, "Serial port search failed");
                None
            }
        }
    }

    async fn provision_network(&self, record: &mut RunRecord) {
        record.devices = if let Some(ip) = self.plan.address {
            vec![DeviceRecord::new(ip, self.plan.scanner.port, DiscoveryMethod::Manual)]
        } else if let Some(range) = &self.plan.range {
            info!(range = %range, "Scanning network");
            let devices = self.scanner.scan(range).await;
            info!("Discovered {} device(s)", devices.len());
            devices
        } else {
            warn!("No target address or scan range given");
            Vec::new()
        };

        let Some(provisioner) = &self.provisioner else {
            return;
        };
        if record.devices.is_empty() {
            return;
        }

        for device in &record.devices {
            let outcome = provisioner
                .provision(ProvisionTarget::Network(device), &self.plan.settings)
                .await;
            info!(ip = %device.ip, ok = outcome.ok, "HTTP provisioning finished");
            record.provisioning.insert(device.report_key(), outcome);
        }

        info!(
            secs = self.plan.http_settle.as_secs(),
            "Waiting for devices to stabilize"
        );
        tokio::time::sleep(self.plan.http_settle).await;
    }

    async fn validate(&self, record: &mut RunRecord) {
        if record.devices.is_empty() {
            warn!("No devices found for validation");
            return;
        }

        info!("Starting MQTT telemetry validation");

        for device in &mut record.devices {
            if device.resolved_topic().is_none() {
                self.refresh_topic(device).await;
            }

            let key = device.report_key();
            match device.resolved_topic() {
                Some(topic) => {
                    let outcome = self
                        .validator
                        .validate(topic, &self.plan.sensor_name, self.plan.validation_budget)
                        .await;
                    if outcome.ok {
                        info!(ip = %device.ip, topic = %topic, "Test result: PASSED");
                    } else {
                        info!(ip = %device.ip, topic = %topic, errors = ?outcome.errors, "Test result: FAILED");
                    }
                    record.validation.insert(key, outcome);
                }
                None => {
                    warn!(ip = %device.ip, "Skipping device: could not determine MQTT topic");
                    record.skips.insert(key, UNRESOLVED_TOPIC.to_string());
                }
            }
        }
    }

    /// One best-effort identity query for a device that has no usable topic
    async fn refresh_topic(&self, device: &mut DeviceRecord) {
        match self.topic_query.query(device.ip, device.port).await {
            Ok(identity) => {
                debug!(ip = %device.ip, topic = %identity.topic, "Resolved topic");
                device.set_topic(&identity.topic);
                if device.model.is_none() {
                    device.model = Some(identity.model);
                }
            }
            Err(e) => debug!(ip = %device.ip, error = %e, "Topic query failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tasprov_core::{ProvisionMethod, ProvisionResponses};
    use tasprov_discovery::{Identity, IdentityError};
    use tasprov_provision::{SerialError, SerialLink};
    use tasprov_telemetry::{TelemetryError, TelemetrySource};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn identity(topic: &str) -> Identity {
        Identity {
            topic: topic.to_string(),
            model: "Sonoff TH".to_string(),
        }
    }

    /// Answers identity queries from a script; each address can answer differently over time
    #[derive(Default)]
    struct ScriptedIdentity {
        answers: Mutex<HashMap<IpAddr, VecDeque<Identity>>>,
        queried: Mutex<Vec<IpAddr>>,
    }

    impl ScriptedIdentity {
        fn with(answers: Vec<(IpAddr, Vec<Identity>)>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .map(|(ip, ids)| (ip, ids.into()))
                        .collect(),
                ),
                queried: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl IdentityProbe for ScriptedIdentity {
        async fn query(&self, ip: IpAddr, _port: u16) -> Result<Identity, IdentityError> {
            self.queried.lock().unwrap().push(ip);
            let mut answers = self.answers.lock().unwrap();
            let queue = answers.get_mut(&ip).ok_or(IdentityError::MissingStatus)?;
            let answer = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            answer.ok_or(IdentityError::MissingStatus)
        }
    }

    /// Serial port that echoes console output for every read
    struct EchoLink {
        written: Arc<Mutex<Vec<String>>>,
    }

    impl SerialLink for EchoLink {
        fn write_bytes(&mut self, data: &[u8]) -> Result<(), SerialError> {
            self.written
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(data).into_owned());
            Ok(())
        }

        fn read_pending(&mut self) -> Result<Vec<u8>, SerialError> {
            Ok(b"RSL: RESULT = {}".to_vec())
        }

        fn read_window(&mut self, _max: usize, _window: Duration) -> Result<Vec<u8>, SerialError> {
            Ok(b"CMD: Status".to_vec())
        }

        fn discard_input(&mut self) -> Result<(), SerialError> {
            Ok(())
        }
    }

    struct FakePorts {
        ports: Vec<String>,
        written: Arc<Mutex<Vec<String>>>,
    }

    impl FakePorts {
        fn new(ports: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                ports: ports.iter().map(|p| p.to_string()).collect(),
                written: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    impl SerialOpener for FakePorts {
        fn list_ports(&self) -> Result<Vec<String>, SerialError> {
            Ok(self.ports.clone())
        }

        fn open(&self, _port: &str, _timeout: Duration) -> Result<Box<dyn SerialLink>, SerialError> {
            Ok(Box::new(EchoLink {
                written: self.written.clone(),
            }))
        }
    }

    /// Broker whose every subscription delivers one valid reading
    #[derive(Default)]
    struct HealthyBroker {
        topics: Mutex<Vec<String>>,
    }

    struct OneReading {
        sent: bool,
    }

    #[async_trait]
    impl TelemetrySource for OneReading {
        async fn next_payload(
            &mut self,
            wait: Duration,
        ) -> Result<Option<Vec<u8>>, TelemetryError> {
            if self.sent {
                tokio::time::sleep(wait).await;
                return Ok(None);
            }
            self.sent = true;
            Ok(Some(
                br#"{"Time":"2024-05-01T12:00:00","CustomBME280":{"Temperature":21.0,"Humidity":40.0,"Pressure":1005.0}}"#
                    .to_vec(),
            ))
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl TelemetryConnector for HealthyBroker {
        async fn subscribe(
            &self,
            topic: &str,
        ) -> Result<Box<dyn TelemetrySource>, TelemetryError> {
            self.topics.lock().unwrap().push(topic.to_string());
            Ok(Box::new(OneReading { sent: false }))
        }
    }

    fn plan(transport: Transport) -> RunPlan {
        RunPlan {
            transport,
            address: None,
            range: None,
            scanner: ScannerConfig {
                port: 80,
                concurrency: 8,
            },
            settings: ProvisionSettings::new("192.168.1.10"),
            sensor_name: "CustomBME280".to_string(),
            validation_budget: Duration::from_secs(5),
            http_settle: Duration::ZERO,
            serial_settle: Duration::ZERO,
            serial: SerialOptions {
                read_timeout: Duration::from_millis(10),
                boot_wait: Duration::ZERO,
                settle: Duration::ZERO,
            },
            locator: LocatorOptions::default(),
        }
    }

    struct Harness {
        identity: Arc<ScriptedIdentity>,
        topic_query: Arc<ScriptedIdentity>,
        ports: Arc<FakePorts>,
        broker: Arc<HealthyBroker>,
    }

    impl Harness {
        fn new(
            identity: Arc<ScriptedIdentity>,
            topic_query: Arc<ScriptedIdentity>,
            ports: Arc<FakePorts>,
        ) -> Self {
            Self {
                identity,
                topic_query,
                ports,
                broker: Arc::new(HealthyBroker::default()),
            }
        }

        fn pipeline(&self, plan: RunPlan) -> Pipeline {
            Pipeline::new(
                plan,
                Dependencies {
                    identity: self.identity.clone(),
                    topic_query: self.topic_query.clone(),
                    serial: self.ports.clone(),
                    telemetry: self.broker.clone(),
                    http: HttpProvisioner::new(Duration::from_secs(2)).unwrap(),
                },
            )
        }
    }

    #[tokio::test]
    async fn test_manual_device_without_topic_is_skipped() {
        let harness = Harness::new(
            ScriptedIdentity::with(Vec::new()),
            ScriptedIdentity::with(Vec::new()),
            FakePorts::new(&[]),
        );
        let mut plan = plan(Transport::None);
        plan.address = Some(ip(42));

        let record = harness.pipeline(plan).run().await;

        assert_eq!(record.devices.len(), 1);
        assert_eq!(record.devices[0].discovered_by, DiscoveryMethod::Manual);
        assert!(record.provisioning.is_empty());
        assert!(record.validation.is_empty());
        assert_eq!(
            record.skips.get("10.0.0.42").map(String::as_str),
            Some(UNRESOLVED_TOPIC)
        );
        assert_eq!(*harness.topic_query.queried.lock().unwrap(), vec![ip(42)]);
        assert!(harness.broker.topics.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scanned_devices_are_validated() {
        let harness = Harness::new(
            ScriptedIdentity::with(vec![
                (ip(2), vec![identity("kitchen")]),
                (ip(5), vec![identity("unknown")]),
            ]),
            ScriptedIdentity::with(vec![(ip(5), vec![identity("garage")])]),
            FakePorts::new(&[]),
        );
        let mut plan = plan(Transport::None);
        plan.range = Some("10.0.0.0/29".parse().unwrap());

        let record = harness.pipeline(plan).run().await;

        assert_eq!(record.devices.len(), 2);
        assert!(record
            .devices
            .iter()
            .all(|d| d.discovered_by == DiscoveryMethod::Scan));
        assert_eq!(harness.identity.queried.lock().unwrap().len(), 6);
        assert_eq!(*harness.topic_query.queried.lock().unwrap(), vec![ip(5)]);

        assert_eq!(record.validation.len(), 2);
        assert!(record.validation.values().all(|v| v.ok));
        assert!(record.skips.is_empty());

        let mut topics = harness.broker.topics.lock().unwrap().clone();
        topics.sort();
        assert_eq!(topics, vec!["tele/garage/SENSOR", "tele/kitchen/SENSOR"]);
    }

    #[tokio::test]
    async fn test_serial_provisioning_then_rediscovery() {
        let harness = Harness::new(
            ScriptedIdentity::with(vec![(ip(1), vec![identity("bench")])]),
            ScriptedIdentity::with(Vec::new()),
            FakePorts::new(&["/dev/ttyUSB0"]),
        );
        let mut plan = plan(Transport::Serial);
        plan.range = Some("10.0.0.0/30".parse().unwrap());

        let record = harness.pipeline(plan).run().await;

        let outcome = &record.provisioning["/dev/ttyUSB0"];
        assert!(outcome.ok);
        assert_eq!(outcome.method, ProvisionMethod::Serial);
        assert_eq!(outcome.commands_sent.last().map(String::as_str), Some("Restart 1"));
        assert!(matches!(outcome.responses, ProvisionResponses::PerCommand(_)));

        let written = harness.ports.written.lock().unwrap();
        assert_eq!(written[0], "\nStatus\n");
        assert_eq!(written[1], "MqttHost 192.168.1.10\n");

        assert_eq!(record.devices.len(), 1);
        assert_eq!(record.devices[0].discovered_by, DiscoveryMethod::SerialRediscovery);
        assert!(record.validation["10.0.0.1"].ok);
    }

    #[tokio::test]
    async fn test_serial_without_range_only_provisions() {
        let harness = Harness::new(
            ScriptedIdentity::with(Vec::new()),
            ScriptedIdentity::with(Vec::new()),
            FakePorts::new(&["COM4"]),
        );
        let mut plan = plan(Transport::Serial);
        plan.address = Some(ip(9));

        let record = harness.pipeline(plan).run().await;

        assert_eq!(record.provisioning.len(), 1);
        assert!(record.devices.is_empty());
        assert!(harness.identity.queried.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serial_without_port_yields_nothing() {
        let harness = Harness::new(
            ScriptedIdentity::with(Vec::new()),
            ScriptedIdentity::with(Vec::new()),
            FakePorts::new(&[]),
        );
        let mut plan = plan(Transport::Serial);
        plan.range = Some("10.0.0.0/30".parse().unwrap());

        let record = harness.pipeline(plan).run().await;

        assert!(record.provisioning.is_empty());
        assert!(record.devices.is_empty());
        assert!(record.validation.is_empty());
    }

    #[tokio::test]
    async fn test_failed_http_provisioning_still_validates() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let harness = Harness::new(
            ScriptedIdentity::with(Vec::new()),
            ScriptedIdentity::with(vec![(localhost, vec![identity("desk")])]),
            FakePorts::new(&[]),
        );
        let mut plan = plan(Transport::Http);
        plan.address = Some(localhost);
        plan.scanner.port = port;

        let record = harness.pipeline(plan).run().await;

        let outcome = &record.provisioning["127.0.0.1"];
        assert!(!outcome.ok);
        assert_eq!(outcome.method, ProvisionMethod::Http);
        assert_eq!(outcome.commands_sent.len(), 1);
        assert!(outcome.commands_sent[0].starts_with("Backlog MqttHost 192.168.1.10"));

        assert!(record.validation["127.0.0.1"].ok);
        assert_eq!(record.devices[0].topic.as_deref(), Some("desk"));
    }
}
