//! Serial (UART) access and command-by-command provisioning

use serialport::{ClearBuffer, SerialPort};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tasprov_core::{ProvisionMethod, ProvisionOutcome, ProvisionResponses, ProvisionSettings};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, SerialError};

/// Tasmota console baud rate
pub const TASMOTA_BAUD_RATE: u32 = 115_200;

/// A byte-oriented connection to one serial device.
///
/// Dropping the link closes the port.
pub trait SerialLink: Send {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), SerialError>;

    /// Read whatever the device has already emitted, without waiting
    fn read_pending(&mut self) -> Result<Vec<u8>, SerialError>;

    /// Read up to `max` bytes, giving up after `window`
    fn read_window(&mut self, max: usize, window: Duration) -> Result<Vec<u8>, SerialError>;

    /// Drop any bytes buffered on the input side
    fn discard_input(&mut self) -> Result<(), SerialError>;

    fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write_bytes(&data)
    }
}

/// Enumerates and opens serial ports
pub trait SerialOpener: Send + Sync {
    /// Port names in enumeration order
    fn list_ports(&self) -> Result<Vec<String>, SerialError>;

    /// Open a port exclusively with the given read timeout
    fn open(&self, port: &str, timeout: Duration) -> Result<Box<dyn SerialLink>, SerialError>;
}

/// Serial ports of the local machine
#[derive(Debug, Clone, Copy)]
pub struct SystemSerial {
    baud_rate: u32,
}

impl SystemSerial {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SystemSerial {
    fn default() -> Self {
        Self::new(TASMOTA_BAUD_RATE)
    }
}

impl SerialOpener for SystemSerial {
    fn list_ports(&self) -> Result<Vec<String>, SerialError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }

    fn open(&self, port: &str, timeout: Duration) -> Result<Box<dyn SerialLink>, SerialError> {
        let handle = serialport::new(port, self.baud_rate)
            .timeout(timeout)
            .open()?;

        debug!(port = %port, baud = self.baud_rate, "Opened serial port");

        Ok(Box::new(PortLink {
            name: port.to_string(),
            port: handle,
        }))
    }
}

/// An open hardware serial port
struct PortLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink for PortLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_pending(&mut self) -> Result<Vec<u8>, SerialError> {
        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        let n = match self.port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        buf.truncate(n);
        Ok(buf)
    }

    fn read_window(&mut self, max: usize, window: Duration) -> Result<Vec<u8>, SerialError> {
        let deadline = Instant::now() + window;
        let mut out = Vec::with_capacity(max);
        let mut chunk = [0u8; 128];

        while out.len() < max && Instant::now() < deadline {
            let want = (max - out.len()).min(chunk.len());
            match self.port.read(&mut chunk[..want]) {
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(out)
    }

    fn discard_input(&mut self) -> Result<(), SerialError> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

impl Drop for PortLink {
    fn drop(&mut self) {
        debug!(port = %self.name, "Closed serial port");
    }
}

/// Timing of a serial provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialOptions {
    /// Read timeout of the port
    pub read_timeout: Duration,
    /// Wait after opening; opening the port resets most ESP boards
    pub boot_wait: Duration,
    /// Wait after each command before collecting the device's answer
    pub settle: Duration,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            boot_wait: Duration::from_millis(1500),
            settle: Duration::from_millis(500),
        }
    }
}

/// Commands delivered so far and what the device answered to each
#[derive(Debug, Default)]
pub struct SerialTranscript {
    pub commands_sent: Vec<String>,
    pub responses: BTreeMap<String, String>,
}

impl SerialTranscript {
    fn into_outcome(self, error: Option<String>) -> ProvisionOutcome {
        let responses = ProvisionResponses::PerCommand(self.responses);
        match error {
            None => ProvisionOutcome::succeeded(ProvisionMethod::Serial, self.commands_sent, responses),
            Some(e) => {
                ProvisionOutcome::failed(ProvisionMethod::Serial, self.commands_sent, responses, e)
            }
        }
    }
}

/// Send commands one line at a time, capturing the device output after each.
///
/// Stops at the first transport error; `transcript` keeps everything delivered
/// before it.
pub fn send_commands(
    link: &mut dyn SerialLink,
    commands: &[String],
    settle: Duration,
    transcript: &mut SerialTranscript,
) -> Result<(), SerialError> {
    for command in commands {
        link.write_line(command)?;
        transcript.commands_sent.push(command.clone());

        std::thread::sleep(settle);

        let output = link.read_pending()?;
        transcript
            .responses
            .insert(command.clone(), String::from_utf8_lossy(&output).into_owned());
    }
    Ok(())
}

/// Provisions a device attached to a local serial port
#[derive(Clone)]
pub struct SerialProvisioner {
    opener: Arc<dyn SerialOpener>,
    options: SerialOptions,
}

impl SerialProvisioner {
    pub fn new(opener: Arc<dyn SerialOpener>, options: SerialOptions) -> Self {
        Self { opener, options }
    }

    /// Run a provisioning session on `port`, blocking the calling thread
    pub fn provision_blocking(&self, port: &str, settings: &ProvisionSettings) -> ProvisionOutcome {
        let commands = settings.commands();
        let mut transcript = SerialTranscript::default();

        info!(port = %port, commands = commands.len(), "Provisioning over serial");

        match self.session(port, &commands, &mut transcript) {
            Ok(()) => {
                info!(port = %port, "Serial provisioning complete");
                transcript.into_outcome(None)
            }
            Err(e) => {
                warn!(
                    port = %port,
                    delivered = transcript.commands_sent.len(),
                    error = %e,
                    "Serial provisioning failed"
                );
                transcript.into_outcome(Some(e.to_string()))
            }
        }
    }

    /// Run a provisioning session on the blocking thread pool
    pub async fn provision(&self, port: &str, settings: &ProvisionSettings) -> ProvisionOutcome {
        let this = self.clone();
        let port_name = port.to_string();
        let settings_owned = settings.clone();

        match tokio::task::spawn_blocking(move || this.provision_blocking(&port_name, &settings_owned))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => ProvisionOutcome::failed(
                ProvisionMethod::Serial,
                Vec::new(),
                ProvisionResponses::default(),
                ProvisionError::Task(e.to_string()).to_string(),
            ),
        }
    }

    fn session(
        &self,
        port: &str,
        commands: &[String],
        transcript: &mut SerialTranscript,
    ) -> Result<(), SerialError> {
        // The link is closed when it goes out of scope, on every path
        let mut link = self.opener.open(port, self.options.read_timeout)?;

        std::thread::sleep(self.options.boot_wait);
        link.discard_input()?;

        send_commands(link.as_mut(), commands, self.options.settle, transcript)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Shared view of what happened on a fake port
    #[derive(Default)]
    pub struct PortLog {
        pub written: Mutex<Vec<String>>,
        pub discards: AtomicUsize,
        pub open_links: AtomicUsize,
    }

    /// Scripted serial link
    pub struct FakeLink {
        pub log: Arc<PortLog>,
        /// Writes at this zero-based index fail
        pub fail_write_at: Option<usize>,
        pub replies: VecDeque<Vec<u8>>,
        pub writes: usize,
    }

    impl FakeLink {
        pub fn new(log: Arc<PortLog>) -> Self {
            log.open_links.fetch_add(1, Ordering::SeqCst);
            Self {
                log,
                fail_write_at: None,
                replies: VecDeque::new(),
                writes: 0,
            }
        }
    }

    impl Drop for FakeLink {
        fn drop(&mut self) {
            self.log.open_links.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl SerialLink for FakeLink {
        fn write_bytes(&mut self, data: &[u8]) -> Result<(), SerialError> {
            let index = self.writes;
            self.writes += 1;
            if self.fail_write_at == Some(index) {
                return Err(SerialError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device unplugged",
                )));
            }
            self.log
                .written
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(data).into_owned());
            Ok(())
        }

        fn read_pending(&mut self) -> Result<Vec<u8>, SerialError> {
            Ok(self.replies.pop_front().unwrap_or_default())
        }

        fn read_window(&mut self, max: usize, _window: Duration) -> Result<Vec<u8>, SerialError> {
            let mut reply = self.replies.pop_front().unwrap_or_default();
            reply.truncate(max);
            Ok(reply)
        }

        fn discard_input(&mut self) -> Result<(), SerialError> {
            self.log.discards.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// How a fake port behaves when opened
    #[derive(Clone)]
    pub enum PortBehavior {
        Busy,
        Replies(Vec<Vec<u8>>),
        FailWriteAt(usize),
    }

    /// Opener over a fixed set of fake ports
    pub struct FakeOpener {
        pub ports: Vec<(String, PortBehavior)>,
        pub log: Arc<PortLog>,
        pub opened: Mutex<Vec<String>>,
    }

    impl FakeOpener {
        pub fn new(ports: Vec<(&str, PortBehavior)>) -> Self {
            Self {
                ports: ports.into_iter().map(|(n, b)| (n.to_string(), b)).collect(),
                log: Arc::new(PortLog::default()),
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    impl SerialOpener for FakeOpener {
        fn list_ports(&self) -> Result<Vec<String>, SerialError> {
            Ok(self.ports.iter().map(|(n, _)| n.clone()).collect())
        }

        fn open(&self, port: &str, _timeout: Duration) -> Result<Box<dyn SerialLink>, SerialError> {
            self.opened.lock().unwrap().push(port.to_string());
            let behavior = self
                .ports
                .iter()
                .find(|(n, _)| n == port)
                .map(|(_, b)| b.clone())
                .ok_or_else(|| {
                    SerialError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such port"))
                })?;

            let mut link = FakeLink::new(Arc::clone(&self.log));
            match behavior {
                PortBehavior::Busy => {
                    return Err(SerialError::Io(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "port busy",
                    )))
                }
                PortBehavior::Replies(replies) => link.replies = replies.into(),
                PortBehavior::FailWriteAt(index) => link.fail_write_at = Some(index),
            }
            Ok(Box::new(link))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn quick_options() -> SerialOptions {
        SerialOptions {
            read_timeout: Duration::from_millis(10),
            boot_wait: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }

    fn settings() -> ProvisionSettings {
        let mut settings = ProvisionSettings::new("192.168.1.100");
        settings.wifi_ssid = Some("lab".to_string());
        settings.wifi_password = Some("wifi-secret".to_string());
        settings
    }

    #[test]
    fn test_write_failure_on_third_command_keeps_first_two() {
        let opener = Arc::new(FakeOpener::new(vec![("/dev/ttyUSB0", PortBehavior::FailWriteAt(2))]));
        let provisioner = SerialProvisioner::new(opener.clone(), quick_options());

        let outcome = provisioner.provision_blocking("/dev/ttyUSB0", &settings());

        assert!(!outcome.ok);
        assert_eq!(outcome.method, ProvisionMethod::Serial);
        assert_eq!(outcome.commands_sent, vec!["SSID1 lab", "Password1 wifi-secret"]);
        match &outcome.responses {
            ProvisionResponses::PerCommand(map) => assert_eq!(map.len(), 2),
            other => panic!("unexpected responses {:?}", other),
        }
        assert!(outcome.error.unwrap().contains("device unplugged"));
        assert_eq!(opener.log.open_links.load(Ordering::SeqCst), 0, "port left open");
    }

    #[test]
    fn test_successful_session_captures_each_reply() {
        let replies: Vec<Vec<u8>> = settings()
            .commands()
            .iter()
            .map(|c| format!("RESULT = {{\"ack\":\"{}\"}}", c).into_bytes())
            .collect();
        let opener = Arc::new(FakeOpener::new(vec![("COM3", PortBehavior::Replies(replies))]));
        let provisioner = SerialProvisioner::new(opener.clone(), quick_options());

        let outcome = provisioner.provision_blocking("COM3", &settings());

        assert!(outcome.ok);
        assert_eq!(outcome.commands_sent, settings().commands());
        let ProvisionResponses::PerCommand(map) = &outcome.responses else {
            panic!("expected per-command responses");
        };
        assert!(map["MqttHost 192.168.1.100"].contains("MqttHost"));
        assert_eq!(
            opener.log.written.lock().unwrap().last().map(String::as_str),
            Some("Restart 1\n")
        );
        assert_eq!(opener.log.discards.load(Ordering::SeqCst), 1);
        assert_eq!(opener.log.open_links.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_failure_sends_nothing() {
        let opener = Arc::new(FakeOpener::new(vec![("COM1", PortBehavior::Busy)]));
        let provisioner = SerialProvisioner::new(opener, quick_options());

        let outcome = provisioner.provision_blocking("COM1", &settings());

        assert!(!outcome.ok);
        assert!(outcome.commands_sent.is_empty());
        assert!(outcome.error.unwrap().contains("port busy"));
    }

    #[tokio::test]
    async fn test_async_provision_runs_off_thread() {
        let opener = Arc::new(FakeOpener::new(vec![("COM4", PortBehavior::Replies(Vec::new()))]));
        let provisioner = SerialProvisioner::new(opener, quick_options());

        let outcome = provisioner.provision("COM4", &ProvisionSettings::new("broker")).await;
        assert!(outcome.ok);
        assert_eq!(outcome.commands_sent.last().map(String::as_str), Some("Restart 1"));
    }
}
