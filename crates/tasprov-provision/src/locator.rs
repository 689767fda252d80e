//! Finding the serial port a Tasmota device is attached to

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SerialError;
use crate::serial::SerialOpener;

/// Probe written to each candidate port
const STATUS_PROBE: &[u8] = b"\nStatus\n";

/// Marker that appears in the console echo of a Tasmota device
const IDENTITY_MARKER: &[u8] = b"Status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorOptions {
    /// Read timeout while probing a port
    pub timeout: Duration,
    /// How long to collect the reply
    pub read_window: Duration,
    /// Maximum reply bytes inspected
    pub max_reply: usize,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            read_window: Duration::from_secs(1),
            max_reply: 128,
        }
    }
}

/// Return the first port, in enumeration order, whose device answers the status probe.
///
/// Ports that cannot be opened or probed are skipped.
pub fn locate_device(opener: &dyn SerialOpener, options: &LocatorOptions) -> Option<String> {
    let ports = match opener.list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate serial ports");
            return None;
        }
    };

    debug!("Probing {} serial ports", ports.len());

    for port in ports {
        match probe_port(opener, &port, options) {
            Ok(true) => {
                info!(port = %port, "Found Tasmota device on serial port");
                return Some(port);
            }
            Ok(false) => debug!(port = %port, "No Tasmota response"),
            Err(e) => debug!(port = %port, error = %e, "Skipping serial port"),
        }
    }

    None
}

fn probe_port(
    opener: &dyn SerialOpener,
    port: &str,
    options: &LocatorOptions,
) -> Result<bool, SerialError> {
    let mut link = opener.open(port, options.timeout)?;
    link.write_bytes(STATUS_PROBE)?;
    let reply = link.read_window(options.max_reply, options.read_window)?;
    Ok(contains(&reply, IDENTITY_MARKER))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
