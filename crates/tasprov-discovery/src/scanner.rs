//! Bounded-concurrency identity sweep over an address range

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tasprov_core::{DeviceRecord, DiscoveryMethod, DEFAULT_DEVICE_PORT};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::identity::IdentityProbe;
use crate::range::AddressRange;

/// Maximum number of identity probes in flight at once
pub const DEFAULT_CONCURRENCY: usize = 200;

/// Scanner configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Identity endpoint port
    pub port: u16,
    /// Concurrency ceiling for probes
    pub concurrency: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DEVICE_PORT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Discovery scanner service
pub struct DiscoveryScanner {
    probe: Arc<dyn IdentityProbe>,
    config: ScannerConfig,
}

impl DiscoveryScanner {
    pub fn new(probe: Arc<dyn IdentityProbe>, config: ScannerConfig) -> Self {
        Self { probe, config }
    }

    /// Probe every host address in `range` and return the devices that answered.
    ///
    /// Results are in completion order, not address order.
    pub async fn scan(&self, range: &AddressRange) -> Vec<DeviceRecord> {
        info!(
            range = %range,
            hosts = range.host_count(),
            port = self.config.port,
            concurrency = self.config.concurrency,
            "Starting discovery scan"
        );

        let devices = self.scan_hosts(range.hosts()).await;

        info!("Scan complete: {} devices found in {}", devices.len(), range);
        devices
    }

    /// Probe an explicit list of hosts.
    ///
    /// Every probe runs to completion; misses (timeouts, refusals, non-Tasmota
    /// responses) are expected and only traced.
    pub async fn scan_hosts(&self, hosts: impl IntoIterator<Item = Ipv4Addr>) -> Vec<DeviceRecord> {
        let port = self.config.port;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut devices = Vec::new();
        let mut probed = 0usize;

        for host in hosts {
            // Hold a permit before spawning so live tasks never exceed the ceiling
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let probe = Arc::clone(&self.probe);
            probed += 1;

            tasks.spawn(async move {
                let _permit = permit;
                let ip = IpAddr::V4(host);
                match probe.query(ip, port).await {
                    Ok(identity) => {
                        debug!(ip = %ip, topic = %identity.topic, "Found Tasmota device");
                        Some(identity.into_record(ip, port, DiscoveryMethod::Scan))
                    }
                    Err(e) => {
                        trace!(ip = %ip, error = %e, "No device");
                        None
                    }
                }
            });

            while let Some(result) = tasks.try_join_next() {
                collect(result, &mut devices);
            }
        }

        while let Some(result) = tasks.join_next().await {
            collect(result, &mut devices);
        }

        debug!("Probed {} hosts, found {} devices", probed, devices.len());
        devices
    }
}

fn collect(
    result: Result<Option<DeviceRecord>, tokio::task::JoinError>,
    devices: &mut Vec<DeviceRecord>,
) {
    match result {
        Ok(Some(device)) => devices.push(device),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Probe task failed"),
    }
}
