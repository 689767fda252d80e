//! tasprov Discovery - Network discovery of Tasmota devices
//!
//! Sweeps an IPv4 range and asks every host for its Tasmota identity over
//! HTTP (`/cm?cmnd=Status`). Probes run concurrently under a fixed ceiling.

pub mod identity;
pub mod range;
pub mod scanner;

pub use identity::{
    parse_identity, HttpIdentityProbe, Identity, IdentityError, IdentityProbe, PROBE_TIMEOUT,
};
pub use range::{AddressRange, RangeError};
pub use scanner::{DiscoveryScanner, ScannerConfig, DEFAULT_CONCURRENCY};
