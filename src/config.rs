//! Policy configuration for discovery and sessions.
//!
//! Every timeout and limit the crate applies lives in one of these structs;
//! nothing is read from global state.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::errors::Error;

/// TCP control port used by every device.
pub const TCP_PORT: u16 = 5555;

/// UDP discovery port devices listen on.
pub const UDP_DISCOVERY_PORT: u16 = 6095;

/// Hostname prefix devices announce via reverse DNS.
pub const HOSTNAME_PREFIX: &str = "CozyLife_";

/// Tuning for one UDP broadcast discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where probes are sent. The subnet broadcast address in production;
    /// tests point this at loopback.
    pub broadcast_addr: Ipv4Addr,
    pub port: u16,
    /// How many probe datagrams to send. Repeats improve delivery odds on
    /// lossy networks.
    pub broadcast_attempts: u32,
    /// Pause between probe sends.
    pub inter_send_delay: Duration,
    /// Deadline for each receive poll.
    pub recv_timeout: Duration,
    /// Stop listening after this many receive timeouts in a row.
    pub max_consecutive_timeouts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            broadcast_addr: Ipv4Addr::BROADCAST,
            port: UDP_DISCOVERY_PORT,
            broadcast_attempts: 5,
            inter_send_delay: Duration::from_millis(100),
            recv_timeout: Duration::from_millis(500),
            max_consecutive_timeouts: 3,
        }
    }
}

/// Tuning for the /24 hostname sweep.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// A local address inside the subnet to sweep. The scan covers every
    /// other host in its /24.
    pub local_addr: Ipv4Addr,
    /// Hostnames must start with this to count as a device.
    pub name_prefix: String,
    /// Upper bound on simultaneously outstanding lookups.
    pub concurrency: usize,
    /// Deadline per host lookup.
    pub per_host_timeout: Duration,
}

impl ScanConfig {
    /// Scan policy defaults for the subnet around `local_addr`.
    pub fn new(local_addr: Ipv4Addr) -> Self {
        ScanConfig {
            local_addr,
            name_prefix: HOSTNAME_PREFIX.to_string(),
            concurrency: 100,
            per_host_timeout: Duration::from_secs(2),
        }
    }
}

/// Tuning for one device control session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for establishing the TCP connection (and the device-info
    /// exchange that follows it).
    pub connect_timeout: Duration,
    /// Deadline for a query reply.
    pub response_timeout: Duration,
    /// Deadline for a control acknowledgment. Deliberately short: a command
    /// that is not confirmed quickly is reported as failed rather than
    /// assumed delivered.
    pub ack_timeout: Duration,
    /// Pause before the post-control reconcile query.
    pub refresh_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(2),
            refresh_delay: Duration::from_millis(500),
        }
    }
}

/// Parse the comma-separated manual address list from the setup flow.
///
/// Whitespace around entries is tolerated and empty entries are skipped;
/// anything that is not an IPv4 address is a configuration error.
///
/// # Examples
///
/// ```
/// use cozylife_rs::parse_manual_addresses;
///
/// let addrs = parse_manual_addresses("192.168.1.50, 192.168.1.51").unwrap();
/// assert_eq!(addrs.len(), 2);
/// assert!(parse_manual_addresses("not-an-ip").is_err());
/// ```
pub fn parse_manual_addresses(input: &str) -> Result<Vec<Ipv4Addr>, Error> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse().map_err(|_| Error::invalid_address(entry)))
        .collect()
}
