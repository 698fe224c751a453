//! Merging device discovery from every mechanism.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use log::{debug, info};

use crate::config::{DiscoveryConfig, ScanConfig};
use crate::device::{DedupeKey, DeviceIdentity};
use crate::discovery;
use crate::scanner;

/// Runs UDP discovery and the hostname scan and merges their results with
/// manually configured addresses.
///
/// Owns nothing global: construct one per setup pass and drop it with the
/// owning integration. This is the only entry point the setup flow needs to
/// populate a device registry.
///
/// # Examples
///
/// ```ignore
/// use cozylife_rs::{DiscoveryConfig, DiscoveryCoordinator, ScanConfig};
///
/// let coordinator = DiscoveryCoordinator::new(
///     DiscoveryConfig::default(),
///     ScanConfig::new("192.168.1.10".parse().unwrap()),
/// );
/// let devices = coordinator.run(&[]).await;
/// ```
#[derive(Debug, Clone)]
pub struct DiscoveryCoordinator {
    discovery: DiscoveryConfig,
    scan: ScanConfig,
}

impl DiscoveryCoordinator {
    pub fn new(discovery: DiscoveryConfig, scan: ScanConfig) -> Self {
        DiscoveryCoordinator { discovery, scan }
    }

    /// One full discovery pass.
    ///
    /// Both mechanisms run concurrently; results are deduplicated by serial,
    /// falling back to address equality for identities that have not
    /// confirmed a serial yet.
    pub async fn run(&self, manual: &[Ipv4Addr]) -> Vec<DeviceIdentity> {
        let (udp, hostnames) = futures::join!(
            discovery::discover(&self.discovery),
            scanner::scan(&self.scan),
        );
        let manual: Vec<DeviceIdentity> = manual
            .iter()
            .copied()
            .map(DeviceIdentity::provisional)
            .collect();

        let merged = merge_identities(udp, hostnames, manual);
        info!("discovery pass complete: {} device(s)", merged.len());
        merged
    }
}

/// Merge the three sources into one deduplicated list.
///
/// Serial-bearing identities are inserted first so that a provisional
/// duplicate of an already confirmed device collapses onto it regardless of
/// which scan produced it.
fn merge_identities(
    udp: Vec<DeviceIdentity>,
    hostnames: Vec<DeviceIdentity>,
    manual: Vec<DeviceIdentity>,
) -> Vec<DeviceIdentity> {
    let mut by_key: HashMap<DedupeKey, DeviceIdentity> = HashMap::new();
    let mut known_addrs: HashSet<Ipv4Addr> = HashSet::new();

    for identity in udp.into_iter().chain(hostnames).chain(manual) {
        match identity.dedupe_key() {
            key @ DedupeKey::Serial(_) => {
                known_addrs.insert(identity.address);
                by_key.insert(key, identity);
            }
            DedupeKey::Address(addr) => {
                if known_addrs.contains(&addr) {
                    debug!("dropping duplicate candidate at {addr}");
                    continue;
                }
                known_addrs.insert(addr);
                by_key.insert(DedupeKey::Address(addr), identity);
            }
        }
    }

    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeviceMeta;

    fn confirmed(addr: &str, serial: &str) -> DeviceIdentity {
        DeviceIdentity::from_meta(
            addr.parse().unwrap(),
            &DeviceMeta {
                did: serial.to_string(),
                pid: Some("P1".into()),
                name: None,
                dtp: None,
                dpid: None,
            },
        )
    }

    fn provisional(addr: &str) -> DeviceIdentity {
        DeviceIdentity::provisional(addr.parse().unwrap())
    }

    #[test]
    fn test_merge_unions_distinct_devices() {
        let merged = merge_identities(
            vec![confirmed("192.168.1.50", "ABC123")],
            vec![provisional("192.168.1.77")],
            vec![provisional("192.168.1.200")],
        );
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_collapses_provisional_onto_confirmed() {
        // Hostname scan and manual config both name an address UDP already
        // confirmed a serial for.
        let merged = merge_identities(
            vec![confirmed("192.168.1.50", "ABC123")],
            vec![provisional("192.168.1.50")],
            vec![provisional("192.168.1.50")],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].serial.as_deref(), Some("ABC123"));
    }

    #[test]
    fn test_merge_dedupes_by_serial_across_addresses() {
        // The same serial seen at two addresses is one device; the later
        // sighting wins.
        let merged = merge_identities(
            vec![
                confirmed("192.168.1.50", "ABC123"),
                confirmed("192.168.1.60", "ABC123"),
            ],
            vec![],
            vec![],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].address, "192.168.1.60".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_merge_dedupes_provisional_addresses() {
        let merged = merge_identities(
            vec![],
            vec![provisional("192.168.1.77")],
            vec![provisional("192.168.1.77"), provisional("192.168.1.78")],
        );
        assert_eq!(merged.len(), 2);
    }
}
