//! Hostname-based device discovery across the local /24 subnet.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

use futures::stream::{self, StreamExt};
use log::{debug, info};

use crate::config::ScanConfig;
use crate::device::DeviceIdentity;
use crate::runtime;

/// Reverse-hostname lookup, abstracted so scans can run against a fake
/// resolver in tests.
pub trait HostnameResolver: Send + Sync {
    /// Resolve the hostname for an address. `Ok(None)` means the address
    /// has no name, which is the expected outcome for most of a sweep.
    fn resolve(&self, addr: Ipv4Addr) -> impl Future<Output = io::Result<Option<String>>> + Send;
}

/// Resolver backed by the operating system (reverse DNS, mDNS, NetBIOS --
/// whatever the host is configured for).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostnameResolver for SystemResolver {
    async fn resolve(&self, addr: Ipv4Addr) -> io::Result<Option<String>> {
        // getnameinfo blocks, so it runs off the executor.
        runtime::spawn_blocking(move || {
            match dns_lookup::lookup_addr(&IpAddr::V4(addr)) {
                // Without a PTR record the lookup echoes the address back.
                Ok(name) if name == addr.to_string() => Ok(None),
                Ok(name) => Ok(Some(name)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }
}

/// Scan the /24 around `config.local_addr` for device hostnames.
///
/// See [`scan_with`]; this runs against the system resolver.
pub async fn scan(config: &ScanConfig) -> Vec<DeviceIdentity> {
    scan_with(&SystemResolver, config).await
}

/// Scan every other host in the /24 around `config.local_addr` with a
/// caller-supplied resolver.
///
/// At most `config.concurrency` lookups are in flight at once and each is
/// bounded by `config.per_host_timeout`. A lookup that times out or fails
/// means "no device at this address" and never disturbs its siblings.
/// Matches yield provisional identities; serials are confirmed later by the
/// session's first device-info exchange.
pub async fn scan_with<R: HostnameResolver>(
    resolver: &R,
    config: &ScanConfig,
) -> Vec<DeviceIdentity> {
    let octets = config.local_addr.octets();
    let candidates = (1u8..=254)
        .map(move |host| Ipv4Addr::new(octets[0], octets[1], octets[2], host))
        .filter(|addr| *addr != config.local_addr);

    let found: Vec<DeviceIdentity> = stream::iter(candidates)
        .map(|addr| check_host(resolver, addr, config))
        .buffer_unordered(config.concurrency)
        .filter_map(|candidate| async move { candidate })
        .collect()
        .await;

    info!("hostname scan found {} device(s)", found.len());
    found
}

async fn check_host<R: HostnameResolver>(
    resolver: &R,
    addr: Ipv4Addr,
    config: &ScanConfig,
) -> Option<DeviceIdentity> {
    match runtime::timeout(config.per_host_timeout, resolver.resolve(addr)).await {
        Ok(Ok(Some(hostname))) if hostname.starts_with(&config.name_prefix) => {
            info!("found device by hostname at {addr}: {hostname}");
            Some(DeviceIdentity::provisional(addr))
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("error resolving {addr}: {e}");
            None
        }
        // A quiet timeout is the normal outcome for an empty address.
        Err(_) => None,
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeResolver {
        names: HashMap<Ipv4Addr, String>,
        delay: Duration,
        /// Addresses whose lookup hangs past any per-host timeout.
        hang: Vec<Ipv4Addr>,
        /// Addresses whose lookup fails outright.
        fail: Vec<Ipv4Addr>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl FakeResolver {
        fn new(names: HashMap<Ipv4Addr, String>) -> Self {
            FakeResolver {
                names,
                delay: Duration::from_millis(1),
                hang: Vec::new(),
                fail: Vec::new(),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl HostnameResolver for FakeResolver {
        async fn resolve(&self, addr: Ipv4Addr) -> io::Result<Option<String>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result = if self.hang.contains(&addr) {
                runtime::sleep(Duration::from_secs(60)).await;
                Ok(None)
            } else if self.fail.contains(&addr) {
                Err(io::Error::new(
                    io::ErrorKind::NetworkUnreachable,
                    "network unreachable",
                ))
            } else {
                runtime::sleep(self.delay).await;
                Ok(self.names.get(&addr).cloned())
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn config() -> ScanConfig {
        let mut config = ScanConfig::new("192.168.1.10".parse().unwrap());
        config.per_host_timeout = Duration::from_millis(50);
        config
    }

    #[tokio::test]
    async fn test_scan_finds_prefixed_hostname() {
        let target: Ipv4Addr = "192.168.1.77".parse().unwrap();
        let resolver = FakeResolver::new(HashMap::from([
            (target, "CozyLife_abcd".to_string()),
            ("192.168.1.80".parse().unwrap(), "printer.lan".to_string()),
        ]));

        let found = scan_with(&resolver, &config()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, target);
        assert!(found[0].serial.is_none());
    }

    #[tokio::test]
    async fn test_scan_respects_concurrency_cap() {
        let resolver = FakeResolver {
            delay: Duration::from_millis(5),
            ..FakeResolver::new(HashMap::new())
        };
        let peak = Arc::clone(&resolver.peak);

        let mut config = config();
        config.concurrency = 8;
        scan_with(&resolver, &config).await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 8, "peak concurrency {peak} exceeded the cap");
        assert!(peak > 1, "scan never ran lookups concurrently");
    }

    #[tokio::test]
    async fn test_hanging_lookup_does_not_abort_siblings() {
        let target: Ipv4Addr = "192.168.1.77".parse().unwrap();
        let resolver = FakeResolver {
            hang: vec!["192.168.1.50".parse().unwrap()],
            fail: vec!["192.168.1.60".parse().unwrap()],
            ..FakeResolver::new(HashMap::from([(target, "CozyLife_abcd".to_string())]))
        };

        let found = scan_with(&resolver, &config()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, target);
    }

    #[tokio::test]
    async fn test_scan_skips_own_address() {
        let local: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let resolver =
            FakeResolver::new(HashMap::from([(local, "CozyLife_self".to_string())]));

        let found = scan_with(&resolver, &config()).await;
        assert!(found.is_empty());
    }
}
