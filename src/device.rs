//! Device identity records produced by discovery.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::codec::DeviceMeta;
use crate::config::TCP_PORT;

/// The key a device is deduplicated under.
///
/// Serials are authoritative: two identities with matching serials are the
/// same device even at different addresses. Identities that have not
/// confirmed a serial yet fall back to address equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupeKey {
    Serial(String),
    Address(Ipv4Addr),
}

/// An immutable record of a discovered device.
///
/// Created once at discovery time and never mutated; a device that moves to
/// a new address shows up as a fresh identity with the same serial.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Network address the device answered from.
    pub address: Ipv4Addr,
    /// TCP control port.
    pub port: u16,
    /// Device serial identifier, once confirmed.
    pub serial: Option<String>,
    /// Product id, once confirmed.
    pub pid: Option<String>,
}

impl DeviceIdentity {
    /// A provisional identity known only by address (hostname scan, manual
    /// configuration). The serial is learned later by the session's first
    /// device-info exchange.
    pub fn provisional(address: Ipv4Addr) -> Self {
        DeviceIdentity {
            address,
            port: TCP_PORT,
            serial: None,
            pid: None,
        }
    }

    /// An identity confirmed by a discover or device-info reply.
    pub fn from_meta(address: Ipv4Addr, meta: &DeviceMeta) -> Self {
        DeviceIdentity {
            address,
            port: TCP_PORT,
            serial: Some(meta.did.clone()),
            pid: meta.pid.clone(),
        }
    }

    /// The key this identity deduplicates under.
    pub fn dedupe_key(&self) -> DedupeKey {
        match &self.serial {
            Some(serial) => DedupeKey::Serial(serial.clone()),
            None => DedupeKey::Address(self.address),
        }
    }

    /// Whether two identities refer to the same physical device.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozylife_rs::DeviceIdentity;
    ///
    /// let mut a = DeviceIdentity::provisional("192.168.1.50".parse().unwrap());
    /// let mut b = DeviceIdentity::provisional("192.168.1.60".parse().unwrap());
    /// a.serial = Some("ABC123".into());
    /// b.serial = Some("ABC123".into());
    /// assert!(a.same_device(&b));
    /// ```
    pub fn same_device(&self, other: &Self) -> bool {
        match (&self.serial, &other.serial) {
            (Some(a), Some(b)) => a == b,
            _ => self.address == other.address,
        }
    }

    /// `address:port` string usable for connecting.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_prefers_serial() {
        let addr: Ipv4Addr = "192.168.1.50".parse().unwrap();
        let provisional = DeviceIdentity::provisional(addr);
        assert_eq!(provisional.dedupe_key(), DedupeKey::Address(addr));

        let meta = DeviceMeta {
            did: "ABC123".into(),
            pid: Some("P1".into()),
            name: None,
            dtp: None,
            dpid: None,
        };
        let confirmed = DeviceIdentity::from_meta(addr, &meta);
        assert_eq!(
            confirmed.dedupe_key(),
            DedupeKey::Serial("ABC123".to_string())
        );
        assert_eq!(confirmed.port, TCP_PORT);
        assert_eq!(confirmed.pid.as_deref(), Some("P1"));
    }

    #[test]
    fn test_provisional_identity_compares_by_address() {
        let a = DeviceIdentity::provisional("192.168.1.50".parse().unwrap());
        let b = DeviceIdentity::provisional("192.168.1.50".parse().unwrap());
        let c = DeviceIdentity::provisional("192.168.1.51".parse().unwrap());
        assert!(a.same_device(&b));
        assert!(!a.same_device(&c));
    }
}
