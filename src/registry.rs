//! Registry mapping device identities to their control sessions.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::debug;

use crate::config::SessionConfig;
use crate::device::{DedupeKey, DeviceIdentity};
use crate::errors::Error;
use crate::session::SessionClient;

type Result<T> = std::result::Result<T, Error>;

/// Maps discovered devices to their [`SessionClient`] instances.
///
/// The entity layer looks sessions up here to issue commands and to poll
/// availability. Sessions for devices with a confirmed serial are keyed by
/// serial; provisional devices are keyed by address until their first
/// device-info exchange. Tearing the registry down with [`close_all`]
/// releases every connection, mirroring integration unload.
///
/// [`close_all`]: SessionRegistry::close_all
#[derive(Debug, Default)]
pub struct SessionRegistry {
    config: SessionConfig,
    sessions: HashMap<DedupeKey, Arc<SessionClient>>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        SessionRegistry {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Register a session for `identity`, reusing the existing one if the
    /// same device was inserted before.
    pub fn insert(&mut self, identity: &DeviceIdentity) -> Arc<SessionClient> {
        let key = identity.dedupe_key();
        if let Some(existing) = self.sessions.get(&key) {
            return Arc::clone(existing);
        }
        debug!("registering session for {}", identity.address);
        let client = SessionClient::new(identity, self.config.clone());
        self.sessions.insert(key, Arc::clone(&client));
        client
    }

    /// Look up a session by confirmed device serial.
    pub fn get(&self, serial: &str) -> Option<Arc<SessionClient>> {
        self.sessions
            .get(&DedupeKey::Serial(serial.to_string()))
            .cloned()
    }

    /// Look up a session by device address, regardless of how it is keyed.
    pub fn get_by_address(&self, address: Ipv4Addr) -> Option<Arc<SessionClient>> {
        self.sessions
            .values()
            .find(|client| client.address() == address)
            .cloned()
    }

    /// Remove the session for `serial` and close its connection.
    pub async fn remove(&mut self, serial: &str) -> Result<()> {
        match self.sessions.remove(&DedupeKey::Serial(serial.to_string())) {
            Some(client) => {
                client.close().await;
                Ok(())
            }
            None => Err(Error::DeviceNotFound(serial.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate over every registered session.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SessionClient>> {
        self.sessions.values()
    }

    /// How many registered devices currently report available.
    pub fn available_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|client| client.available())
            .count()
    }

    /// Close every session and clear the registry. Idempotent.
    pub async fn close_all(&mut self) {
        for client in self.sessions.values() {
            client.close().await;
        }
        self.sessions.clear();
        debug!("session registry cleared");
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod tests {
    use super::*;
    use crate::codec::DeviceMeta;

    fn confirmed(addr: &str, serial: &str) -> DeviceIdentity {
        DeviceIdentity::from_meta(
            addr.parse().unwrap(),
            &DeviceMeta {
                did: serial.to_string(),
                pid: None,
                name: None,
                dtp: None,
                dpid: None,
            },
        )
    }

    #[tokio::test]
    async fn test_insert_reuses_session_for_same_device() {
        let mut registry = SessionRegistry::new(SessionConfig::default());
        let a = registry.insert(&confirmed("192.168.1.50", "ABC123"));
        let b = registry.insert(&confirmed("192.168.1.50", "ABC123"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_by_serial_and_address() {
        let mut registry = SessionRegistry::new(SessionConfig::default());
        registry.insert(&confirmed("192.168.1.50", "ABC123"));
        registry.insert(&DeviceIdentity::provisional("192.168.1.77".parse().unwrap()));

        assert!(registry.get("ABC123").is_some());
        assert!(registry.get("NOPE").is_none());
        assert!(
            registry
                .get_by_address("192.168.1.77".parse().unwrap())
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_remove_unknown_serial_errors() {
        let mut registry = SessionRegistry::new(SessionConfig::default());
        let err = registry.remove("ABC123").await.unwrap_err();
        assert_eq!(err, Error::DeviceNotFound("ABC123".into()));
    }

    #[tokio::test]
    async fn test_close_all_clears_registry() {
        let mut registry = SessionRegistry::new(SessionConfig::default());
        registry.insert(&confirmed("192.168.1.50", "ABC123"));
        registry.insert(&confirmed("192.168.1.51", "DEF456"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.available_count(), 0);

        registry.close_all().await;
        assert!(registry.is_empty());
        registry.close_all().await;
    }
}
