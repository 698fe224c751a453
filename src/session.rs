//! Persistent per-device TCP control sessions.

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::{self, Channel, DeviceMeta, Message};
use crate::config::SessionConfig;
use crate::device::DeviceIdentity;
use crate::errors::Error;
use crate::history::{Direction, MessageHistory};
use crate::points::DataPointMap;
use crate::profile::DeviceKind;
use crate::runtime::{self, AsyncTcpStream, Mutex, TcpStream};

type Result<T> = std::result::Result<T, Error>;

/// Connection-scoped state. Holding the session mutex across a full
/// exchange is what keeps requests serialized per device.
#[derive(Default)]
struct SessionState {
    stream: Option<TcpStream>,
    meta: Option<DeviceMeta>,
    points: DataPointMap,
    carry: String,
}

/// A stateful control session with one device.
///
/// One instance per device, usually owned by a
/// [`SessionRegistry`](crate::SessionRegistry). The session keeps a
/// persistent TCP connection, recovers it on demand, and tracks
/// availability for the entity layer:
///
/// - Operations on one session never interleave; a second `control` cannot
///   start before the first's acknowledgment (or timeout) resolves.
/// - Any operation failure (timeout, reset, malformed reply) degrades the
///   session to disconnected and `available() == false`; the next
///   operation makes exactly one reconnection attempt before proceeding.
/// - Failures surface as [`Error`] values and state changes, never as
///   panics.
pub struct SessionClient {
    address: Ipv4Addr,
    port: u16,
    config: SessionConfig,
    state: Mutex<SessionState>,
    available: AtomicBool,
    last_error: std::sync::Mutex<Option<String>>,
    history: Mutex<MessageHistory>,
    weak_self: Weak<SessionClient>,
}

impl SessionClient {
    /// Create a session for a discovered device. No I/O happens until the
    /// first operation.
    pub fn new(identity: &DeviceIdentity, config: SessionConfig) -> Arc<Self> {
        Self::with_address(identity.address, identity.port, config)
    }

    /// Create a session for a bare address (manual configuration).
    pub fn from_address(address: Ipv4Addr, config: SessionConfig) -> Arc<Self> {
        Self::with_address(address, crate::config::TCP_PORT, config)
    }

    fn with_address(address: Ipv4Addr, port: u16, config: SessionConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| SessionClient {
            address,
            port,
            config,
            state: Mutex::new(SessionState::default()),
            available: AtomicBool::new(false),
            last_error: std::sync::Mutex::new(None),
            history: Mutex::new(MessageHistory::new()),
            weak_self: weak.clone(),
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Device availability as seen by the entity layer.
    ///
    /// True only while the connection is up and the last operation on it
    /// succeeded within its timeout. Readable without awaiting so adapters
    /// can poll it cheaply.
    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Message describing the most recent failure, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// Whether a connection handle currently exists. No I/O is performed;
    /// a half-dead link is only noticed by the next operation.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.stream.is_some()
    }

    /// Device metadata learned from the info exchange, if any.
    pub async fn meta(&self) -> Option<DeviceMeta> {
        self.state.lock().await.meta.clone()
    }

    /// Device serial, once the info exchange has confirmed one.
    pub async fn serial(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .meta
            .as_ref()
            .map(|meta| meta.did.clone())
    }

    /// The device kind, resolved from its metadata.
    pub async fn kind(&self) -> Option<DeviceKind> {
        self.state
            .lock()
            .await
            .meta
            .as_ref()
            .map(DeviceKind::for_meta)
    }

    /// Snapshot of the last known data-point values.
    pub async fn cached_points(&self) -> DataPointMap {
        self.state.lock().await.points.clone()
    }

    /// Snapshot of the recent protocol traffic, for diagnostics.
    pub async fn history(&self) -> MessageHistory {
        self.history.lock().await.clone()
    }

    /// Establish the connection and run the device-info exchange.
    ///
    /// Bounded by the configured connect timeout. Success marks the session
    /// available; failure records the error and leaves it disconnected.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match self.ensure_connected(&mut state).await {
            Ok(()) => {
                self.mark_success();
                Ok(())
            }
            Err(e) => Err(self.fail(&mut state, e).await),
        }
    }

    /// Query current data-point values.
    ///
    /// An empty `ids` slice asks for every point. Reconnects first if the
    /// session is down. The reply is merged into the cache and the updated
    /// snapshot returned; a timeout or mismatched reply marks the session
    /// unavailable.
    pub async fn query(&self, ids: &[u8]) -> Result<DataPointMap> {
        let mut state = self.state.lock().await;
        match self.query_inner(&mut state, ids).await {
            Ok(points) => {
                self.mark_success();
                Ok(points)
            }
            Err(e) => Err(self.fail(&mut state, e).await),
        }
    }

    /// Send a control request and wait for the device acknowledgment.
    ///
    /// Blocks until the matching ack arrives, bounded by the configured ack
    /// timeout; an unconfirmed command is reported as failed rather than
    /// assumed delivered. On ack the cache is updated with the requested
    /// values immediately and a detached background query reconciles the
    /// real device state shortly after (a device may clamp what it was
    /// sent) without blocking the caller. On failure the session becomes
    /// unavailable and the caller is expected to roll back its own
    /// optimistic state.
    pub async fn control(&self, points: &DataPointMap) -> Result<()> {
        if !points.is_valid() {
            return Err(Error::NoPoints);
        }

        {
            let mut state = self.state.lock().await;
            if let Err(e) = self.control_inner(&mut state, points).await {
                return Err(self.fail(&mut state, e).await);
            }
            // Optimistic update: assume the device applied exactly what was
            // asked until the reconcile query reports back.
            state.points.merge(points);
            self.mark_success();
        }

        self.spawn_reconcile();
        Ok(())
    }

    /// Release the connection. Idempotent and safe to call in any state.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.close_stream(&mut state).await;
        self.available.store(false, Ordering::SeqCst);
        debug!("session {} closed", self.address);
    }

    async fn query_inner(&self, state: &mut SessionState, ids: &[u8]) -> Result<DataPointMap> {
        self.ensure_connected(state).await?;

        let attrs = ids.to_vec();
        let reply = self
            .exchange(
                state,
                |sn| Message::QueryRequest { sn, attrs },
                self.config.response_timeout,
            )
            .await?;

        match reply {
            Message::QueryReply { points, .. } => {
                state.points.merge(&points);
                // Devices that never reported a dpid list reveal their
                // points through the first full query.
                if let Some(meta) = &mut state.meta
                    && meta.dpid.as_ref().is_none_or(|dpid| dpid.is_empty())
                {
                    meta.dpid = Some(points.indices());
                }
                Ok(state.points.clone())
            }
            _ => Err(Error::UnexpectedReply("query reply")),
        }
    }

    async fn control_inner(&self, state: &mut SessionState, points: &DataPointMap) -> Result<()> {
        self.ensure_connected(state).await?;

        let points = points.clone();
        let reply = self
            .exchange(
                state,
                move |sn| Message::ControlRequest { sn, points },
                self.config.ack_timeout,
            )
            .await?;

        match reply {
            Message::ControlAck { .. } => Ok(()),
            _ => Err(Error::UnexpectedReply("control ack")),
        }
    }

    /// Connect and learn the device identity if no handle exists yet.
    /// Exactly one attempt; retry policy belongs to the caller's next
    /// operation.
    async fn ensure_connected(&self, state: &mut SessionState) -> Result<()> {
        if state.stream.is_some() {
            return Ok(());
        }

        debug!("connecting to {}:{}", self.address, self.port);
        let addr = format!("{}:{}", self.address, self.port);
        let stream = match runtime::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::socket("connect", e)),
            Err(_) => return Err(Error::timeout("connect")),
        };
        state.stream = Some(stream);
        state.carry.clear();

        // Learn (or re-confirm) the identity before reporting available.
        let reply = self
            .exchange(
                state,
                |sn| Message::DeviceInfoRequest { sn },
                self.config.connect_timeout,
            )
            .await?;
        match reply {
            Message::DeviceInfoReply { meta, .. } => {
                info!(
                    "connected to {} (serial {}, pid {})",
                    self.address,
                    meta.did,
                    meta.pid.as_deref().unwrap_or("unknown")
                );
                state.meta = Some(meta);
                Ok(())
            }
            _ => Err(Error::UnexpectedReply("device info")),
        }
    }

    /// Send one request and await its correlation-matched reply within
    /// `read_timeout`. Frames carrying a different token are stale replies
    /// from an abandoned exchange and are skipped.
    async fn exchange<F>(
        &self,
        state: &mut SessionState,
        build: F,
        read_timeout: Duration,
    ) -> Result<Message>
    where
        F: FnOnce(String) -> Message,
    {
        let sn = codec::next_token();
        let request = build(sn.clone());
        let bytes = codec::encode(&request);
        self.history.lock().await.record(Direction::Send, &request);

        let SessionState { stream, carry, .. } = state;
        let stream = stream.as_mut().ok_or_else(|| {
            Error::socket(
                "send",
                io::Error::new(io::ErrorKind::NotConnected, "no connection"),
            )
        })?;

        stream
            .write_all(&bytes)
            .await
            .map_err(|e| Error::socket("send", e))?;

        let start = runtime::Instant::now();
        let mut buffer = [0u8; 2048];
        loop {
            let remaining = read_timeout
                .checked_sub(start.elapsed())
                .ok_or_else(|| Error::timeout("receive"))?;

            let len = match runtime::timeout(remaining, stream.read(&mut buffer)).await {
                Ok(Ok(0)) => {
                    return Err(Error::socket(
                        "receive",
                        io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "connection closed by device",
                        ),
                    ));
                }
                Ok(Ok(len)) => len,
                Ok(Err(e)) => return Err(Error::socket("receive", e)),
                Err(_) => return Err(Error::timeout("receive")),
            };

            let chunk = String::from_utf8_lossy(&buffer[..len]).into_owned();
            for frame in codec::split_frames(carry, &chunk) {
                let message = codec::decode(frame.as_bytes(), Channel::Tcp)?;
                if message.sn() == sn {
                    self.history.lock().await.record(Direction::Receive, &message);
                    return Ok(message);
                }
                debug!(
                    "skipping stale {} (sn {}) from {}",
                    message.kind_name(),
                    message.sn(),
                    self.address
                );
            }
        }
    }

    /// Degrade the session: drop the connection, flag unavailable, record
    /// the error, and hand it back for propagation.
    async fn fail(&self, state: &mut SessionState, error: Error) -> Error {
        warn!("session {} error: {error}", self.address);
        self.close_stream(state).await;
        self.available.store(false, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = Some(error.to_string());
        self.history.lock().await.record_error(&error.to_string());
        error
    }

    fn mark_success(&self) {
        self.available.store(true, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = None;
    }

    async fn close_stream(&self, state: &mut SessionState) {
        if let Some(mut stream) = state.stream.take() {
            let _ = stream.shutdown().await;
        }
        state.carry.clear();
    }

    /// Re-query actual device state shortly after a control ack, off the
    /// caller's path. The query takes the session mutex itself, so it
    /// queues behind whatever the caller does next.
    fn spawn_reconcile(&self) {
        let Some(client) = self.weak_self.upgrade() else {
            return;
        };
        runtime::spawn(async move {
            runtime::sleep(client.config.refresh_delay).await;
            if let Err(e) = client.query(&[]).await {
                debug!(
                    "post-control reconcile query failed for {}: {e}",
                    client.address
                );
            }
        })
        .detach();
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod tests {
    use super::*;
    use crate::points::DpValue;
    use crate::profile::dp;
    use crate::types::PowerState;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream as TokioStream};

    fn light_meta() -> DeviceMeta {
        DeviceMeta {
            did: "ABC123".into(),
            pid: Some("P1".into()),
            name: Some("Desk lamp".into()),
            dtp: Some("01".into()),
            dpid: Some(vec![1, 2, 3, 4]),
        }
    }

    /// Scriptable in-process device.
    struct FakeDevice {
        meta: DeviceMeta,
        state: StdMutex<DataPointMap>,
        ack_control: bool,
        ack_delay: Duration,
        /// Clamp ceiling applied to brightness writes.
        clamp_brightness: Option<i64>,
        /// Close the next connection right after its info exchange.
        drop_after_info: AtomicBool,
        control_received: StdMutex<Vec<Instant>>,
        ack_sent: StdMutex<Vec<Instant>>,
        query_count: StdMutex<usize>,
    }

    impl FakeDevice {
        fn new() -> Self {
            let mut state = DataPointMap::new();
            state.insert(dp::POWER, 0i64);
            state.insert(dp::BRIGHTNESS, 500i64);
            FakeDevice {
                meta: light_meta(),
                state: StdMutex::new(state),
                ack_control: true,
                ack_delay: Duration::ZERO,
                clamp_brightness: None,
                drop_after_info: AtomicBool::new(false),
                control_received: StdMutex::new(Vec::new()),
                ack_sent: StdMutex::new(Vec::new()),
                query_count: StdMutex::new(0),
            }
        }

        async fn handle(&self, stream: TokioStream) {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let message = codec::decode(line.as_bytes(), Channel::Tcp).unwrap();
                match message {
                    Message::DeviceInfoRequest { sn } => {
                        let reply = Message::DeviceInfoReply {
                            sn,
                            meta: self.meta.clone(),
                        };
                        write_half.write_all(&codec::encode(&reply)).await.unwrap();
                        if self.drop_after_info.swap(false, Ordering::SeqCst) {
                            return;
                        }
                    }
                    Message::QueryRequest { sn, .. } => {
                        *self.query_count.lock().unwrap() += 1;
                        let points = self.state.lock().unwrap().clone();
                        let reply = Message::QueryReply { sn, points };
                        write_half.write_all(&codec::encode(&reply)).await.unwrap();
                    }
                    Message::ControlRequest { sn, points } => {
                        self.control_received.lock().unwrap().push(Instant::now());
                        if !self.ack_control {
                            continue;
                        }
                        tokio::time::sleep(self.ack_delay).await;
                        {
                            let mut state = self.state.lock().unwrap();
                            for (index, value) in points.iter() {
                                let value = match (self.clamp_brightness, value) {
                                    (Some(max), DpValue::Int(v))
                                        if *index == dp::BRIGHTNESS && *v > max =>
                                    {
                                        DpValue::Int(max)
                                    }
                                    _ => *value,
                                };
                                state.insert(*index, value);
                            }
                        }
                        let ack = Message::ControlAck {
                            sn,
                            points: DataPointMap::new(),
                        };
                        write_half.write_all(&codec::encode(&ack)).await.unwrap();
                        self.ack_sent.lock().unwrap().push(Instant::now());
                    }
                    _ => {}
                }
            }
        }
    }

    async fn start_device(device: FakeDevice) -> (Arc<FakeDevice>, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = Arc::new(device);
        let accept_device = Arc::clone(&device);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let device = Arc::clone(&accept_device);
                tokio::spawn(async move { device.handle(stream).await });
            }
        });
        (device, port)
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(200),
            refresh_delay: Duration::from_millis(30),
        }
    }

    fn client_for(port: u16) -> Arc<SessionClient> {
        let identity = DeviceIdentity {
            address: Ipv4Addr::LOCALHOST,
            port,
            serial: None,
            pid: None,
        };
        SessionClient::new(&identity, test_config())
    }

    #[tokio::test]
    async fn test_connect_learns_device_info() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        assert!(!client.available());
        client.connect().await.unwrap();

        assert!(client.available());
        assert!(client.is_connected().await);
        assert_eq!(client.serial().await.as_deref(), Some("ABC123"));
        assert_eq!(client.kind().await, Some(DeviceKind::Light));
        assert!(client.last_error().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_last_error() {
        // Grab a port and close the listener so nothing accepts there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client_for(port);
        let err = client.connect().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!client.available());
        assert!(client.last_error().is_some());
    }

    #[tokio::test]
    async fn test_query_updates_cache() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        let points = client.query(&[]).await.unwrap();
        assert_eq!(points.get(dp::POWER), Some(&DpValue::Int(0)));
        assert_eq!(points.get(dp::BRIGHTNESS), Some(&DpValue::Int(500)));
        assert_eq!(client.cached_points().await, points);
        assert!(client.available());
    }

    #[tokio::test]
    async fn test_control_ack_updates_cache_optimistically() {
        let mut device = FakeDevice::new();
        // Keep the reconcile query away while the optimistic value is read.
        device.ack_delay = Duration::ZERO;
        let (device, port) = start_device(device).await;
        let client = client_for(port);

        let mut points = DataPointMap::new();
        points.power(&PowerState::On);
        client.control(&points).await.unwrap();

        assert!(client.available());
        assert_eq!(
            client.cached_points().await.get(dp::POWER),
            Some(&DpValue::Int(255))
        );
        assert_eq!(device.control_received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_control_without_ack_fails_and_degrades() {
        let mut device = FakeDevice::new();
        device.ack_control = false;
        let (_device, port) = start_device(device).await;
        let client = client_for(port);

        let err = client.control(&DataPointMap::from(&PowerState::On)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!client.available());
        assert!(!client.is_connected().await);
        assert!(client.last_error().is_some());
    }

    #[tokio::test]
    async fn test_control_rejects_empty_map() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        let err = client.control(&DataPointMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::NoPoints));
    }

    #[tokio::test]
    async fn test_query_reconnects_after_close() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        client.connect().await.unwrap();
        client.close().await;
        assert!(!client.available());
        assert!(!client.is_connected().await);

        // Next operation performs one reconnection attempt, then proceeds.
        let points = client.query(&[]).await.unwrap();
        assert!(points.is_valid());
        assert!(client.available());
    }

    #[tokio::test]
    async fn test_dropped_connection_recovers_on_next_operation() {
        let device = FakeDevice::new();
        device.drop_after_info.store(true, Ordering::SeqCst);
        let (_device, port) = start_device(device).await;
        let client = client_for(port);

        client.connect().await.unwrap();
        assert!(client.available());

        // The device hung up after the info exchange; the first query sees
        // the dead link and degrades the session.
        let err = client.query(&[]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!client.available());

        // The next query makes one reconnection attempt and succeeds on the
        // fresh connection.
        let points = client.query(&[]).await.unwrap();
        assert!(points.is_valid());
        assert!(client.available());
    }

    #[tokio::test]
    async fn test_controls_never_interleave() {
        let mut device = FakeDevice::new();
        device.ack_delay = Duration::from_millis(50);
        let (device, port) = start_device(device).await;
        let client = client_for(port);

        // Warm the connection so both controls pay only the exchange cost.
        client.connect().await.unwrap();
        let start = Instant::now();

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.control(&DataPointMap::from(&PowerState::On)).await
            })
        };
        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.control(&DataPointMap::from(&PowerState::Off)).await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(device.control_received.lock().unwrap().len(), 2);
        assert_eq!(device.ack_sent.lock().unwrap().len(), 2);
        // Serialized exchanges pay both ack delays back to back; an
        // interleaved pair would finish in roughly one delay.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_query_control_query_echoes_controlled_values() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        client.query(&[]).await.unwrap();

        let mut points = DataPointMap::new();
        points.insert(dp::POWER, 255i64);
        points.insert(dp::BRIGHTNESS, 800i64);
        client.control(&points).await.unwrap();

        let after = client.query(&[]).await.unwrap();
        assert_eq!(after.get(dp::POWER), Some(&DpValue::Int(255)));
        assert_eq!(after.get(dp::BRIGHTNESS), Some(&DpValue::Int(800)));
    }

    #[tokio::test]
    async fn test_reconcile_reports_clamped_value() {
        let mut device = FakeDevice::new();
        device.clamp_brightness = Some(1000);
        let (device, port) = start_device(device).await;
        let client = client_for(port);

        let mut points = DataPointMap::new();
        points.insert(dp::BRIGHTNESS, 1500i64);
        client.control(&points).await.unwrap();

        // Optimistic value first...
        assert_eq!(
            client.cached_points().await.get(dp::BRIGHTNESS),
            Some(&DpValue::Int(1500))
        );

        // ...then the background refresh reconciles to what the device
        // actually applied.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            client.cached_points().await.get(dp::BRIGHTNESS),
            Some(&DpValue::Int(1000))
        );
        assert!(*device.query_count.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        client.close().await;
        client.connect().await.unwrap();
        client.close().await;
        client.close().await;
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_history_records_exchanges() {
        let (_device, port) = start_device(FakeDevice::new()).await;
        let client = client_for(port);

        client.query(&[]).await.unwrap();
        let history = client.history().await;
        let kinds: Vec<_> = history.entries().iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains(&"device_info_request"));
        assert!(kinds.contains(&"query_reply"));
    }
}
