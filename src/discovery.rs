//! Device discovery via UDP broadcast.

use std::collections::HashMap;
use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::codec::{self, Channel, Message};
use crate::config::DiscoveryConfig;
use crate::device::DeviceIdentity;
use crate::errors::Error;
use crate::runtime::{self, AsyncUdpSocket, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Discover CozyLife devices on the local network using UDP broadcast.
///
/// Sends a burst of probe datagrams and collects [`Message::DiscoverReply`]
/// answers, deduplicated by serial. A serial answering from two addresses
/// keeps the most recent one.
///
/// Discovery is best-effort: socket and send failures are logged and yield
/// an empty list rather than an error, so a bad network moment can never
/// take the caller down.
///
/// # Examples
///
/// ```ignore
/// use cozylife_rs::{DiscoveryConfig, discover};
///
/// let devices = discover(&DiscoveryConfig::default()).await;
/// for device in devices {
///     println!("  {} - {:?}", device.address, device.serial);
/// }
/// ```
pub async fn discover(config: &DiscoveryConfig) -> Vec<DeviceIdentity> {
    match try_discover(config).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!("UDP discovery failed: {e}");
            Vec::new()
        }
    }
}

async fn try_discover(config: &DiscoveryConfig) -> Result<Vec<DeviceIdentity>> {
    // The socket lives for exactly one pass and is closed on every exit
    // path when it drops.
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::socket("bind", e))?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::socket("set_broadcast", e))?;

    let probe = codec::encode(&Message::DiscoverProbe {
        sn: codec::next_token(),
    });
    let target = format!("{}:{}", config.broadcast_addr, config.port);

    let mut discovered: HashMap<String, DeviceIdentity> = HashMap::new();
    let mut buffer = [0u8; 2048];
    let mut consecutive_timeouts = 0u32;

    for attempt in 1..=config.broadcast_attempts {
        socket
            .send_to(&probe, &target)
            .await
            .map_err(|e| Error::socket("send_to", e))?;
        debug!(
            "sent discovery broadcast {attempt}/{}",
            config.broadcast_attempts
        );
        runtime::sleep(config.inter_send_delay).await;

        // Drain whatever replies queued up behind this send; the first
        // quiet receive moves on to the next broadcast.
        loop {
            match runtime::timeout(config.recv_timeout, socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, addr))) => {
                    consecutive_timeouts = 0;
                    collect_reply(&buffer[..len], addr, &mut discovered);
                }
                Ok(Err(e)) => {
                    debug!("discovery receive error: {e}");
                    break;
                }
                Err(_) => {
                    consecutive_timeouts += 1;
                    break;
                }
            }
        }
    }

    // Keep listening after the last broadcast until the network stays quiet
    // long enough that no more devices will answer.
    while consecutive_timeouts < config.max_consecutive_timeouts {
        match runtime::timeout(config.recv_timeout, socket.recv_from(&mut buffer)).await {
            Ok(Ok((len, addr))) => {
                consecutive_timeouts = 0;
                collect_reply(&buffer[..len], addr, &mut discovered);
            }
            Ok(Err(e)) => {
                debug!("discovery receive error: {e}");
                break;
            }
            Err(_) => consecutive_timeouts += 1,
        }
    }

    info!("UDP discovery found {} device(s)", discovered.len());
    Ok(discovered.into_values().collect())
}

fn collect_reply(
    bytes: &[u8],
    addr: SocketAddr,
    discovered: &mut HashMap<String, DeviceIdentity>,
) {
    let SocketAddr::V4(v4) = addr else { return };
    match codec::decode(bytes, Channel::Udp) {
        Ok(Message::DiscoverReply { meta, .. }) => {
            debug!("discover reply from {} (serial {})", v4.ip(), meta.did);
            // A serial answering again, possibly from a new address, wins
            // the slot.
            discovered.insert(meta.did.clone(), DeviceIdentity::from_meta(*v4.ip(), &meta));
        }
        Ok(other) => {
            debug!(
                "ignoring unexpected {} during discovery",
                other.kind_name()
            );
        }
        Err(e) => debug!("ignoring undecodable datagram from {}: {e}", v4.ip()),
    }
}
