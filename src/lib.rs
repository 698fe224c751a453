//! # cozylife_rs
//!
//! An async Rust library for controlling CozyLife smart lights and switches
//! over the local network, with no cloud dependency.
//!
//! This crate provides a **runtime-agnostic** async API to discover CozyLife
//! devices on your LAN and drive them through persistent TCP control
//! sessions: power, brightness, color temperature, and hue/saturation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cozylife_rs::{
//!     DataPointMap, DiscoveryConfig, DiscoveryCoordinator, PowerState, ScanConfig,
//!     SessionConfig, SessionRegistry,
//! };
//!
//! // Works with any async runtime!
//! async fn turn_everything_on() -> Result<(), cozylife_rs::Error> {
//!     // Find devices via UDP broadcast and hostname scanning
//!     let coordinator = DiscoveryCoordinator::new(
//!         DiscoveryConfig::default(),
//!         ScanConfig::new("192.168.1.10".parse().unwrap()),
//!     );
//!
//!     let mut registry = SessionRegistry::new(SessionConfig::default());
//!     for identity in coordinator.run(&[]).await {
//!         let session = registry.insert(&identity);
//!         session.control(&DataPointMap::from(&PowerState::On)).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Runtime Agnostic**: Works with tokio, async-std, or smol async runtimes
//! - **UDP Discovery**: Locate devices with broadcast probes via [`discover`]
//! - **Hostname Scanning**: Sweep the local /24 for device hostnames via [`scan`]
//! - **Coordinated Discovery**: Merge every mechanism with [`DiscoveryCoordinator`]
//! - **Stateful Sessions**: Acknowledged control with automatic reconnection
//!   and availability tracking via [`SessionClient`]
//! - **Typed Data Points**: [`PowerState`], [`Brightness`], [`ColorTemp`],
//!   [`HueSaturation`], [`WorkMode`] over a [`DataPointMap`]
//! - **Session Registry**: Map device identities to sessions with
//!   [`SessionRegistry`]
//!
//! ## Communication
//!
//! Devices are discovered over UDP on port 6095 and controlled over TCP on
//! port 5555. Every control command waits for the device acknowledgment
//! (bounded at two seconds) before it is considered committed; the local
//! state cache is updated optimistically and reconciled by a background
//! query shortly after, so callers stay responsive without silently drifting
//! from real device state.
//!
//! ## Runtime Selection
//!
//! This library is runtime-agnostic. Select your preferred runtime using
//! feature flags:
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! cozylife-rs = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! cozylife-rs = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! cozylife-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod codec;
mod config;
mod coordinator;
mod device;
mod discovery;
mod errors;
mod history;
mod points;
mod profile;
mod registry;
pub mod runtime;
mod scanner;
mod session;
mod types;

// Re-export public API
pub use codec::{Channel, DecodeError, DeviceMeta, Message, decode, encode, next_token, split_frames};
pub use config::{
    DiscoveryConfig, HOSTNAME_PREFIX, ScanConfig, SessionConfig, TCP_PORT, UDP_DISCOVERY_PORT,
    parse_manual_addresses,
};
pub use coordinator::DiscoveryCoordinator;
pub use device::{DedupeKey, DeviceIdentity};
pub use discovery::discover;
pub use errors::Error;
pub use history::{Direction, HistoryEntry, HistorySummary, MessageHistory};
pub use points::{DataPointMap, DpValue};
pub use profile::{DeviceKind, dp};
pub use registry::SessionRegistry;
pub use scanner::{HostnameResolver, SystemResolver, scan, scan_with};
pub use session::SessionClient;
pub use types::{Brightness, ColorTemp, HueSaturation, PowerState, WorkMode};
