//! Discover all CozyLife devices on the network and toggle their power.
//!
//! This example demonstrates:
//! - UDP broadcast discovery
//! - Opening a control session and querying device state
//! - Acknowledged control commands
//!
//! Run with: cargo run --example discover_and_toggle

use cozylife_rs::{
    DataPointMap, DiscoveryConfig, PowerState, SessionClient, SessionConfig, discover,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Discovering CozyLife devices on the network...");

    let devices = discover(&DiscoveryConfig::default()).await;
    if devices.is_empty() {
        println!("No devices found on the network.");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for device in &devices {
        println!(
            "  - IP: {}, serial: {}",
            device.address,
            device.serial.as_deref().unwrap_or("(unconfirmed)")
        );
    }

    println!("\nToggling each device...");
    for device in devices {
        let session = SessionClient::new(&device, SessionConfig::default());

        let points = match session.query(&[]).await {
            Ok(points) => points,
            Err(e) => {
                eprintln!("  ✗ Could not query {}: {}", device.address, e);
                continue;
            }
        };

        let current = points.power_state().unwrap_or(PowerState::Off);
        let target = DataPointMap::from(&current.toggled());

        match session.control(&target).await {
            Ok(()) => println!("  ✓ Toggled {} {:?}", device.address, current.toggled()),
            Err(e) => eprintln!("  ✗ Failed to toggle {}: {}", device.address, e),
        }
        session.close().await;
    }

    println!("\nDone!");
    Ok(())
}
