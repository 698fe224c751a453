//! CLI application for controlling CozyLife devices.
//!
//! This example demonstrates discovery and session control from the command
//! line.
//!
//! Run with: cargo run --example cozy_cli -- --help

use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;

use cozylife_rs::{
    Brightness, ColorTemp, DataPointMap, DiscoveryConfig, DiscoveryCoordinator, HueSaturation,
    PowerState, ScanConfig, SessionClient, SessionConfig,
};

#[derive(Parser)]
#[command(name = "cozy-cli")]
#[command(about = "Control CozyLife smart devices from the command line", long_about = None)]
struct Cli {
    /// IP address of the device (not required for the discover command)
    #[arg(short, long, global = true)]
    ip: Option<Ipv4Addr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover all CozyLife devices on the network
    Discover {
        /// Local address whose /24 subnet should also be hostname-scanned
        #[arg(short, long)]
        local_ip: Option<Ipv4Addr>,
    },

    /// Query the current data points of the device
    Status,

    /// Turn the device on
    On,

    /// Turn the device off
    Off,

    /// Set brightness on the device scale (0-1000)
    Brightness {
        /// Brightness level (0-1000)
        #[arg(value_parser = clap::value_parser!(u16).range(0..=1000))]
        level: u16,
    },

    /// Set color temperature in Kelvin (2000-6500)
    Temperature {
        /// Temperature in Kelvin (2000-6500)
        #[arg(value_parser = clap::value_parser!(u16).range(2000..=6500))]
        kelvin: u16,
    },

    /// Set hue (0-360) and saturation (0-1000)
    Color {
        /// Hue in degrees (0-360)
        #[arg(value_parser = clap::value_parser!(u16).range(0..=360))]
        hue: u16,
        /// Saturation (0-1000)
        #[arg(value_parser = clap::value_parser!(u16).range(0..=1000))]
        saturation: u16,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Discover { local_ip } = &cli.command {
        let scan_addr = local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let coordinator =
            DiscoveryCoordinator::new(DiscoveryConfig::default(), ScanConfig::new(scan_addr));

        println!("Discovering CozyLife devices on the network...");
        let devices = coordinator.run(&[]).await;
        if devices.is_empty() {
            println!("No devices found on the network.");
            return Ok(());
        }

        println!("Found {} device(s):", devices.len());
        for device in devices {
            println!(
                "  - IP: {}, serial: {}, pid: {}",
                device.address,
                device.serial.as_deref().unwrap_or("(unconfirmed)"),
                device.pid.as_deref().unwrap_or("(unknown)"),
            );
        }
        return Ok(());
    }

    let ip = cli
        .ip
        .ok_or("an --ip address is required for device commands")?;
    let session = SessionClient::from_address(ip, SessionConfig::default());

    let mut points = DataPointMap::new();
    match cli.command {
        Commands::Discover { .. } => unreachable!(),
        Commands::Status => {
            let points = session.query(&[]).await?;
            println!("Device {ip} data points:");
            for (index, value) in points.iter() {
                println!("  dp {index}: {value:?}");
            }
            session.close().await;
            return Ok(());
        }
        Commands::On => points.power(&PowerState::On),
        Commands::Off => points.power(&PowerState::Off),
        Commands::Brightness { level } => {
            points.power(&PowerState::On);
            points.brightness(&Brightness::create(level).expect("validated by clap"));
        }
        Commands::Temperature { kelvin } => {
            points.power(&PowerState::On);
            points.color_temp(&ColorTemp::from_kelvin(kelvin));
        }
        Commands::Color { hue, saturation } => {
            points.power(&PowerState::On);
            points.hue_saturation(
                &HueSaturation::create(hue, saturation).expect("validated by clap"),
            );
        }
    }

    match session.control(&points).await {
        Ok(()) => println!("✓ Command acknowledged by {ip}"),
        Err(e) => eprintln!("✗ Command failed for {ip}: {e}"),
    }
    session.close().await;
    Ok(())
}
