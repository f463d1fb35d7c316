//! hdcp2-rs - drive the HDCP 2.2 engine against simulated sinks.
//!
//! Authenticates a plain receiver and a repeater, then manages a stream set
//! on the repeater link.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hdcp_auth::{Engine, SimulatedReceiver};
use hdcp_core::context::StreamEntry;
use hdcp_core::ids::LinkType;
use hdcp_core::policy::AuthPolicy;
use hdcp_crypto::SoftwareGateway;
use tracing::{info, warn};

const DERIVATION_KEY: &[u8] = b"hdcp2-rs demo derivation key";

/// Command-line arguments
struct Args {
    /// Enable debug logging
    debug: bool,
    /// Link framing to simulate
    link_type: LinkType,
    /// Devices behind the simulated repeater
    devices: u8,
    /// JSON file overriding the retry/timeout policy
    policy: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            debug: false,
            link_type: LinkType::DisplayPort,
            devices: 3,
            policy: None,
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--iia" => {
                args.link_type = LinkType::Iia;
            }
            "--devices" | "-n" => {
                if let Some(n) = iter.next().and_then(|v| v.parse().ok()) {
                    args.devices = n;
                }
            }
            "--policy" | "-p" => {
                if let Some(path) = iter.next() {
                    args.policy = Some(PathBuf::from(path));
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("hdcp2-rs - HDCP 2.2 authentication against simulated sinks");
    println!();
    println!("Usage: hdcp2-rs [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --debug          Enable debug logging");
    println!("      --iia            Simulate the IIA framing (default: DisplayPort)");
    println!("  -n, --devices N      Devices behind the repeater (default: 3)");
    println!("  -p, --policy PATH    Load the retry/timeout policy from JSON");
    println!("  -h, --help           Show this help message");
}

fn load_policy(path: Option<&PathBuf>) -> Result<AuthPolicy> {
    let Some(path) = path else {
        return Ok(AuthPolicy::default());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading policy {}", path.display()))?;
    let policy = serde_json::from_str(&data).with_context(|| format!("parsing policy {}", path.display()))?;
    Ok(policy)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .init();

    let policy = load_policy(args.policy.as_ref())?;
    let engine = Engine::builder()
        .gateway(Arc::new(SoftwareGateway::new(DERIVATION_KEY.to_vec())))
        .policy(policy)
        .build()?;

    let session = engine.session_open().await;

    // Plain receiver
    let receiver = SimulatedReceiver::new(args.link_type, DERIVATION_KEY.to_vec(), [0x8B, 0xA4, 0x47, 0x42, 0xFB]);
    let rx_link = engine.link_open(session, args.link_type).await?;
    engine.authenticate(rx_link, &receiver).await?;
    info!(
        "{}: {} (encryption {})",
        rx_link,
        engine.link_state(rx_link).await?,
        engine.content_enabled(rx_link).await?
    );

    // Repeater with downstream devices
    let downstream = (0..args.devices).map(|i| [0x10, 0x20, 0x30, 0x40, i]).collect();
    let repeater = SimulatedReceiver::new(args.link_type, DERIVATION_KEY.to_vec(), [0x5A, 0x5A, 0x00, 0x00, 0x01])
        .repeater(downstream);
    let rp_link = engine.link_open(session, args.link_type).await?;
    match engine.authenticate(rp_link, &repeater).await {
        Ok(()) => {
            if let Some(list) = engine.receiver_id_list(rp_link).await? {
                info!("{}: {} downstream devices", rp_link, list.device_count());
            }
            let streams = vec![StreamEntry::new(0, 0), StreamEntry::new(1, 1)];
            engine.manage_stream(rp_link, &repeater, streams).await?;
            info!("{}: streams managed, now {}", rp_link, engine.link_state(rp_link).await?);
        }
        Err(e) => warn!("{}: {}", rp_link, e),
    }

    engine.link_close(rp_link, &repeater).await?;
    engine.link_close(rx_link, &receiver).await?;
    engine.session_close(session).await?;
    Ok(())
}
