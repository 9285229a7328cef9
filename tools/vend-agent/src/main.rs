mod cache;

use anyhow::{bail, Context, Result};
use chrono::{Local, SecondsFormat};
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Select};
use dispense_engine::{
    BridgeFactory, BridgeUartTransport, ChannelConfig, ChannelRegistry, CommandSequence,
    DispenseRequest, DispenseSession, EngineConfig, MachineProfile, Transport, UsbSerialTransport,
};
use dispense_protocol::{frame_to_hex, HexSpacing};
use serialport::{available_ports, SerialPortType};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Operator/maintenance tool for the dispense hardware: port discovery,
/// single-motor tests, full cart dispenses, and inbound traffic monitoring.
#[derive(Parser, Debug)]
#[command(name = "vend-agent", version)]
struct Cli {
    /// Engine configuration file.
    #[arg(long, default_value = "vend-agent.toml")]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List attached serial ports.
    ListPorts,
    /// Cache the port used by USB-serial dispensing (interactive if omitted).
    SetPort { path: Option<String> },
    /// Show the cached port.
    GetPort,
    /// Run one motor once, as a slot wiring test.
    TestMotor {
        product: u32,
        /// Units to dispense (one frame per unit).
        #[arg(long, default_value_t = 1)]
        qty: u32,
        /// Machine profile JSON (`{"configArray": [...]}`); default wiring
        /// rule applies when omitted.
        #[arg(long)]
        profile: Option<PathBuf>,
    },
    /// Dispense a full paid cart from a JSON file of `[[product, qty], ...]`.
    Dispense {
        cart: PathBuf,
        #[arg(long)]
        profile: Option<PathBuf>,
    },
    /// Print cleaned inbound hex traffic until Ctrl-C or the duration ends.
    Monitor {
        /// e.g. 30s/2m/1h; 0 = unlimited.
        #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
        duration: Duration,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::load(&cli.config)
        .with_context(|| format!("load config {:?}", cli.config))?;
    if config.usb.port.is_none() {
        config.usb.port = cache::read_port()?;
    }

    match cli.cmd {
        Cmd::ListPorts => list_ports(),
        Cmd::SetPort { path } => set_port(path),
        Cmd::GetPort => {
            match cache::read_port()? {
                Some(port) => println!("{port}"),
                None => println!("no port cached"),
            }
            Ok(())
        }
        Cmd::TestMotor {
            product,
            qty,
            profile,
        } => {
            let request = DispenseRequest::from_pairs([(product, qty)]);
            run_dispense(config, request, profile, true).await
        }
        Cmd::Dispense { cart, profile } => {
            let txt =
                std::fs::read_to_string(&cart).with_context(|| format!("read cart {:?}", cart))?;
            let pairs: Vec<(u32, u32)> =
                serde_json::from_str(&txt).with_context(|| format!("parse cart {:?}", cart))?;
            run_dispense(config, DispenseRequest::from_pairs(pairs), profile, false).await
        }
        Cmd::Monitor { duration } => monitor(config, duration).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = available_ports().context("list serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }
    for info in ports {
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let product = usb.product.as_deref().unwrap_or("?");
                println!(
                    "{}  usb {:04x}:{:04x}  {}",
                    info.port_name, usb.vid, usb.pid, product
                );
            }
            other => println!("{}  {:?}", info.port_name, other),
        }
    }
    Ok(())
}

fn set_port(path: Option<String>) -> Result<()> {
    let port = match path {
        Some(p) => p,
        None => {
            let candidates: Vec<String> = available_ports()
                .context("list serial ports")?
                .into_iter()
                .filter_map(|info| match info.port_type {
                    SerialPortType::UsbPort(usb) => Some(format!(
                        "{}  ({:04x}:{:04x} {})",
                        info.port_name,
                        usb.vid,
                        usb.pid,
                        usb.product.as_deref().unwrap_or("?")
                    )),
                    _ => None,
                })
                .collect();
            if candidates.is_empty() {
                bail!("no USB serial candidates attached");
            }
            let idx = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select dispense port")
                .items(&candidates)
                .default(0)
                .interact()?;
            candidates[idx]
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string()
        }
    };
    cache::write_port(&port)?;
    println!("cached {port}");
    Ok(())
}

fn load_profile(path: Option<PathBuf>) -> Result<Option<MachineProfile>> {
    match path {
        None => Ok(None),
        Some(p) => {
            let txt =
                std::fs::read_to_string(&p).with_context(|| format!("read profile {:?}", p))?;
            let profile =
                serde_json::from_str(&txt).with_context(|| format!("parse profile {:?}", p))?;
            Ok(Some(profile))
        }
    }
}

async fn run_dispense(
    config: EngineConfig,
    request: DispenseRequest,
    profile: Option<PathBuf>,
    show_frames: bool,
) -> Result<()> {
    let profile = load_profile(profile)?;
    if show_frames {
        let seq = CommandSequence::from_request(&request, profile.as_ref())?;
        for (slot, frame) in seq.slots().iter().zip(seq.frames()) {
            println!(
                "slot {slot:3}  {}",
                frame_to_hex(frame, HexSpacing::Contiguous)
            );
        }
    }

    let registry = ChannelRegistry::new(Arc::new(BridgeFactory::new(config.bridge.clone())));
    let mut session = DispenseSession::new(config, registry);
    let result = session.run(&request, profile.as_ref()).await;
    println!(
        "frames sent: {} (all sent: {})",
        result.frames_sent, result.all_sent
    );
    if let Some(err) = result.last_error {
        bail!("dispense failed: {err}");
    }
    Ok(())
}

async fn monitor(config: EngineConfig, duration: Duration) -> Result<()> {
    let mut transport: Box<dyn Transport> = match config.channel {
        ChannelConfig::UsbSerial => Box::new(UsbSerialTransport::open(&config.usb).await?),
        ChannelConfig::BridgeUart => Box::new(BridgeUartTransport::connect(&config.bridge).await?),
    };
    println!("monitoring {} (Ctrl-C to stop)", transport.name());

    // wall time for the operator, monotonic offset for correlating traffic
    let started = Instant::now();
    let mut rx = transport.subscribe();
    let deadline = async {
        if duration.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(duration).await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(hex) => {
                    let wall = Local::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    println!("[{wall} +{}ms] {hex}", started.elapsed().as_millis());
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    transport.close().await?;
    Ok(())
}
