use clap::Parser;
use futures::channel::mpsc::channel;
use futures::StreamExt;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use arlo_pilot::config::io::ConfigStore;
use arlo_pilot::device::btle::BtleTransport;
use arlo_pilot::device::channel::{DropReason, SendOutcome};
use arlo_pilot::device::link::link_task;
use arlo_pilot::device::transport::GrantedGate;
use arlo_pilot::device::types::DeviceEvent;
use arlo_pilot::error::{AppRunError, ConfigError};
use arlo_pilot::init_logging;
use arlo_pilot::input::joystick::Joystick;

#[derive(Parser)]
#[command(name = "arlo-pilot")]
#[command(about = "Drive an ArloBot rover over BLE from the terminal")]
struct Cli {
    /// Advertised device name to scan for (overrides the config file)
    #[arg(short, long)]
    name: Option<String>,

    /// Scan timeout in seconds (overrides the config file)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Side length of the virtual joystick pad, in pixels
    #[arg(long, default_value = "250")]
    pad_size: f32,
}

fn report_drop(outcome: SendOutcome) {
    if let SendOutcome::Dropped(DropReason::NotReady) = outcome {
        println!("Not connected, the stick position was ignored");
    }
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("Arlo Pilot ", env!("CARGO_PKG_VERSION")));

    let cli = Cli::parse();

    let mut store = ConfigStore::new_sync()?;
    let mut locker = store.locker()?;
    let _instance = match locker.lock() {
        Ok(guard) => guard,
        Err(ConfigError::CanNotLock { .. }) => {
            eprintln!("This application has already been started");
            return Ok(());
        },
        Err(err) => return Err(err.into()),
    };

    let mut config = store.read().await?;
    if let Some(name) = cli.name {
        config.device_name = name;
    }
    if let Some(timeout) = cli.timeout {
        config.scan_timeout_ms = timeout * 1000;
    }

    // write the file back so every setting is visible and editable
    store.save(config.clone()).await?;

    let identity = config.identity()?;
    let tuning = config.tuning();

    let transport = BtleTransport::new(config.write_deadline()).await?;

    let (event_sender, mut event_receiver) = channel::<DeviceEvent>(32);
    let cancel = CancellationToken::new();
    let (mut link, link_join) = link_task(
        transport,
        GrantedGate,
        identity,
        tuning,
        vec![event_sender],
        cancel.clone(),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = event_receiver.next().await {
            match event {
                DeviceEvent::ScanStarted => println!("Scanning..."),
                DeviceEvent::DeviceFound { name } => println!("Found {}", name),
                DeviceEvent::Connecting { address } => println!("Connecting to {}...", address),
                DeviceEvent::Connected => println!("Connected, waiting for services..."),
                DeviceEvent::CapabilitiesReady => println!("Ready to drive"),
                DeviceEvent::Disconnected { reason } => println!("Disconnected ({:?})", reason),
                DeviceEvent::Error(error) => println!("Error: {}", error),
            }
        }
    });

    let mut joystick = Joystick::from_view_size(cli.pad_size, cli.pad_size);
    let center = cli.pad_size / 2.0;

    println!("Commands: scan | <x> <y> (pixels from pad center, y grows downward) | release | disconnect | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        match line {
            "" => continue,
            "scan" => link.start_scan(),
            "release" => {
                let vector = joystick.release();
                report_drop(link.drive(vector));
            },
            "disconnect" => link.disconnect(),
            "quit" | "exit" => break,
            _ => {
                let mut parts = line.split_whitespace();
                let x = parts.next().and_then(|part| part.parse::<f32>().ok());
                let y = parts.next().and_then(|part| part.parse::<f32>().ok());
                match (x, y) {
                    (Some(x), Some(y)) => {
                        let vector = joystick.update(center + x, center + y);
                        report_drop(link.drive(vector));
                    },
                    _ => println!("Unrecognized command: {}", line),
                }
            },
        }
    }

    cancel.cancel();
    link_join.await.expect("Failed to join link task");
    printer.await.expect("Failed to join event printer");

    Ok(())
}
