use anyhow::{Context, Result};
use rover_control::{
    ClientOptions, ConnectionConfig, ConnectionManager, ConnectionUpdate, DriveStreamer, Packet,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Everything the main loop reacts to
enum ConsoleEvent {
    Packet(Packet),
    Connection(ConnectionUpdate),
    Input(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".into());
    let config = parse_target(&target)?;

    info!("Rover console starting");
    info!("  Rover: {}", config.address());
    info!("  Options: {}", config.options);

    let manager = Arc::new(ConnectionManager::with_config(config));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    // Listeners run on the connection tasks, so just forward
    let tx = event_tx.clone();
    manager.dispatcher().add_packet_listener(move |packet| {
        let _ = tx.send(ConsoleEvent::Packet(packet.clone()));
    });
    let tx = event_tx.clone();
    manager.dispatcher().add_connection_listener(move |update| {
        let _ = tx.send(ConsoleEvent::Connection(*update));
    });

    // Operator input from stdin
    let tx = event_tx;
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(ConsoleEvent::Input(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let streamer = DriveStreamer::new(manager.clone());
    let _streamer_handle = streamer.start();
    manager.start();

    // Main event loop
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(ConsoleEvent::Packet(packet)) => handle_packet(&packet),
                Some(ConsoleEvent::Connection(ConnectionUpdate::Status { connected: true })) => {
                    info!("Connected to rover");
                }
                Some(ConsoleEvent::Connection(ConnectionUpdate::Status { connected: false })) => {
                    warn!("Disconnected from rover");
                }
                Some(ConsoleEvent::Connection(ConnectionUpdate::Quality(sample))) => {
                    debug!(
                        "Link quality {:.0} (avg {}ms, spread {}ms)",
                        sample.score(),
                        sample.avg_gap_ms,
                        sample.spread_ms
                    );
                }
                Some(ConsoleEvent::Input(line)) => {
                    if !handle_input(line.trim(), &manager, &streamer) {
                        break;
                    }
                }
                None => {
                    error!("Event channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.dispose().await;
    Ok(())
}

fn parse_target(target: &str) -> Result<ConnectionConfig> {
    let (host, port) = target
        .rsplit_once(':')
        .with_context(|| format!("Expected host:port, got {:?}", target))?;
    let port = port
        .parse()
        .with_context(|| format!("Invalid port {:?}", port))?;
    Ok(ConnectionConfig::new(host, port))
}

fn handle_packet(packet: &Packet) {
    match packet {
        Packet::Health(health) => {
            info!(
                "Health: {:.1}C, memory {}%",
                health.temp,
                health.memory_percent()
            );
        }
        Packet::Characteristics(chars) => {
            info!(
                "Characteristics: frame {:?}, wheel diameter {}",
                chars.frame_size, chars.wheel_diameter
            );
        }
        Packet::Drivetrain(drive) => debug!("Motors: {:?}", drive.motors),
        Packet::Whiskers(whiskers) => debug!("Whiskers: {:?}", whiskers.sensors),
        Packet::ManualDrive(drive) => debug!("Echoed drive: {} {}", drive.left, drive.right),
    }
}

/// Apply one console command; returns false to quit
fn handle_input(line: &str, manager: &ConnectionManager, streamer: &DriveStreamer) -> bool {
    let mut words = line.split_whitespace();
    let result = match words.next() {
        None => return true,
        Some("quit" | "exit") => return false,
        Some("drive") => {
            let x = words.next().and_then(|w| w.parse().ok());
            let y = words.next().and_then(|w| w.parse().ok());
            match (x, y) {
                (Some(x), Some(y)) => {
                    streamer.set_input(x, y);
                    streamer.send_now()
                }
                _ => {
                    warn!("Usage: drive <left> <right>");
                    return true;
                }
            }
        }
        Some("stop") => {
            streamer.set_input(0.0, 0.0);
            streamer.send_now()
        }
        Some("health") => manager.request_health(),
        Some("chars") => manager.request_characteristics(),
        Some("opts") => match words.next().and_then(|w| w.parse().ok()) {
            Some(bits) => manager.set_options(ClientOptions::from_bits(bits)),
            None => {
                warn!("Usage: opts <bitmask>");
                return true;
            }
        },
        Some(other) => {
            warn!("Unknown command: {}", other);
            return true;
        }
    };

    if let Err(e) = result {
        warn!("{}: {}", line, e);
    }
    true
}
