//! SparkLink host
//!
//! Connects to the ignition unit (or the simulator), runs the session and
//! writes every session event to stdout as one JSON object per line.
//! Logs go to stderr.

mod config;

use anyhow::{Context, Result};
use sparklink_core::demo::DemoDevice;
use sparklink_core::map::IgnitionMap;
use sparklink_core::protocol::{open_port, Transport};
use sparklink_core::session::{Session, SessionConfig, SessionEvent};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::HostConfig;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print events as JSON lines until the session goes away
async fn forward_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => {
                    let mut out = std::io::stdout().lock();
                    if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                        warn!("stdout closed, no longer forwarding events");
                        return;
                    }
                }
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event consumer lagged, {} events dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Run one session to completion; `Ok(true)` means the user asked to quit
async fn run_session<T: Transport>(
    transport: T,
    config: SessionConfig,
    map: IgnitionMap,
) -> Result<bool> {
    let session = Session::with_map(transport, config, map);
    let handle = session.handle();
    let forwarder = tokio::spawn(forward_events(handle.subscribe()));

    let mut run = tokio::spawn(session.run());
    let quit = tokio::select! {
        res = &mut run => {
            res.context("Session task panicked")??;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            handle.shutdown();
            run.await.context("Session task panicked")??;
            true
        }
    };

    // Keep the forwarder alive until the final state change is printed
    drop(handle);
    let _ = forwarder.await;
    Ok(quit)
}

async fn run_demo(config: SessionConfig, map: IgnitionMap) -> Result<bool> {
    info!("Demo mode: using the simulated ignition unit");
    let (host, device) = tokio::io::duplex(16 * 1024);
    tokio::spawn(async move {
        if let Err(e) = DemoDevice::new().serve(device).await {
            warn!("Demo device stopped: {}", e);
        }
    });
    run_session(host, config, map).await
}

async fn run_serial(
    host_config: &HostConfig,
    config: SessionConfig,
    map: IgnitionMap,
) -> Result<bool> {
    let port = host_config
        .resolve_port()
        .context("No serial port available")?;
    info!("Opening {} at {} baud", port, host_config.baud_rate);
    let stream = open_port(&port, Some(host_config.baud_rate))
        .with_context(|| format!("Failed to open {}", port))?;
    run_session(stream, config, map).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let host_config = HostConfig::load(config_path.as_deref())?;
    info!("SparkLink host v{}", sparklink_core::VERSION);

    loop {
        let session_config = host_config.session_config();
        let map = host_config.initial_map();
        let result = if host_config.demo {
            run_demo(session_config, map).await
        } else {
            run_serial(&host_config, session_config, map).await
        };

        match result {
            Ok(true) => return Ok(()),
            Ok(false) => info!("Session ended"),
            Err(e) => error!("{:#}", e),
        }

        info!(
            "Reconnecting in {:.1} s",
            host_config.reconnect_delay().as_secs_f32()
        );
        tokio::select! {
            _ = tokio::time::sleep(host_config.reconnect_delay()) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
