//! µBlocks bridge - WebSocket to serial bridge for the µBlocks IDE
//!
//! Usage:
//!   ublocks-bridge                    Serve the IDE on port 9999
//!   ublocks-bridge -p 8888 -t /dev/ttyS0
//!   ublocks-bridge --help=protocol    Print the message table
//!   ublocks-bridge monitor            Watch a running bridge as an IDE would

use clap::Parser;
use serde_json::Value as JsonValue;
use std::process::ExitCode;
use tracing::{error, info, warn};
use ublocks_bridge::bridge;
use ublocks_bridge::cli::{help_text, Cli, Command};
use ublocks_bridge::client::{ClientEvent, IdeClient, MonitorSink};
use ublocks_bridge::config::{self, Config};
use ublocks_bridge::error::{BridgeError, Result};
use ublocks_bridge::logging::init_tracing;
use ublocks_bridge::protocol::{ControlMessage, ControlSelector, ProtocolDispatcher};
use ublocks_bridge::transport::SerialOpener;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(topic) = cli.help {
        println!("{}", help_text(topic));
        return ExitCode::SUCCESS;
    }

    init_tracing(cli.verbosity());

    let mut config = config::load(cli.config.as_deref());
    cli.apply(&mut config);

    let result = tokio::runtime::Runtime::new()
        .map_err(|e| BridgeError::Runtime { source: e })
        .and_then(|rt| match &cli.command {
            None => rt.block_on(run_bridge(&config)),
            Some(Command::Monitor { url, serial }) => {
                rt.block_on(run_monitor(url, serial.as_deref()))
            }
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_bridge(config: &Config) -> Result<()> {
    let opener = SerialOpener::new(config.bridge.baud_rate, config.bridge.tty.clone());
    let handle = bridge::start(config, opener).await?;
    info!(
        "µBlocks bridge listening on ws://{} ({} baud)",
        handle.local_addr(),
        config.bridge.baud_rate
    );

    wait_for_signal().await;
    info!("Shutting down");
    handle.stop();
    handle.join().await;
    Ok(())
}

async fn run_monitor(url: &str, serial: Option<&str>) -> Result<()> {
    let dispatcher = ProtocolDispatcher::with_control(MonitorSink, MonitorSink);
    let mut client = IdeClient::new(url, dispatcher);
    info!("Waiting for bridge at {}", url);

    let signal = wait_for_signal();
    tokio::pin!(signal);

    loop {
        let event = tokio::select! {
            _ = &mut signal => break,
            event = client.step() => event,
        };
        if event == ClientEvent::Connected {
            request_ports(&mut client, serial)?;
        }
    }

    client.disconnect();
    Ok(())
}

fn request_ports(
    client: &mut IdeClient<MonitorSink, MonitorSink>,
    serial: Option<&str>,
) -> Result<()> {
    client.send_control(&ControlMessage::new(
        ControlSelector::GetSerialPortList,
        Vec::new(),
    ))?;
    if let Some(path) = serial {
        client.send_control(&ControlMessage::new(
            ControlSelector::SerialConnect,
            vec![JsonValue::from(path)],
        ))?;
        client.send_message("getVersion", 0, &[])?;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                warn!("Cannot install signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}

#[cfg(windows)]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
