//! Subcommand implementations

use crate::cli::{ConnectOpts, StreamOpts};
use anyhow::{anyhow, bail, Context, Result};
use gcodestream::{
    list_ports, load_program, resolve_port, Config, ConnectionState, StreamEvent,
    StreamingController,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

const DRAIN_POLL: Duration = Duration::from_millis(50);

pub fn ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial devices found");
        return Ok(());
    }
    for port in ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" [{:04x}:{:04x}]", vid, pid),
            _ => String::new(),
        };
        println!("{:<24} {}{}", port.port_name, port.description, usb);
    }
    Ok(())
}

/// Build a controller from settings and open the device
async fn open(config: &Config) -> Result<Arc<StreamingController>> {
    config.validate()?;
    let port = resolve_port(&config.connection)?;
    let controller = Arc::new(StreamingController::with_options(
        &config.connection.transport_options(),
        config.streamer_config(),
    )?);

    let baud = config.connection.baud_rate;
    let connecting = controller.clone();
    let target = port.clone();
    tokio::task::spawn_blocking(move || connecting.connect(&target, baud))
        .await?
        .with_context(|| format!("Failed to connect to {}", port))?;
    Ok(controller)
}

async fn close(controller: Arc<StreamingController>) -> Result<()> {
    tokio::task::spawn_blocking(move || controller.disconnect()).await??;
    Ok(())
}

pub async fn stream(mut config: Config, opts: StreamOpts) -> Result<()> {
    opts.connect.apply(&mut config);
    let program = load_program(&opts.file)?;
    if program.is_empty() {
        bail!("{} is empty", opts.file.display());
    }

    let controller = open(&config).await?;
    let mut events = controller.subscribe();
    controller.load_commands(program);
    controller.play()?;

    let outcome = tokio::select! {
        outcome = follow(&controller, &mut events) => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.pause();
            Err(anyhow!("Interrupted at line {}", controller.current_status().position))
        }
    };

    let status = controller.current_status();
    close(controller).await?;
    outcome?;
    println!("{}", status);
    Ok(())
}

/// Print progress until the program completes or a failure stops it
async fn follow(controller: &StreamingController, events: &mut Receiver<StreamEvent>) -> Result<()> {
    let mut last_percent = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => bail!("Event stream closed"),
        };

        match event {
            StreamEvent::LineSent { index: Some(_), .. } => {
                let status = controller.current_status();
                let percent = (status.progress() * 100.0).floor() as u32;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    println!("{:>3}% {}/{}", percent, status.position, status.total);
                }
            }
            StreamEvent::Completed => break,
            StreamEvent::WriteFailed(_) | StreamEvent::Fault(_) => bail!("{}", event),
            StreamEvent::ConnectionChanged(ConnectionState::Failed)
            | StreamEvent::ConnectionChanged(ConnectionState::Disconnected) => bail!("{}", event),
            StreamEvent::DeviceError(_)
            | StreamEvent::ProtocolDesync { .. }
            | StreamEvent::Stalled => eprintln!("{}", event),
            _ => {}
        }
    }

    // Completed means every line was handed over; wait for the device to take them
    loop {
        let status = controller.current_status();
        if status.bytes_outstanding == 0 {
            return Ok(());
        }
        if status.stalled {
            bail!("Device stopped acknowledging with {} bytes outstanding", status.bytes_outstanding);
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

pub async fn console(mut config: Config, opts: ConnectOpts) -> Result<()> {
    opts.apply(&mut config);
    let controller = open(&config).await?;
    let mut events = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Connected. Type G-code, :status, :log or :quit");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => {}
                    ":quit" | ":q" => break,
                    ":status" => println!("{}", controller.current_status()),
                    ":log" => {
                        for entry in controller.response_log() {
                            println!("{} {}", entry.received_at.format("%H:%M:%S%.3f"), entry.text);
                        }
                    }
                    command => controller.send_command(command)?,
                }
            }
            event = events.recv() => match event {
                Ok(StreamEvent::LineSent { .. }) => {}
                Ok(StreamEvent::ConnectionChanged(state)) if !state.is_connected() => {
                    println!("{}", StreamEvent::ConnectionChanged(state));
                    break;
                }
                Ok(event) => println!("{}", event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    close(controller).await
}
