use clap::{Args, Parser, Subcommand, ValueEnum};
use gcodestream::{Config, FlowControlMode, TransportKind};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gcodestream",
    version,
    about = "Stream G-code to 3D printers and plotters over serial links"
)]
pub struct Cli {
    /// Settings file (.toml or .json); defaults to the platform config dir
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// List detected serial devices
    Ports,
    /// Send a G-code file and wait until the device has taken every line
    Stream(StreamOpts),
    /// Interactive terminal: typed lines go to the device, replies are echoed
    Console(ConnectOpts),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TransportArg {
    Auto,
    Serial,
    Fd,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Auto => TransportKind::Auto,
            TransportArg::Serial => TransportKind::Serial,
            TransportArg::Fd => TransportKind::FileDescriptor,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FlowArg {
    Windowed,
    Unthrottled,
    Auto,
}

impl From<FlowArg> for FlowControlMode {
    fn from(arg: FlowArg) -> Self {
        match arg {
            FlowArg::Windowed => FlowControlMode::Windowed,
            FlowArg::Unthrottled => FlowControlMode::Unthrottled,
            FlowArg::Auto => FlowControlMode::Auto,
        }
    }
}

/// Overrides applied on top of the settings file
#[derive(Args, Debug, Clone)]
pub struct ConnectOpts {
    /// Serial device path, or "auto"
    #[arg(long)]
    pub port: Option<String>,
    /// Baud rate
    #[arg(long)]
    pub baud: Option<u32>,
    /// Transport implementation
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,
    /// Send N<seq> ... *<checksum> lines
    #[arg(long, default_value_t = false)]
    pub line_numbers: bool,
    /// Device receive buffer in bytes
    #[arg(long)]
    pub buffer: Option<usize>,
    /// Flow control strategy
    #[arg(long, value_enum)]
    pub flow_control: Option<FlowArg>,
    /// Skip the M115 firmware query after connecting
    #[arg(long, default_value_t = false)]
    pub no_query: bool,
}

impl ConnectOpts {
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.connection.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.connection.baud_rate = baud;
        }
        if let Some(transport) = self.transport {
            config.connection.transport = transport.into();
        }
        if self.line_numbers {
            config.streaming.line_numbers = true;
        }
        if let Some(buffer) = self.buffer {
            config.streaming.receive_buffer_size = buffer;
        }
        if let Some(mode) = self.flow_control {
            config.streaming.flow_control = mode.into();
        }
        if self.no_query {
            config.connection.query_firmware_on_connect = false;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StreamOpts {
    /// G-code file to send
    pub file: PathBuf,
    #[command(flatten)]
    pub connect: ConnectOpts,
}
