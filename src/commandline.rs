use chargerybms_lib::protocol::{ProtocolVersion, MAX_CELLS};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_protocol_version(s: &str) -> Result<ProtocolVersion, String> {
    s.parse::<ProtocolVersion>().map_err(|err| {
        let known: Vec<String> = ProtocolVersion::ALL.iter().map(|v| v.to_string()).collect();
        format!("{err}, expected one of {}", known.join(", "))
    })
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Continuously read frames from the BMS and publish metric snapshots
    Daemon {
        /// Output destination for snapshots
        #[command(subcommand)]
        output: DaemonOutput,
    },
    /// Validate and decode a single hex encoded frame, e.g. "24 24 57 0F 10 68 02 00 00 FF 21 FF 21 00 68"
    Decode {
        /// Frame bytes as hex, whitespace between bytes is allowed
        #[arg(required = true, num_args = 1..)]
        frame: Vec<String>,
        /// Print the decoded measurement as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Write node-exporter textfiles, replacing them atomically on every completed snapshot.
    Files {
        /// YAML file with output paths and metric names (defaults are used when omitted)
        #[arg(long)]
        config_file: Option<String>,
    },
    /// Print every completed snapshot to the standard output (console).
    Console,
}

const fn about_text() -> &'static str {
    "chargery bms telemetry decoder"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Enable debug output (same as -vv)
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short = 'p', long = "port", visible_alias = "device", default_value_t = default_device_name())]
    pub device: String,

    /// Protocol version of the main unit firmware (V121, V122, V124, V125, V126)
    #[arg(short = 'P', long, value_parser = parse_protocol_version, default_value = "V122")]
    pub protocol: ProtocolVersion,

    /// Number of cells (1-24)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=i64::from(MAX_CELLS)), default_value_t = 8)]
    pub cells: u8,

    /// Read timeout of the serial port (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub timeout: Duration,

    #[command(subcommand)]
    pub command: CliCommands,
}
