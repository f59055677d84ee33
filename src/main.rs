use anyhow::{bail, Context, Result};
use chargerybms_lib::metrics::ToMetrics;
use chargerybms_lib::protocol::{CellImpedance, CellVoltages, Config, Packet, SystemStatus};
use chargerybms_lib::serialport::ChargeryLink;
use clap::Parser;
use commandline::{CliArgs, CliCommands};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{fmt::Debug, ops::Deref, panic};

mod commandline;
mod config;
mod daemon;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_measurement<M>(measurement: &M, metric_name: &str, json: bool) -> Result<()>
where
    M: ToMetrics + serde::Serialize + Debug,
{
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(measurement)
                .with_context(|| "Cannot serialize measurement")?
        );
    } else {
        println!("{measurement:?}");
    }
    for line in measurement.to_metrics(metric_name) {
        println!("{line}");
    }
    Ok(())
}

fn decode_frame(config: &Config, frame: &[String], json: bool) -> Result<()> {
    let hex_frame: String = frame
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect();
    let bytes = hex::decode(&hex_frame).with_context(|| format!("Invalid hex frame '{hex_frame}'"))?;
    debug!("Decoding {} bytes: {:02X?}", bytes.len(), bytes);

    match Packet::classify(&bytes).with_context(|| "Cannot classify frame")? {
        Packet::CellVoltages(frame) => print_measurement(
            &CellVoltages::decode(frame, config).with_context(|| "Cannot decode cell voltages")?,
            config.metric_name(),
            json,
        ),
        Packet::SystemStatus(frame) => print_measurement(
            &SystemStatus::decode(frame, config).with_context(|| "Cannot decode system status")?,
            config.metric_name(),
            json,
        ),
        Packet::CellImpedance(frame) => print_measurement(
            &CellImpedance::decode(frame, config)
                .with_context(|| "Cannot decode cell impedance")?,
            config.impedance_metric_name(),
            json,
        ),
        Packet::Unrecognized(tag) => bail!("Unexpected command tag {tag:02X}"),
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut loglevel = args.verbose.log_level_filter();
    if args.debug {
        loglevel = loglevel.max(LevelFilter::Debug);
    }
    let _log_handle = logging_init(loglevel);

    let config = Config::new(args.protocol, args.cells)
        .with_context(|| format!("Invalid cell count {}", args.cells))?;

    match args.command {
        CliCommands::Daemon { output } => {
            let publish = match &output {
                commandline::DaemonOutput::Files {
                    config_file: Some(path),
                } => config::PublishConfig::load(path)?,
                _ => config::PublishConfig::default(),
            };
            let config = publish.apply(config);
            let link = ChargeryLink::with_timeout(&args.device, args.timeout)
                .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
            daemon::run(link, config, output, &publish)
        }
        CliCommands::Decode { frame, json } => decode_frame(&config, &frame, json),
    }
}
