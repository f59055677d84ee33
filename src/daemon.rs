use anyhow::{Context, Result};
use chargerybms_lib::protocol::Config;
use chargerybms_lib::serialport::ChargeryLink;
use chargerybms_lib::session::{Session, Snapshot, SnapshotSink};
use log::info;

use crate::{commandline, config::PublishConfig};

struct ConsoleSink;

impl SnapshotSink for ConsoleSink {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), chargerybms_lib::Error> {
        println!(
            "--- {} snapshot at {} ---",
            snapshot.axis(),
            chrono::Local::now().to_rfc3339()
        );
        print!("{snapshot}");
        println!("--------------------------");
        Ok(())
    }
}

pub fn run(
    mut link: ChargeryLink,
    config: Config,
    output: commandline::DaemonOutput,
    publish: &PublishConfig,
) -> Result<()> {
    info!(
        "Starting daemon mode: output={output:?}, protocol={}, cells={}",
        config.version(),
        config.cells()
    );

    let mut sink: Box<dyn SnapshotSink> = match output {
        commandline::DaemonOutput::Files { .. } => {
            let sink = publish.file_sink();
            info!(
                "Publishing snapshots to {:?} and {:?}",
                sink.path(chargerybms_lib::session::Axis::System),
                sink.path(chargerybms_lib::session::Axis::Impedance)
            );
            Box::new(sink)
        }
        commandline::DaemonOutput::Console => Box::new(ConsoleSink),
    };

    let mut session = Session::new(config);
    session
        .run(&mut link, &mut *sink)
        .with_context(|| "Serial link failed, discarding unfinished snapshots")
}
