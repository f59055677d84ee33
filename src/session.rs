//! Groups independently transmitted frames into publishable snapshots.
//!
//! The unit sends system status about every second, cell voltages about every
//! two seconds and cell impedances only when it switches between charge and
//! discharge. There are no sequence numbers, so a snapshot of the system axis
//! is complete as soon as one system status and one cell voltage frame have
//! been captured since the last flush. The impedance axis completes with a
//! single impedance frame.
//!
//! Completed snapshots are flushed when the next framed read arrives, before
//! that read is dispatched. A snapshot that never completes is never published.

use crate::metrics::{MetricLine, ToMetrics};
use crate::protocol::{CellImpedance, CellVoltages, Command, Config, Packet, SystemStatus};
use crate::Error;
use std::fmt;

// Reads of this size or less never hold a frame worth looking at.
const IDLE_READ_LENGTH: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Combined system status and cell voltage metrics.
    System,
    /// Cell impedance metrics.
    Impedance,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Axis::System => write!(f, "sys"),
            Axis::Impedance => write!(f, "impedance"),
        }
    }
}

/// The metric lines of one completed cycle of an axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    axis: Axis,
    lines: Vec<MetricLine>,
}

impl Snapshot {
    pub fn new(axis: Axis, lines: Vec<MetricLine>) -> Self {
        Self { axis, lines }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn lines(&self) -> &[MetricLine] {
        &self.lines
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Receives completed snapshots. Implementations must make a snapshot visible
/// to consumers all at once or not at all.
pub trait SnapshotSink {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), Error>;
}

impl<S: SnapshotSink + ?Sized> SnapshotSink for Box<S> {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        (**self).publish(snapshot)
    }
}

/// Delivers whatever the link produced in one read; an empty chunk means the
/// read timed out.
pub trait ChunkSource {
    fn read_chunk(&mut self) -> Result<Vec<u8>, Error>;
}

/// What a single read did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing or next to nothing was read.
    Idle,
    /// Wrong header or unknown command tag.
    Ignored,
    /// The frame was decoded into the current cycle.
    Captured(Command),
    /// The cycle already holds this category; the frame was discarded.
    Duplicate(Command),
    /// The frame failed validation or decoding.
    Dropped(Command),
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    got_cell_data: bool,
    got_sys_data: bool,
    got_cell_impedance: bool,
    sys_buffer: Vec<MetricLine>,
    impedance_buffer: Vec<MetricLine>,
}

fn capture<M: ToMetrics>(
    command: Command,
    decoded: Result<M, Error>,
    name: &str,
    buffer: &mut Vec<MetricLine>,
    captured: &mut bool,
) -> Outcome {
    match decoded {
        Ok(measurement) => {
            buffer.extend(measurement.to_metrics(name));
            *captured = true;
            Outcome::Captured(command)
        }
        Err(err) => {
            log::warn!("Dropping {command:?} frame: {err}");
            Outcome::Dropped(command)
        }
    }
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            got_cell_data: false,
            got_sys_data: false,
            got_cell_impedance: false,
            sys_buffer: Vec::new(),
            impedance_buffer: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn has_cell_data(&self) -> bool {
        self.got_cell_data
    }

    pub fn has_sys_data(&self) -> bool {
        self.got_sys_data
    }

    pub fn has_cell_impedance(&self) -> bool {
        self.got_cell_impedance
    }

    fn publish<S: SnapshotSink + ?Sized>(sink: &mut S, snapshot: Snapshot) {
        log::debug!(
            "Publishing {} snapshot with {} lines",
            snapshot.axis,
            snapshot.lines.len()
        );
        if let Err(err) = sink.publish(&snapshot) {
            log::error!("Cannot publish {} snapshot: {err}", snapshot.axis);
        }
    }

    fn flush_completed<S: SnapshotSink + ?Sized>(&mut self, sink: &mut S) {
        if self.got_sys_data && self.got_cell_data {
            let lines = std::mem::take(&mut self.sys_buffer);
            self.got_sys_data = false;
            self.got_cell_data = false;
            Self::publish(
                sink,
                Snapshot {
                    axis: Axis::System,
                    lines,
                },
            );
        }
        if self.got_cell_impedance {
            let lines = std::mem::take(&mut self.impedance_buffer);
            self.got_cell_impedance = false;
            Self::publish(
                sink,
                Snapshot {
                    axis: Axis::Impedance,
                    lines,
                },
            );
        }
    }

    /// Folds one read from the link into the session, publishing any cycle
    /// that was already complete before this read is dispatched.
    ///
    /// A publish failure is logged; the affected snapshot is discarded and a
    /// fresh cycle starts either way.
    pub fn process_chunk<S: SnapshotSink + ?Sized>(
        &mut self,
        chunk: &[u8],
        sink: &mut S,
    ) -> Outcome {
        log::trace!(
            "Read {} bytes: {:02X?} sys={} cell={} impedance={}",
            chunk.len(),
            chunk,
            self.got_sys_data,
            self.got_cell_data,
            self.got_cell_impedance
        );
        if chunk.len() <= IDLE_READ_LENGTH {
            return Outcome::Idle;
        }
        let packet = match Packet::classify(chunk) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("Ignoring read: {err}");
                return Outcome::Ignored;
            }
        };

        self.flush_completed(sink);

        match packet {
            Packet::CellVoltages(frame) => {
                if self.got_cell_data {
                    return Outcome::Duplicate(Command::CellVoltages);
                }
                capture(
                    Command::CellVoltages,
                    CellVoltages::decode(frame, &self.config),
                    self.config.metric_name(),
                    &mut self.sys_buffer,
                    &mut self.got_cell_data,
                )
            }
            Packet::SystemStatus(frame) => {
                if self.got_sys_data {
                    return Outcome::Duplicate(Command::SystemStatus);
                }
                capture(
                    Command::SystemStatus,
                    SystemStatus::decode(frame, &self.config),
                    self.config.metric_name(),
                    &mut self.sys_buffer,
                    &mut self.got_sys_data,
                )
            }
            Packet::CellImpedance(frame) => {
                if self.got_cell_impedance {
                    return Outcome::Duplicate(Command::CellImpedance);
                }
                capture(
                    Command::CellImpedance,
                    CellImpedance::decode(frame, &self.config),
                    self.config.impedance_metric_name(),
                    &mut self.impedance_buffer,
                    &mut self.got_cell_impedance,
                )
            }
            Packet::Unrecognized(tag) => {
                log::debug!("Ignoring read: {}", Error::UnexpectedCommand(tag));
                Outcome::Ignored
            }
        }
    }

    /// Polls `source` until it fails. Cycles in progress at that point are
    /// discarded.
    pub fn run<R, S>(&mut self, source: &mut R, sink: &mut S) -> Result<(), Error>
    where
        R: ChunkSource + ?Sized,
        S: SnapshotSink + ?Sized,
    {
        loop {
            let chunk = source.read_chunk()?;
            self.process_chunk(&chunk, sink);
        }
    }
}
