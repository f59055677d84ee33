#![cfg_attr(docsrs, feature(doc_cfg))]
//! # chargerybms_lib
//!
//! This crate decodes the unsolicited RS232 telemetry of Chargery BMS8T/16T/24T
//! battery management units and republishes it as metric snapshots in the
//! node-exporter text format.
//!
//! The device only ever sends; it emits cell voltage (`0x56`), system status
//! (`0x57`) and cell impedance (`0x58`) frames at independent intervals.
//! [`session::Session`] groups them into snapshots and hands completed ones to
//! a [`session::SnapshotSink`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `chargerybms` command-line tool.
//! - `serialport`: Enables the serial link reader using the `serialport` crate.
//! - `serde`: Enables `serde` support for the decoded measurement types.
//! - `bin-dependencies`: Enables all features required by the `chargerybms` binary executable.

/// Contains error types for the library.
mod error;
/// Structured metric lines in the node-exporter text format.
pub mod metrics;
/// Defines the Chargery telemetry protocol.
pub mod protocol;
/// Snapshot aggregation across packet categories.
pub mod session;
/// File-backed snapshot publication.
pub mod snapshot;

pub use error::Error;

/// Serial link reader for the Chargery RS232 port.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
