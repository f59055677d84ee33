use crate::Error;
use std::{fmt, str::FromStr};

#[cfg(feature = "serde")]
use serde::Serialize;

// Chargery BMS8T/16T/24T additional protocol V1.26: the main unit only sends,
// it never receives. Every frame is
// [0x24, 0x24, command, length, payload.., checksum]
// where `length` counts the whole frame including header and checksum.
pub const HEADER: [u8; 2] = [0x24, 0x24];
pub const MAX_CELLS: u8 = 24;

const COMMAND_OFFSET: usize = 2;
const LENGTH_OFFSET: usize = 3;
const PAYLOAD_OFFSET: usize = 4;
const CHECKSUM_LENGTH: usize = 1;

const SYSTEM_STATUS_LENGTH: usize = 15;
const SYSTEM_STATUS_EXTENSION_LENGTH: usize = 4;
const SOC_EXTENSION_LENGTH: usize = 1;
const CAPACITY_EXTENSION_LENGTH: usize = 8;
// mode + instant current in front of the impedance block
const IMPEDANCE_PREFIX_LENGTH: usize = 3;

/// Additive checksum: the sum of every byte except the trailing checksum byte, modulo 256.
pub fn checksum(frame: &[u8]) -> u8 {
    let mut checksum: u8 = 0;
    let slice = &frame[0..frame.len().saturating_sub(CHECKSUM_LENGTH)];
    for b in slice {
        checksum = checksum.wrapping_add(*b);
    }
    checksum
}

fn validate_len(frame: &[u8], required: usize) -> std::result::Result<(), Error> {
    if frame.len() < required {
        log::warn!(
            "Truncated frame - required={} received={}",
            required,
            frame.len()
        );
        return Err(Error::FrameTooShort {
            required,
            received: frame.len(),
        });
    }
    Ok(())
}

fn validate_declared_len(frame: &[u8]) -> std::result::Result<(), Error> {
    let declared = usize::from(frame[LENGTH_OFFSET]);
    if declared != frame.len() {
        log::warn!(
            "Invalid frame length - declared={} received={}",
            declared,
            frame.len()
        );
        return Err(Error::FrameLengthMismatch {
            declared,
            received: frame.len(),
        });
    }
    Ok(())
}

fn validate_checksum(frame: &[u8]) -> std::result::Result<(), Error> {
    let calculated = checksum(frame);
    let received = frame[frame.len() - 1];
    if received != calculated {
        log::warn!(
            "Invalid checksum - calculated={:02X?} received={:02X?} frame={:02X?}",
            calculated,
            received,
            frame
        );
        return Err(Error::FrameChecksumMismatch {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Decides whether `frame` is a complete frame of at least `required` bytes
/// whose declared length and checksum agree with its content.
///
/// The checks run in order: length against `required`, declared length field,
/// checksum. A [`Error::FrameTooShort`] is expected whenever a read boundary
/// cuts a frame and is not a hard failure.
pub fn validate(frame: &[u8], required: usize) -> std::result::Result<(), Error> {
    validate_len(frame, required.max(PAYLOAD_OFFSET + CHECKSUM_LENGTH))?;
    validate_declared_len(frame)?;
    validate_checksum(frame)
}

fn voltage(hi: u8, lo: u8) -> f32 {
    u16::from_be_bytes([hi, lo]) as f32 / 1000.0
}

fn tenths(hi: u8, lo: u8) -> f32 {
    u16::from_be_bytes([hi, lo]) as f32 / 10.0
}

fn capacity(bytes: &[u8]) -> f64 {
    f64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])) / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    CellVoltages = 0x56,
    SystemStatus = 0x57,
    CellImpedance = 0x58,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x56 => Ok(Command::CellVoltages),
            0x57 => Ok(Command::SystemStatus),
            0x58 => Ok(Command::CellImpedance),
            other => Err(Error::UnexpectedCommand(other)),
        }
    }
}

/// A read classified by its command tag. Produced once per read, before any
/// validation of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    CellVoltages(&'a [u8]),
    SystemStatus(&'a [u8]),
    CellImpedance(&'a [u8]),
    Unrecognized(u8),
}

impl<'a> Packet<'a> {
    pub fn classify(chunk: &'a [u8]) -> std::result::Result<Self, Error> {
        if chunk.len() <= COMMAND_OFFSET {
            return Err(Error::FrameTooShort {
                required: COMMAND_OFFSET + 1,
                received: chunk.len(),
            });
        }
        if chunk[0..HEADER.len()] != HEADER {
            return Err(Error::UnexpectedHeader);
        }
        Ok(match Command::try_from(chunk[COMMAND_OFFSET]) {
            Ok(Command::CellVoltages) => Packet::CellVoltages(chunk),
            Ok(Command::SystemStatus) => Packet::SystemStatus(chunk),
            Ok(Command::CellImpedance) => Packet::CellImpedance(chunk),
            Err(_) => Packet::Unrecognized(chunk[COMMAND_OFFSET]),
        })
    }
}

/// Protocol revision the main unit firmware speaks.
///
/// - V1.22 adds the SOC byte to the cell voltage frame.
/// - V1.24 adds Wh setup and Wh/Ah send out; the cell frame trailer is decoded from V1.25 on.
/// - V1.25 adds cell impedance frames and Wh/Ah after the cell voltages.
/// - V1.26 adds discharge end voltage and protection status to the system frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum ProtocolVersion {
    V121,
    V122,
    V124,
    V125,
    V126,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 5] = [
        ProtocolVersion::V121,
        ProtocolVersion::V122,
        ProtocolVersion::V124,
        ProtocolVersion::V125,
        ProtocolVersion::V126,
    ];

    fn cell_extension_length(&self) -> usize {
        match self {
            ProtocolVersion::V125 | ProtocolVersion::V126 => CAPACITY_EXTENSION_LENGTH,
            ProtocolVersion::V122 => SOC_EXTENSION_LENGTH,
            ProtocolVersion::V121 | ProtocolVersion::V124 => 0,
        }
    }

    fn has_status_extension(&self) -> bool {
        match self {
            ProtocolVersion::V126 => true,
            ProtocolVersion::V121
            | ProtocolVersion::V122
            | ProtocolVersion::V124
            | ProtocolVersion::V125 => false,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVersion::V121 => write!(f, "V121"),
            ProtocolVersion::V122 => write!(f, "V122"),
            ProtocolVersion::V124 => write!(f, "V124"),
            ProtocolVersion::V125 => write!(f, "V125"),
            ProtocolVersion::V126 => write!(f, "V126"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|version| version.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnsupportedProtocolVersion(s.to_string()))
    }
}

/// Decoding parameters fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    version: ProtocolVersion,
    cells: u8,
    metric_name: String,
    impedance_metric_name: String,
}

impl Config {
    pub const DEFAULT_METRIC_NAME: &'static str = "BMS_A";
    pub const DEFAULT_IMPEDANCE_METRIC_NAME: &'static str = "BMS_A_imp";

    pub fn new(version: ProtocolVersion, cells: u8) -> std::result::Result<Self, Error> {
        if cells == 0 || cells > MAX_CELLS {
            return Err(Error::RangeError);
        }
        Ok(Self {
            version,
            cells,
            metric_name: Self::DEFAULT_METRIC_NAME.to_string(),
            impedance_metric_name: Self::DEFAULT_IMPEDANCE_METRIC_NAME.to_string(),
        })
    }

    pub fn with_metric_names(
        mut self,
        metric_name: impl Into<String>,
        impedance_metric_name: impl Into<String>,
    ) -> Self {
        self.metric_name = metric_name.into();
        self.impedance_metric_name = impedance_metric_name.into();
        self
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cells(&self) -> u8 {
        self.cells
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn impedance_metric_name(&self) -> &str {
        &self.impedance_metric_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum Mode {
    Discharge,
    Charge,
    Storage,
}

impl TryFrom<u8> for Mode {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Discharge),
            1 => Ok(Mode::Charge),
            2 => Ok(Mode::Storage),
            other => Err(Error::UnknownMode(other)),
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        mode as u8
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Discharge => write!(f, "Discharge"),
            Mode::Charge => write!(f, "Charge"),
            Mode::Storage => write!(f, "Storage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum ProtectionStatus {
    Release,
    Protection,
}

impl TryFrom<u8> for ProtectionStatus {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtectionStatus::Release),
            1 => Ok(ProtectionStatus::Protection),
            other => Err(Error::UnknownProtectionStatus(other)),
        }
    }
}

impl From<ProtectionStatus> for u8 {
    fn from(status: ProtectionStatus) -> Self {
        status as u8
    }
}

impl fmt::Display for ProtectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtectionStatus::Release => write!(f, "Release"),
            ProtectionStatus::Protection => write!(f, "Protection"),
        }
    }
}

/// Trailer of the cell voltage frame; its layout depends on the protocol version.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum CellExtension {
    StateOfCharge(u8),
    Capacity { wh: f64, ah: f64 },
}

/// Command 0x56: cell voltages reported by the main control board.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CellVoltages {
    pub voltages: Vec<f32>,
    pub total_voltage: f32,
    pub extension: Option<CellExtension>,
}

impl CellVoltages {
    pub fn min_size(config: &Config) -> usize {
        PAYLOAD_OFFSET
            + 2 * usize::from(config.cells())
            + config.version().cell_extension_length()
            + CHECKSUM_LENGTH
    }

    pub fn decode(frame: &[u8], config: &Config) -> std::result::Result<Self, Error> {
        validate(frame, Self::min_size(config))?;
        let n_cells = usize::from(config.cells());
        let mut voltages = Vec::with_capacity(n_cells);
        let mut total_voltage = 0.0;
        for (n_cell, pair) in frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 2 * n_cells]
            .chunks_exact(2)
            .enumerate()
        {
            let volt = voltage(pair[0], pair[1]);
            log::trace!("Cell #{} volt={}", n_cell + 1, volt);
            total_voltage += volt;
            voltages.push(volt);
        }

        let extension_offset = PAYLOAD_OFFSET + 2 * n_cells;
        let extension = match config.version() {
            ProtocolVersion::V125 | ProtocolVersion::V126 => Some(CellExtension::Capacity {
                wh: capacity(&frame[extension_offset..extension_offset + 4]),
                ah: capacity(&frame[extension_offset + 4..extension_offset + 8]),
            }),
            ProtocolVersion::V122 => Some(CellExtension::StateOfCharge(frame[extension_offset])),
            version @ (ProtocolVersion::V121 | ProtocolVersion::V124) => {
                log::warn!("Protocol {} has no cell voltage trailer, publishing cells only", version);
                None
            }
        };
        log::trace!("Battery volt={} extension={:?}", total_voltage, extension);

        Ok(Self {
            voltages,
            total_voltage,
            extension,
        })
    }
}

/// V1.26 trailer of the system status frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StatusExtension {
    pub discharge_end_voltage: f32,
    pub charge_protection: ProtectionStatus,
    pub discharge_protection: ProtectionStatus,
}

/// Command 0x57: measured values reported by the main control board.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SystemStatus {
    pub charge_end_voltage: f32,
    pub mode: Mode,
    pub current: f32, // negative=discharging, positive=charging
    pub temperature_1: f32,
    pub temperature_2: f32,
    pub soc_percent: u8,
    pub extension: Option<StatusExtension>,
}

impl SystemStatus {
    pub fn min_size(config: &Config) -> usize {
        if config.version().has_status_extension() {
            SYSTEM_STATUS_LENGTH + SYSTEM_STATUS_EXTENSION_LENGTH
        } else {
            SYSTEM_STATUS_LENGTH
        }
    }

    pub fn decode(frame: &[u8], config: &Config) -> std::result::Result<Self, Error> {
        validate(frame, Self::min_size(config))?;
        let mode = Mode::try_from(frame[6])?;
        let mut current = tenths(frame[7], frame[8]);
        if mode == Mode::Discharge {
            current = -current;
        }
        let extension = if config.version().has_status_extension() {
            Some(StatusExtension {
                discharge_end_voltage: voltage(frame[14], frame[15]),
                charge_protection: ProtectionStatus::try_from(frame[16])?,
                discharge_protection: ProtectionStatus::try_from(frame[17])?,
            })
        } else {
            None
        };

        let status = Self {
            charge_end_voltage: voltage(frame[4], frame[5]),
            mode,
            current,
            temperature_1: tenths(frame[9], frame[10]),
            temperature_2: tenths(frame[11], frame[12]),
            soc_percent: frame[13],
            extension,
        };
        log::trace!("System status: {:?}", status);
        Ok(status)
    }
}

/// Command 0x58: cell impedances, sent when the unit switches between charge and discharge.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CellImpedance {
    pub mode: Mode,
    pub current: f32,
    pub impedances: Vec<f32>, // milliohm
    pub total_impedance: f32,
}

impl CellImpedance {
    pub fn min_size(config: &Config) -> usize {
        PAYLOAD_OFFSET + IMPEDANCE_PREFIX_LENGTH + 2 * usize::from(config.cells()) + CHECKSUM_LENGTH
    }

    /// Units in the field declare a different frame length than they send
    /// (a 16T declares 40 bytes and sends 59), so a declared length mismatch
    /// is logged and tolerated here. Short frames and bad checksums are not.
    ///
    /// When the declared length fits inside the read, the checksum sits at
    /// the declared end and anything after it (usually the next frame) is
    /// ignored. Otherwise the last byte of the read is the checksum.
    pub fn decode(frame: &[u8], config: &Config) -> std::result::Result<Self, Error> {
        let min_size = Self::min_size(config);
        validate_len(frame, min_size)?;
        let declared = usize::from(frame[LENGTH_OFFSET]);
        if declared != frame.len() {
            log::debug!(
                "Impedance frame length mismatch ignored - declared={} received={}",
                declared,
                frame.len()
            );
        }
        if (min_size..=frame.len()).contains(&declared) {
            validate_checksum(&frame[..declared])?;
        } else {
            validate_checksum(frame)?;
        }

        let mode = Mode::try_from(frame[PAYLOAD_OFFSET])?;
        // Low byte first, unlike the current in the system status frame.
        let current = u16::from_le_bytes([frame[5], frame[6]]) as f32 / 10.0;

        let n_cells = usize::from(config.cells());
        let start = PAYLOAD_OFFSET + IMPEDANCE_PREFIX_LENGTH;
        let mut impedances = Vec::with_capacity(n_cells);
        let mut total_impedance = 0.0;
        for (n_cell, pair) in frame[start..start + 2 * n_cells]
            .chunks_exact(2)
            .enumerate()
        {
            let impedance = u16::from_le_bytes([pair[0], pair[1]]) as f32 / 10.0;
            log::trace!("Cell #{} impedance={}mOhm", n_cell + 1, impedance);
            total_impedance += impedance;
            impedances.push(impedance);
        }

        Ok(Self {
            mode,
            current,
            impedances,
            total_impedance,
        })
    }
}

/// Assembles a frame with a correct length byte and checksum.
#[cfg(test)]
pub(crate) fn build_frame(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + PAYLOAD_OFFSET + CHECKSUM_LENGTH);
    frame.extend_from_slice(&HEADER);
    frame.push(command as u8);
    frame.push((payload.len() + PAYLOAD_OFFSET + CHECKSUM_LENGTH) as u8);
    frame.extend_from_slice(payload);
    frame.push(0);
    let len = frame.len();
    frame[len - 1] = checksum(&frame);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ToMetrics;

    const SYSTEM_FRAME: [u8; 15] = [
        0x24, 0x24, 0x57, 0x0F, 0x10, 0x68, 0x02, 0x00, 0x00, 0xFF, 0x21, 0xFF, 0x21, 0x00, 0x68,
    ];

    const CELL_FRAME: [u8; 22] = [
        0x24, 0x24, 0x56, 0x16, 0x00, 0x0A, 0x00, 0x0A, 0x00, 0x09, 0x00, 0x0B, 0x00, 0x0D, 0x00,
        0x11, 0x00, 0x01, 0x00, 0x15, 0x00, 0x10,
    ];

    fn config(version: ProtocolVersion, cells: u8) -> Config {
        Config::new(version, cells).unwrap()
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn checksum_of_empty_and_single_byte_is_zero() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xAB]), 0);
    }

    #[test]
    fn checksum_wraps_modulo_256() {
        assert_eq!(checksum(&[0xFF, 0x02, 0x00]), 0x01);
        assert_eq!(checksum(&SYSTEM_FRAME), 0x68);
        assert_eq!(checksum(&CELL_FRAME), 0x10);
    }

    #[test]
    fn reference_frames_are_valid() {
        assert!(validate(&SYSTEM_FRAME, 15).is_ok());
        assert!(validate(&CELL_FRAME, 22).is_ok());
    }

    #[test]
    fn any_single_byte_change_breaks_the_checksum() {
        for i in 0..SYSTEM_FRAME.len() - 1 {
            if i == LENGTH_OFFSET {
                continue;
            }
            let mut frame = SYSTEM_FRAME;
            frame[i] = frame[i].wrapping_add(1);
            assert!(
                matches!(
                    validate(&frame, 15),
                    Err(Error::FrameChecksumMismatch { .. })
                ),
                "byte {i}"
            );
        }
    }

    #[test]
    fn wrong_declared_length_is_a_length_mismatch() {
        let mut frame = SYSTEM_FRAME;
        frame[LENGTH_OFFSET] = 0x10;
        assert!(matches!(
            validate(&frame, 15),
            Err(Error::FrameLengthMismatch {
                declared: 16,
                received: 15
            })
        ));
    }

    #[test]
    fn truncated_frame_is_too_short() {
        assert!(matches!(
            validate(&SYSTEM_FRAME[..10], 15),
            Err(Error::FrameTooShort {
                required: 15,
                received: 10
            })
        ));
        assert!(matches!(
            validate(&[0x24, 0x24], 0),
            Err(Error::FrameTooShort { .. })
        ));
    }

    #[test]
    fn classify_by_command_tag() {
        assert_eq!(
            Packet::classify(&SYSTEM_FRAME).unwrap(),
            Packet::SystemStatus(&SYSTEM_FRAME)
        );
        assert_eq!(
            Packet::classify(&CELL_FRAME).unwrap(),
            Packet::CellVoltages(&CELL_FRAME)
        );
        assert_eq!(
            Packet::classify(&[0x24, 0x24, 0x59, 0x05, 0x00]).unwrap(),
            Packet::Unrecognized(0x59)
        );
        assert!(matches!(
            Packet::classify(&[0x24, 0x25, 0x57, 0x05, 0x00]),
            Err(Error::UnexpectedHeader)
        ));
    }

    #[test]
    fn decode_reference_system_frame() {
        let status = SystemStatus::decode(&SYSTEM_FRAME, &config(ProtocolVersion::V122, 8)).unwrap();
        assert!(approx(status.charge_end_voltage, 4.2));
        assert_eq!(status.mode, Mode::Storage);
        assert_eq!(status.current, 0.0);
        assert!(approx(status.temperature_1, 6531.3));
        assert!(approx(status.temperature_2, 6531.3));
        assert_eq!(status.soc_percent, 0);
        assert_eq!(status.extension, None);
    }

    #[test]
    fn discharge_current_is_negative() {
        let frame = build_frame(
            Command::SystemStatus,
            &[0x10, 0x68, 0x00, 0x00, 0x7B, 0x00, 0xFA, 0x01, 0x04, 0x50],
        );
        let status = SystemStatus::decode(&frame, &config(ProtocolVersion::V122, 8)).unwrap();
        assert_eq!(status.mode, Mode::Discharge);
        assert!(approx(status.current, -12.3));
        assert!(approx(status.temperature_1, 25.0));
        assert!(approx(status.temperature_2, 26.0));
        assert_eq!(status.soc_percent, 80);
    }

    #[test]
    fn decode_v126_system_extension() {
        let frame = build_frame(
            Command::SystemStatus,
            &[
                0x10, 0x68, 0x01, 0x00, 0x0A, 0x00, 0xFA, 0x00, 0xFA, 0x32, 0x0B, 0xB8, 0x01,
                0x00,
            ],
        );
        let status = SystemStatus::decode(&frame, &config(ProtocolVersion::V126, 8)).unwrap();
        assert_eq!(status.mode, Mode::Charge);
        assert!(approx(status.current, 1.0));
        assert_eq!(
            status.extension,
            Some(StatusExtension {
                discharge_end_voltage: 3.0,
                charge_protection: ProtectionStatus::Protection,
                discharge_protection: ProtectionStatus::Release,
            })
        );
    }

    #[test]
    fn v126_requires_the_extended_system_frame() {
        assert!(matches!(
            SystemStatus::decode(&SYSTEM_FRAME, &config(ProtocolVersion::V126, 8)),
            Err(Error::FrameTooShort {
                required: 19,
                received: 15
            })
        ));
    }

    #[test]
    fn unknown_mode_drops_the_frame() {
        let frame = build_frame(
            Command::SystemStatus,
            &[0x10, 0x68, 0x07, 0x00, 0x00, 0x00, 0xFA, 0x00, 0xFA, 0x32],
        );
        assert!(matches!(
            SystemStatus::decode(&frame, &config(ProtocolVersion::V122, 8)),
            Err(Error::UnknownMode(7))
        ));
    }

    #[test]
    fn unknown_protection_status_drops_the_frame() {
        let frame = build_frame(
            Command::SystemStatus,
            &[
                0x10, 0x68, 0x01, 0x00, 0x0A, 0x00, 0xFA, 0x00, 0xFA, 0x32, 0x0B, 0xB8, 0x00,
                0x02,
            ],
        );
        assert!(matches!(
            SystemStatus::decode(&frame, &config(ProtocolVersion::V126, 8)),
            Err(Error::UnknownProtectionStatus(2))
        ));
    }

    #[test]
    fn decode_reference_cell_frame() {
        let cells = CellVoltages::decode(&CELL_FRAME, &config(ProtocolVersion::V122, 8)).unwrap();
        let expected = [0.010, 0.010, 0.009, 0.011, 0.013, 0.017, 0.001, 0.021];
        assert_eq!(cells.voltages.len(), expected.len());
        for (volt, expected) in cells.voltages.iter().zip(expected) {
            assert!(approx(*volt, expected));
        }
        assert_eq!(format!("{:.2}", cells.total_voltage), "0.09");
        assert_eq!(cells.extension, Some(CellExtension::StateOfCharge(0)));
    }

    #[test]
    fn large_capacity_keeps_every_digit() {
        let mut payload = vec![0x0C, 0xE4, 0x0C, 0xE5];
        payload.extend_from_slice(&20_000_001u32.to_le_bytes());
        payload.extend_from_slice(&123_456_789u32.to_le_bytes());
        let frame = build_frame(Command::CellVoltages, &payload);
        let cells = CellVoltages::decode(&frame, &config(ProtocolVersion::V126, 2)).unwrap();
        let lines: Vec<String> = cells
            .to_metrics("BMS_A")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines[2], "BMS_A{mode=\"capacity_wh\"} 20000.001");
        assert_eq!(lines[3], "BMS_A{mode=\"capacity_ah\"} 123456.789");
    }

    #[test]
    fn decode_capacity_extension() {
        let mut payload = vec![0x0C, 0xE4, 0x0C, 0xE5];
        payload.extend_from_slice(&1_234_567u32.to_le_bytes());
        payload.extend_from_slice(&105_500u32.to_le_bytes());
        let frame = build_frame(Command::CellVoltages, &payload);
        let cells = CellVoltages::decode(&frame, &config(ProtocolVersion::V125, 2)).unwrap();
        assert!(approx(cells.voltages[0], 3.300));
        assert!(approx(cells.voltages[1], 3.301));
        match cells.extension {
            Some(CellExtension::Capacity { wh, ah }) => {
                assert_eq!(wh, 1234.567);
                assert_eq!(ah, 105.5);
            }
            other => panic!("unexpected extension {other:?}"),
        }
    }

    #[test]
    fn versions_without_cell_extension_still_decode_voltages() {
        let frame = build_frame(Command::CellVoltages, &[0x0C, 0xE4, 0x0C, 0xE4]);
        for version in [ProtocolVersion::V121, ProtocolVersion::V124] {
            let cells = CellVoltages::decode(&frame, &config(version, 2)).unwrap();
            assert_eq!(cells.voltages.len(), 2);
            assert_eq!(cells.extension, None);
        }
    }

    #[test]
    fn cell_count_and_total_for_every_configuration() {
        for version in ProtocolVersion::ALL {
            for n_cells in 1..=MAX_CELLS {
                let cfg = config(version, n_cells);
                let mut payload: Vec<u8> = (0..n_cells)
                    .flat_map(|n| (3000u16 + 7 * u16::from(n)).to_be_bytes())
                    .collect();
                payload.resize(CellVoltages::min_size(&cfg) - 5, 0x00);
                let frame = build_frame(Command::CellVoltages, &payload);

                let cells = CellVoltages::decode(&frame, &cfg).unwrap();
                assert_eq!(cells.voltages.len(), usize::from(n_cells));
                let sum: f32 = cells.voltages.iter().sum();
                assert_eq!(
                    format!("{:.2}", cells.total_voltage),
                    format!("{:.2}", sum)
                );

                let lines: Vec<String> = cells
                    .to_metrics(cfg.metric_name())
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                let cell_lines = lines.iter().filter(|l| l.contains("CellNum")).count();
                assert_eq!(cell_lines, usize::from(n_cells));
                assert_eq!(
                    lines.last().unwrap(),
                    &format!("BMS_A{{mode=\"aggVolts\"}} {:.2}", sum)
                );
            }
        }
    }

    #[test]
    fn short_cell_frame_is_not_decoded() {
        let frame = build_frame(Command::CellVoltages, &[0x0C, 0xE4, 0x0C, 0xE4, 0x50]);
        assert!(matches!(
            CellVoltages::decode(&frame, &config(ProtocolVersion::V122, 3)),
            Err(Error::FrameTooShort { .. })
        ));
    }

    #[test]
    fn decode_impedance_with_swapped_current() {
        let frame = build_frame(
            Command::CellImpedance,
            &[0x01, 0x2C, 0x01, 0x0F, 0x00, 0x1E, 0x00],
        );
        let impedance = CellImpedance::decode(&frame, &config(ProtocolVersion::V126, 2)).unwrap();
        assert_eq!(impedance.mode, Mode::Charge);
        assert!(approx(impedance.current, 30.0));
        assert!(approx(impedance.impedances[0], 1.5));
        assert!(approx(impedance.impedances[1], 3.0));
        assert!(approx(impedance.total_impedance, 4.5));
    }

    #[test]
    fn impedance_tolerates_declared_length_mismatch() {
        let mut frame = build_frame(
            Command::CellImpedance,
            &[0x00, 0x0A, 0x00, 0x0F, 0x00, 0x1E, 0x00],
        );
        frame[LENGTH_OFFSET] = 40;
        let len = frame.len();
        frame[len - 1] = checksum(&frame);
        let impedance = CellImpedance::decode(&frame, &config(ProtocolVersion::V126, 2)).unwrap();
        assert_eq!(impedance.mode, Mode::Discharge);
        assert!(approx(impedance.current, 1.0));
    }

    #[test]
    fn impedance_followed_by_status_frame_in_one_read() {
        let mut payload = vec![0x01, 0x0A, 0x00];
        for cell in 0..16u8 {
            payload.extend_from_slice(&[10 + cell, 0x00]);
        }
        let mut read = build_frame(Command::CellImpedance, &payload);
        assert_eq!(read.len(), 40);
        read.extend_from_slice(&build_frame(
            Command::SystemStatus,
            &[
                0x10, 0x68, 0x01, 0x00, 0x0A, 0x00, 0xFA, 0x00, 0xFA, 0x32, 0x0B, 0xB8, 0x00,
                0x01,
            ],
        ));
        assert_eq!(read.len(), 59);

        let impedance = CellImpedance::decode(&read, &config(ProtocolVersion::V126, 16)).unwrap();
        assert_eq!(impedance.mode, Mode::Charge);
        assert!(approx(impedance.current, 1.0));
        assert_eq!(impedance.impedances.len(), 16);
        assert!(approx(impedance.impedances[0], 1.0));
        assert!(approx(impedance.impedances[15], 2.5));

        // Checksum at the declared end still guards the impedance bytes.
        read[20] ^= 0x01;
        assert!(matches!(
            CellImpedance::decode(&read, &config(ProtocolVersion::V126, 16)),
            Err(Error::FrameChecksumMismatch { .. })
        ));
    }

    #[test]
    fn impedance_still_checks_checksum_and_size() {
        let mut frame = build_frame(
            Command::CellImpedance,
            &[0x00, 0x0A, 0x00, 0x0F, 0x00, 0x1E, 0x00],
        );
        let cfg = config(ProtocolVersion::V126, 2);
        assert!(matches!(
            CellImpedance::decode(&frame[..8], &cfg),
            Err(Error::FrameTooShort { .. })
        ));
        frame[7] ^= 0x01;
        assert!(matches!(
            CellImpedance::decode(&frame, &cfg),
            Err(Error::FrameChecksumMismatch { .. })
        ));
    }

    #[test]
    fn config_rejects_cell_count_out_of_range() {
        assert!(matches!(
            Config::new(ProtocolVersion::V122, 0),
            Err(Error::RangeError)
        ));
        assert!(matches!(
            Config::new(ProtocolVersion::V122, 25),
            Err(Error::RangeError)
        ));
        assert!(Config::new(ProtocolVersion::V122, 24).is_ok());
    }

    #[test]
    fn protocol_version_from_str() {
        assert_eq!(
            "V126".parse::<ProtocolVersion>().unwrap(),
            ProtocolVersion::V126
        );
        assert_eq!(
            "v122".parse::<ProtocolVersion>().unwrap(),
            ProtocolVersion::V122
        );
        assert!(matches!(
            "V123".parse::<ProtocolVersion>(),
            Err(Error::UnsupportedProtocolVersion(_))
        ));
    }
}
