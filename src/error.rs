/// Errors produced while validating, decoding and publishing Chargery frames.
///
/// Everything except `Io` and `LinkUnavailable` is recoverable: the frame in
/// question is dropped and the poll loop waits for the next transmission.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Value out of range")]
    RangeError,
    #[error("Frame too short - required={required} received={received}")]
    FrameTooShort { required: usize, received: usize },
    #[error("Frame length mismatch - declared={declared} received={received}")]
    FrameLengthMismatch { declared: usize, received: usize },
    #[error("Frame checksum mismatch - calculated={calculated:02X} received={received:02X}")]
    FrameChecksumMismatch { calculated: u8, received: u8 },
    #[error("Unexpected frame header")]
    UnexpectedHeader,
    #[error("Unexpected command tag {0:02X}")]
    UnexpectedCommand(u8),
    #[error("Unknown operating mode {0}")]
    UnknownMode(u8),
    #[error("Unknown protection status {0}")]
    UnknownProtectionStatus(u8),
    #[error("Unsupported protocol version '{0}'")]
    UnsupportedProtocolVersion(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialport")]
    #[error("Cannot open serial link '{device}': {source}")]
    LinkUnavailable {
        device: String,
        #[source]
        source: serialport::Error,
    },
}
