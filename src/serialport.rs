use crate::session::ChunkSource;
use crate::Error;
use std::io::{ErrorKind, Read};
use std::time::Duration;

pub const BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

// The unit sends frames of at most 61 bytes; one read rarely holds more than one.
const READ_BUFFER_LENGTH: usize = 256;

/// Receive-only RS232 link to the Chargery main unit.
#[derive(Debug)]
pub struct ChargeryLink {
    serial: Box<dyn serialport::SerialPort>,
}

impl ChargeryLink {
    pub fn new(port: &str) -> Result<Self, Error> {
        Self::with_timeout(port, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(port: &str, timeout: Duration) -> Result<Self, Error> {
        let serial = serialport::new(port, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|source| Error::LinkUnavailable {
                device: port.to_string(),
                source,
            })?;
        log::debug!("Opened {port} at {BAUD_RATE} baud, timeout={timeout:?}");
        Ok(Self { serial })
    }
}

impl ChunkSource for ChargeryLink {
    fn read_chunk(&mut self) -> Result<Vec<u8>, Error> {
        let mut rx_buffer = vec![0; READ_BUFFER_LENGTH];
        match self.serial.read(rx_buffer.as_mut_slice()) {
            Ok(received) => {
                rx_buffer.truncate(received);
                Ok(rx_buffer)
            }
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}
