//! Protocol errors

use thiserror::Error;

/// Errors that can occur while framing or decoding packets
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Frame must be exactly {expected} bytes, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    #[error("Start marker missing")]
    MissingStartMarker,

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Payload too short for {what}: need {needed} bytes, got {actual}")]
    PayloadTooShort {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("Map row {0} out of range")]
    InvalidRow(u8),

    #[error("Map must be 32x32, got {rows} rows (row {row} has {cols} columns)")]
    InvalidMapShape { rows: usize, row: usize, cols: usize },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
