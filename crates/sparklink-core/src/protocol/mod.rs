//! Serial Protocol Communication
//!
//! Implements the fixed 64-byte frame protocol spoken by the ignition unit.
//!
//! Frame layout:
//! - 4 bytes: start marker `01 02 03 04`
//! - 1 byte: command code
//! - 1 byte: response code
//! - 1 byte: reserved
//! - 55 bytes: payload
//! - 2 bytes: CRC-16/CCITT-FALSE of bytes 4..62 (big-endian)

pub mod checksum;
mod codec;
pub mod commands;
mod error;
mod packet;
pub mod serial;
mod stream;

pub use checksum::checksum;
pub use codec::{FrameSynchronizer, SyncStats};
pub use commands::Command;
pub use error::ProtocolError;
pub use packet::{Frame, Packet};
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::Transport;

/// Total size of one frame on the wire
pub const FRAME_SIZE: usize = 64;

/// Start marker that opens every frame
pub const START_MARKER: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

/// Payload bytes carried by one frame
pub const PAYLOAD_SIZE: usize = 55;

/// Offset of the command byte
pub const COMMAND_OFFSET: usize = 4;

/// Offset of the response code byte
pub const RESPONSE_OFFSET: usize = 5;

/// Offset of the reserved byte
pub const RESERVED_OFFSET: usize = 6;

/// Offset of the first payload byte
pub const PAYLOAD_OFFSET: usize = 7;

/// Offset of the big-endian checksum
pub const CHECKSUM_OFFSET: usize = PAYLOAD_OFFSET + PAYLOAD_SIZE;

/// Response code the host puts in every frame it sends
pub const RESPONSE_OK: u8 = 0x00;

/// Default baud rate for the ignition unit
pub const DEFAULT_BAUD_RATE: u32 = 115200;
