//! Packet encoding/decoding
//!
//! A [`Frame`] is the raw 64-byte unit on the wire and is only ever
//! constructed valid. A [`Packet`] is its decoded form.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

use super::{
    checksum, Command, ProtocolError, CHECKSUM_OFFSET, COMMAND_OFFSET, FRAME_SIZE, PAYLOAD_OFFSET,
    PAYLOAD_SIZE, RESERVED_OFFSET, RESPONSE_OFFSET, RESPONSE_OK, START_MARKER,
};

/// A validated 64-byte frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    /// Validate raw bytes as a frame
    ///
    /// Fails unless `data` is exactly 64 bytes, starts with the start marker
    /// and carries a matching checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; FRAME_SIZE] =
            data.try_into().map_err(|_| ProtocolError::InvalidFrameLength {
                expected: FRAME_SIZE,
                actual: data.len(),
            })?;

        if bytes[..START_MARKER.len()] != START_MARKER {
            return Err(ProtocolError::MissingStartMarker);
        }

        let expected = checksum(&bytes[COMMAND_OFFSET..CHECKSUM_OFFSET]);
        let actual = BigEndian::read_u16(&bytes[CHECKSUM_OFFSET..]);
        if expected != actual {
            return Err(ProtocolError::CrcMismatch { expected, actual });
        }

        Ok(Self { bytes })
    }

    /// Encode a host frame: response code and reserved byte are zero
    pub fn encode(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::assemble(command, RESPONSE_OK, 0, payload)
    }

    /// Build a frame for a known command with an empty payload
    pub fn command(command: Command) -> Self {
        Self::seal(Self::header(command.code(), RESPONSE_OK, 0))
    }

    fn assemble(
        command: u8,
        response_code: u8,
        reserved: u8,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        if payload.len() > PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: PAYLOAD_SIZE,
            });
        }

        let mut bytes = Self::header(command, response_code, reserved);
        bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        Ok(Self::seal(bytes))
    }

    fn header(command: u8, response_code: u8, reserved: u8) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[..START_MARKER.len()].copy_from_slice(&START_MARKER);
        bytes[COMMAND_OFFSET] = command;
        bytes[RESPONSE_OFFSET] = response_code;
        bytes[RESERVED_OFFSET] = reserved;
        bytes
    }

    fn seal(mut bytes: [u8; FRAME_SIZE]) -> Self {
        let crc = checksum(&bytes[COMMAND_OFFSET..CHECKSUM_OFFSET]);
        BigEndian::write_u16(&mut bytes[CHECKSUM_OFFSET..], crc);
        Self { bytes }
    }

    /// Raw command byte
    pub fn command_code(&self) -> u8 {
        self.bytes[COMMAND_OFFSET]
    }

    /// Decoded command, if the code is known
    pub fn known_command(&self) -> Option<Command> {
        Command::from_code(self.command_code())
    }

    /// Response code byte
    pub fn response_code(&self) -> u8 {
        self.bytes[RESPONSE_OFFSET]
    }

    /// Reserved byte
    pub fn reserved(&self) -> u8 {
        self.bytes[RESERVED_OFFSET]
    }

    /// Full 55-byte payload
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_OFFSET..CHECKSUM_OFFSET]
    }

    /// Checksum carried in the trailer
    pub fn checksum(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[CHECKSUM_OFFSET..])
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("command", &format_args!("{:#04x}", self.command_code()))
            .field("response_code", &self.response_code())
            .field("reserved", &self.reserved())
            .field("checksum", &format_args!("{:#06x}", self.checksum()))
            .finish()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command code
    pub command: u8,
    /// Response code (0 = OK)
    pub response_code: u8,
    /// Reserved byte; some firmware reports the payload length here
    pub reserved: u8,
    /// Full 55-byte payload
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a host packet with response code and reserved byte zeroed
    pub fn new(command: impl Into<u8>, payload: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            response_code: RESPONSE_OK,
            reserved: 0,
            payload,
        }
    }

    /// Decode a validated frame
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            command: frame.command_code(),
            response_code: frame.response_code(),
            reserved: frame.reserved(),
            payload: frame.payload().to_vec(),
        }
    }

    /// Encode back into a frame, zero-padding the payload
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Frame::assemble(
            self.command,
            self.response_code,
            self.reserved,
            &self.payload,
        )
    }

    /// Decoded command, if the code is known
    pub fn known_command(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    /// Payload bytes that carry meaning
    ///
    /// When the reserved byte holds a length in `1..=55` the payload is cut
    /// to it, otherwise the whole payload counts.
    pub fn effective_payload(&self) -> &[u8] {
        let len = match self.reserved as usize {
            n @ 1..=PAYLOAD_SIZE => n.min(self.payload.len()),
            _ => self.payload.len(),
        };
        &self.payload[..len]
    }
}

impl From<&Frame> for Packet {
    fn from(frame: &Frame) -> Self {
        Packet::from_frame(frame)
    }
}
