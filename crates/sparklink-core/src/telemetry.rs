//! Live telemetry decoding
//!
//! Payload layout of a live-data response (little-endian):
//!
//! | offset | type | field       |
//! |--------|------|-------------|
//! | 0      | u16  | rpm         |
//! | 2      | f32  | spark_angle |
//! | 6      | u32  | delay_us    |
//! | 10     | f32  | throttle    |
//! | 14     | f32  | voltage     |

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::map::round2;
use crate::protocol::ProtocolError;

/// Bytes a live-data payload must carry
pub const TELEMETRY_PAYLOAD_LEN: usize = 18;

/// One live sample from the ignition unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Engine speed
    pub rpm: u16,
    /// Ignition advance in degrees
    pub spark_angle: f32,
    /// Spark delay in microseconds
    pub delay_us: u32,
    /// Throttle position in percent
    pub throttle: f32,
    /// Measured supply voltage
    pub voltage: f32,
    /// Host time of decode
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    /// Decode a sample from a live-data payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < TELEMETRY_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooShort {
                what: "telemetry",
                needed: TELEMETRY_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        Ok(Self {
            rpm: LittleEndian::read_u16(&payload[0..2]),
            spark_angle: round2(LittleEndian::read_f32(&payload[2..6])),
            delay_us: LittleEndian::read_u32(&payload[6..10]),
            throttle: round2(LittleEndian::read_f32(&payload[10..14])),
            voltage: round2(LittleEndian::read_f32(&payload[14..18])),
            timestamp: Utc::now(),
        })
    }

    /// Encode the numeric fields the way the device sends them
    pub fn encode(&self) -> [u8; TELEMETRY_PAYLOAD_LEN] {
        let mut buf = [0u8; TELEMETRY_PAYLOAD_LEN];
        LittleEndian::write_u16(&mut buf[0..2], self.rpm);
        LittleEndian::write_f32(&mut buf[2..6], self.spark_angle);
        LittleEndian::write_u32(&mut buf[6..10], self.delay_us);
        LittleEndian::write_f32(&mut buf[10..14], self.throttle);
        LittleEndian::write_f32(&mut buf[14..18], self.voltage);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1200u16.to_le_bytes());
        payload.extend_from_slice(&12.34f32.to_le_bytes());
        payload.extend_from_slice(&500u32.to_le_bytes());
        payload.extend_from_slice(&45.67f32.to_le_bytes());
        payload.extend_from_slice(&13.80f32.to_le_bytes());
        payload
    }

    #[test]
    fn test_decode_known_values() {
        let sample = TelemetrySample::decode(&known_payload()).unwrap();
        assert_eq!(sample.rpm, 1200);
        assert_eq!(sample.spark_angle, 12.34);
        assert_eq!(sample.delay_us, 500);
        assert_eq!(sample.throttle, 45.67);
        assert_eq!(sample.voltage, 13.80);
    }

    #[test]
    fn test_decode_rounds_to_hundredths() {
        let mut payload = known_payload();
        payload[2..6].copy_from_slice(&12.3456f32.to_le_bytes());
        payload[14..18].copy_from_slice(&13.999f32.to_le_bytes());
        let sample = TelemetrySample::decode(&payload).unwrap();
        assert_eq!(sample.spark_angle, 12.35);
        assert_eq!(sample.voltage, 14.0);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut payload = known_payload();
        payload.resize(55, 0xFF);
        assert_eq!(TelemetrySample::decode(&payload).unwrap().rpm, 1200);
    }

    #[test]
    fn test_short_payload_is_error() {
        let err = TelemetrySample::decode(&known_payload()[..17]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PayloadTooShort {
                needed: 18,
                actual: 17,
                ..
            }
        ));
    }

    #[test]
    fn test_encode_matches_decode_layout() {
        let sample = TelemetrySample::decode(&known_payload()).unwrap();
        assert_eq!(sample.encode().to_vec(), known_payload());
    }
}
