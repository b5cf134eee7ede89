//! CRC-16/CCITT-FALSE
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final XOR.
//! Catalogued as CRC-16/IBM-3740. Must match the firmware bit for bit.

use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Calculate the frame checksum over `bytes`
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Catalogue check value for CRC-16/CCITT-FALSE
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_empty_input_is_initial_value() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_single_bytes() {
        assert_eq!(checksum(&[0x00]), 0xE1F0);
        assert_eq!(checksum(&[0xFF]), 0xFF00);
    }

    #[test]
    fn test_incremental_digest_matches() {
        let data = [0x3A, 0x00, 0x00, 0x10, 0x20, 0x30];
        let mut digest = CRC16.digest();
        digest.update(&data[..2]);
        digest.update(&data[2..]);
        assert_eq!(digest.finalize(), checksum(&data));
    }
}
