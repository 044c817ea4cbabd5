//! Checksum calculation for the peripheral link
//!
//! The board protects every frame with CRC-8/DVB-S2
//! (polynomial 0xD5, init 0x00, no reflection, no final XOR).

/// CRC-8/DVB-S2 generator polynomial
pub const CRC8_DVB_S2_POLY: u8 = 0xD5;

/// Fold one byte into a running CRC-8/DVB-S2 value
#[inline]
pub fn crc8_dvb_s2_update(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC8_DVB_S2_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-8/DVB-S2 over a contiguous byte slice
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &b| crc8_dvb_s2_update(crc, b))
}

/// Verify a checksum byte against the covered data
pub fn verify(data: &[u8], checksum: u8) -> bool {
    crc8_dvb_s2(data) == checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-serial polynomial division over the message extended by 8 zero bits.
    fn reference_crc(data: &[u8]) -> u8 {
        let poly: u16 = 0x100 | CRC8_DVB_S2_POLY as u16;
        let mut rem: u16 = 0;
        let bits = data
            .iter()
            .flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1))
            .chain(std::iter::repeat(0).take(8));
        for bit in bits {
            rem = (rem << 1) | bit as u16;
            if rem & 0x100 != 0 {
                rem ^= poly;
            }
        }
        rem as u8
    }

    #[test]
    fn test_check_value() {
        // Catalogue check value for "123456789"
        assert_eq!(crc8_dvb_s2(b"123456789"), 0xBC);
    }

    #[test]
    fn test_outgoing_header_matches_reference() {
        let header = [0x24, 0x50, 0x3C];
        assert_eq!(crc8_dvb_s2(&header), reference_crc(&header));
        assert_eq!(crc8_dvb_s2(&header), 0x6F);
    }

    #[test]
    fn test_matches_reference_on_all_single_bytes() {
        for b in 0..=255u8 {
            assert_eq!(crc8_dvb_s2(&[b]), reference_crc(&[b]), "byte {b:#04x}");
        }
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(crc8_dvb_s2(&[]), 0);
    }

    #[test]
    fn test_verify() {
        let data = [0x24, 0x50, 0x3C, 0x00, 0x01, 0x0D];
        assert!(verify(&data, 0x9A));
        assert!(!verify(&data, 0x9B));
    }
}
