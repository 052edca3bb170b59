//! CRC validation for frame headers.
//!
//! Table-driven, MSB-first CRC-16 with compile-time table generation.

/// CRC parameters: polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-16/CCITT protecting the DTS-UHD frame table of contents.
pub const CRC_DTS_UHD_FTOC_ALG: Algorithm<u16> = Algorithm {
    poly: 0x1021,
    init: 0xFFFF,
};

/// Shifts `len` bits of `value` (placed in the top byte) through the polynomial.
#[inline(always)]
pub const fn crc16(poly: u16, mut value: u16, len: usize) -> u16 {
    value <<= 8;

    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 15) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc16(poly, i as u16, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc16 {
    pub poly: u16,
    pub init: u16,
    table: [u16; 256],
}

impl Crc16 {
    pub const fn new(algorithm: &Algorithm<u16>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc16_table(algorithm.poly),
        }
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u16, bytes: &[u8]) -> u16 {
        let mut i = 0;

        while i < bytes.len() {
            let index = ((crc >> 8) ^ bytes[i] as u16) & 0xFF;
            crc = self.table[index as usize] ^ (crc << 8);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u16 {
        self.update(self.init, bytes)
    }
}

#[test]
fn ccitt_check_value() {
    let crc = Crc16::new(&CRC_DTS_UHD_FTOC_ALG);
    assert_eq!(crc.checksum(b"123456789"), 0x29B1);
    assert_eq!(crc.checksum(&[]), 0xFFFF);

    let split = crc.update(crc.update(crc.init, b"1234"), b"56789");
    assert_eq!(split, 0x29B1);
}
