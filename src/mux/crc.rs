//! Ogg page checksum: CRC-32 with polynomial 0x04C11DB7, zero initial value,
//! no reflection and no final xor.

const CRC32_POLY: u32 = 0x04C1_1DB7;

static CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ CRC32_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Continue a checksum over `data`
pub fn update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC32_TABLE[index];
    }
    crc
}

/// Checksum of a complete page given as header and body
pub fn page_checksum(header: &[u8], body: &[u8]) -> u32 {
    update(update(0, header), body)
}
