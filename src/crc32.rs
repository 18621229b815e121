//! ISO-3309 / V.42 CRC32 (the zlib variant): reflected, polynomial
//! `0xEDB88320`, initial value `0xFFFFFFFF`, output XORed with `0xFFFFFFFF`.

use std::sync::OnceLock;

const POLY: u32 = 0xEDB88320;

fn table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    })
}

/// Compute the CRC32 of `bytes`.
pub fn compute(bytes: &[u8]) -> u32 {
    let table = table();
    let mut crc = 0xFFFFFFFFu32;
    for &b in bytes {
        let idx = ((crc ^ b as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[idx];
    }
    crc ^ 0xFFFFFFFF
}
