//! Adler-32 frame checksum using adler32.

use adler32::RollingAdler32;

/// Length of an encoded checksum.
pub const CHECKSUM_LENGTH: usize = 4;

/// Checksum data, encoded big-endian.
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let mut hasher = RollingAdler32::new();
    hasher.update_buffer(data);
    hasher.hash().to_be_bytes()
}
