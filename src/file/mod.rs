//! The binary container format.
//!
//! A file starts with a fixed 60-byte header, followed by the class-index
//! table, the literal-array-index table, the index section, the foreign
//! items, the implemented items and, last, the line-number-program index.
//! All integers are little-endian.

pub mod container;
pub mod debug;
pub mod dedup;
pub mod index;
pub mod items;
pub mod writer;

pub use container::*;
pub use items::*;
pub use writer::*;

/// `"PANDA"` padded with three nulls.
pub const MAGIC: [u8; 8] = *b"PANDA\0\0\0";

/// Format version, fixed at build time.
pub const VERSION: [u8; 4] = [0, 0, 0, 2];

/// Size of the file header in bytes: magic, checksum, version, file size,
/// foreign region, and the four count/offset index anchors.
pub const HEADER_SIZE: u32 = 60;

/// Offset of the checksum slot; the checksum covers everything after it.
pub const CHECKSUM_OFFSET: usize = 8;

/// Width of an id/offset slot.
pub const ID_SIZE: u32 = 4;

/// Number of 16-bit-indexed pools per index header (class, method, field,
/// proto).
pub const INDEX_COUNT_16: usize = 4;

/// Capacity of one 16-bit sub-index.
pub const MAX_INDEX_16: usize = 0x1_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_constants() {
        assert_eq!(MAGIC.len() + 4 + VERSION.len() + 4 * 11, HEADER_SIZE as usize);
        assert_eq!(&MAGIC[..5], b"PANDA");
        assert_eq!(CHECKSUM_OFFSET, MAGIC.len());
    }
}
