//! Byte sinks for the binary emitter.
//!
//! One `Writer` trait serves three consumers: the in-memory buffer used for
//! whole-file emission and tests, the file-backed writer used by the CLI,
//! and the deduplicator's private serialization buffers. The file and memory
//! writers accumulate an Adler-32 checksum over every byte written while
//! counting is enabled and back-patch it into the header slot afterwards.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write as IoWrite};
use std::path::Path;

use adler32::RollingAdler32;

use crate::leb128::{encode_sleb128, encode_uleb128};

pub trait Writer {
    fn write_byte(&mut self, byte: u8) -> bool;

    fn write_bytes(&mut self, bytes: &[u8]) -> bool;

    fn offset(&self) -> usize;

    fn count_checksum(&mut self, _counting: bool) {}

    fn write_checksum(&mut self, _offset: usize) -> bool {
        false
    }

    /// Pads with zero bytes up to the next multiple of `alignment`.
    fn align(&mut self, alignment: usize) -> bool {
        let offset = self.offset();
        let mut n = offset.next_multiple_of(alignment) - offset;
        while n > 0 {
            if !self.write_byte(0) {
                return false;
            }
            n -= 1;
        }
        true
    }

    fn write_u16(&mut self, v: u16) -> bool {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_u32(&mut self, v: u32) -> bool {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_u64(&mut self, v: u64) -> bool {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_uleb128(&mut self, v: u64) -> bool {
        self.write_bytes(&encode_uleb128(v))
    }

    fn write_sleb128(&mut self, v: i64) -> bool {
        self.write_bytes(&encode_sleb128(v))
    }
}

/// Grows a byte vector; used for whole-file in-memory emission and by the
/// deduplicator (with a fake starting offset so alignment matches the final
/// layout).
pub struct MemoryWriter {
    data: Vec<u8>,
    start_offset: usize,
    checksum: RollingAdler32,
    count_checksum: bool,
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::with_start_offset(0)
    }

    pub fn with_start_offset(start_offset: usize) -> Self {
        Self {
            data: Vec::new(),
            start_offset,
            checksum: RollingAdler32::new(),
            count_checksum: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn checksum(&self) -> u32 {
        self.checksum.hash()
    }
}

impl Writer for MemoryWriter {
    fn write_byte(&mut self, byte: u8) -> bool {
        if self.count_checksum {
            self.checksum.update(byte);
        }
        self.data.push(byte);
        true
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.count_checksum {
            self.checksum.update_buffer(bytes);
        }
        self.data.extend_from_slice(bytes);
        true
    }

    fn offset(&self) -> usize {
        self.start_offset + self.data.len()
    }

    fn count_checksum(&mut self, counting: bool) {
        self.count_checksum = counting;
    }

    fn write_checksum(&mut self, offset: usize) -> bool {
        let value = self.checksum.hash().to_le_bytes();
        let offset = offset - self.start_offset;
        if offset + 4 > self.data.len() {
            return false;
        }
        self.data[offset..offset + 4].copy_from_slice(&value);
        true
    }
}

/// Streams to a file on disk, counting the checksum on the way out.
pub struct FileWriter {
    file: File,
    offset: usize,
    checksum: RollingAdler32,
    count_checksum: bool,
}

impl FileWriter {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            offset: 0,
            checksum: RollingAdler32::new(),
            count_checksum: false,
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum.hash()
    }
}

impl Writer for FileWriter {
    fn write_byte(&mut self, byte: u8) -> bool {
        self.write_bytes(&[byte])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        if self.count_checksum {
            self.checksum.update_buffer(bytes);
        }
        if self.file.write_all(bytes).is_err() {
            return false;
        }
        self.offset += bytes.len();
        true
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn count_checksum(&mut self, counting: bool) {
        self.count_checksum = counting;
    }

    fn write_checksum(&mut self, offset: usize) -> bool {
        let value = self.checksum.hash();
        if self.file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return false;
        }
        if self.file.write_all(&value.to_le_bytes()).is_err() {
            return false;
        }
        self.file.seek(SeekFrom::End(0)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_pads_with_zeros() {
        let mut w = MemoryWriter::new();
        w.write_byte(0xAA);
        w.align(4);
        assert_eq!(w.data(), &[0xAA, 0, 0, 0]);
        w.align(4);
        assert_eq!(w.offset(), 4);
    }

    #[test]
    fn test_little_endian_integers() {
        let mut w = MemoryWriter::new();
        w.write_u16(0x1234);
        w.write_u32(0xAABBCCDD);
        assert_eq!(w.data(), &[0x34, 0x12, 0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn test_leb128_passthrough() {
        let mut w = MemoryWriter::new();
        w.write_uleb128(624485);
        assert_eq!(w.data(), &[0xe5, 0x8e, 0x26]);
    }

    #[test]
    fn test_checksum_window_and_backpatch() {
        let mut w = MemoryWriter::new();
        w.write_bytes(&[0u8; 8]); // outside the window
        w.write_u32(0); // checksum slot
        w.count_checksum(true);
        w.write_bytes(b"payload");
        w.count_checksum(false);
        assert!(w.write_checksum(8));

        let expected = adler32::adler32(&b"payload"[..]).unwrap();
        assert_eq!(&w.data()[8..12], &expected.to_le_bytes());
        assert_eq!(w.checksum(), expected);
    }

    #[test]
    fn test_start_offset_alignment() {
        let mut w = MemoryWriter::with_start_offset(6);
        w.align(4);
        assert_eq!(w.offset(), 8);
        assert_eq!(w.data().len(), 2);
    }
}
