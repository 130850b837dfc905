//! LEB128 encoding helpers used by the binary writer.

#[inline(always)]
pub fn encode_uleb128(value: u64) -> Vec<u8> {
    match leb128fmt::encode_u64(value) {
        Some((buf, len)) => buf[..len].to_vec(),
        // encode_u64 accepts the full u64 range
        None => unreachable!(),
    }
}

#[inline(always)]
pub fn encode_sleb128(value: i64) -> Vec<u8> {
    match leb128fmt::encode_s64(value) {
        Some((buf, len)) => buf[..len].to_vec(),
        None => unreachable!(),
    }
}

/// Number of bytes `value` occupies in unsigned LEB128.
#[inline(always)]
pub fn uleb128_size(value: u64) -> usize {
    encode_uleb128(value).len()
}

#[inline(always)]
pub fn sleb128_size(value: i64) -> usize {
    encode_sleb128(value).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uleb128_single_byte() {
        assert_eq!(encode_uleb128(0), vec![0x00]);
        assert_eq!(encode_uleb128(127), vec![0x7f]);
    }

    #[test]
    fn test_uleb128_multi_byte() {
        assert_eq!(encode_uleb128(128), vec![0x80, 0x01]);
        assert_eq!(encode_uleb128(624485), vec![0xe5, 0x8e, 0x26]);
    }

    #[test]
    fn test_sleb128() {
        assert_eq!(encode_sleb128(-1), vec![0x7f]);
        assert_eq!(encode_sleb128(-128), vec![0x80, 0x7f]);
        assert_eq!(encode_sleb128(63), vec![0x3f]);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(uleb128_size(0), 1);
        assert_eq!(uleb128_size(1 << 14), 3);
        assert_eq!(sleb128_size(-1), 1);
    }
}
