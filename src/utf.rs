//! MUTF-8 encoding for string items.
//!
//! String items store their payload in modified UTF-8: `\0` is encoded as the
//! two-byte sequence `0xC0 0x80` and supplementary-plane characters as two
//! three-byte surrogate encodings, so the payload never contains a null byte
//! before its terminator.

pub fn str_to_mutf8(str_data_in: &str) -> Vec<u8> {
    let utf16_data_in: Vec<u16> = str_data_in.encode_utf16().collect();
    utf16_to_mutf8(&utf16_data_in)
}

/// Number of UTF-16 code units the string occupies, which is what the
/// string-item header records.
pub fn utf16_length(str_data_in: &str) -> usize {
    str_data_in.encode_utf16().count()
}

/// True if the MUTF-8 payload is byte-per-char ASCII.
pub fn is_ascii_payload(str_data_in: &str) -> bool {
    str_data_in.bytes().all(|b| b != 0 && b < 0x80)
}

fn utf16_to_mutf8(utf16_in: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(utf16_in.len());
    for ch in utf16_in {
        let ch = *ch;
        if ch != 0 && ch < 0x80 {
            out.push(ch as u8);
        } else if ch < 0x800 {
            // includes the embedded-NUL case: 0x00 -> C0 80
            out.push(((ch >> 6) | 0xC0) as u8);
            out.push(((ch & 0x3F) | 0x80) as u8);
        } else {
            out.push(((ch >> 12) | 0xE0) as u8);
            out.push((((ch >> 6) & 0x3F) | 0x80) as u8);
            out.push(((ch & 0x3F) | 0x80) as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        assert_eq!(str_to_mutf8("foobar"), b"foobar");
        assert!(is_ascii_payload("foobar"));
        assert_eq!(utf16_length("foobar"), 6);
    }

    #[test]
    fn test_embedded_nul() {
        assert_eq!(str_to_mutf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert!(!is_ascii_payload("a\0b"));
    }

    #[test]
    fn test_two_and_three_byte_forms() {
        assert_eq!(str_to_mutf8("\u{00e9}"), vec![0xC3, 0xA9]);
        assert_eq!(str_to_mutf8("\u{20ac}"), vec![0xE2, 0x82, 0xAC]);
    }

    #[test]
    fn test_supplementary_plane_as_surrogates() {
        // U+10400 -> surrogate pair D801 DC00, each encoded in three bytes
        let bytes = str_to_mutf8("\u{10400}");
        assert_eq!(bytes.len(), 6);
        assert_eq!(utf16_length("\u{10400}"), 2);
    }
}
