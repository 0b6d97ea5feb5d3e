//! Modified UTF-8, the string encoding of class files and JNI
//!
//! Differs from standard UTF-8 in two ways: `U+0000` is encoded as the two
//! bytes `C0 80`, and supplementary characters are encoded as a surrogate pair
//! of two 3-byte sequences.

/// Encode a Rust string as modified UTF-8
#[must_use]
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8, `None` if the bytes are malformed
#[must_use]
pub fn decode(bytes: &[u8]) -> Option<String> {
    // Pure ASCII (the common case for names) needs no transcoding
    if bytes.iter().all(|&b| (0x01..0x80).contains(&b)) {
        return std::str::from_utf8(bytes).ok().map(str::to_owned);
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = u16::from(bytes[i]);
        let cont = |at: usize| -> Option<u16> {
            bytes.get(at).filter(|&&b| b & 0xC0 == 0x80).map(|&b| u16::from(b & 0x3F))
        };
        match b0 {
            0x01..=0x7F => {
                units.push(b0);
                i += 1;
            }
            0xC0..=0xDF => {
                units.push(((b0 & 0x1F) << 6) | cont(i + 1)?);
                i += 2;
            }
            0xE0..=0xEF => {
                units.push(((b0 & 0x0F) << 12) | (cont(i + 1)? << 6) | cont(i + 2)?);
                i += 3;
            }
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

/// Decode modified UTF-8, replacing anything malformed
#[must_use]
pub fn decode_lossy(bytes: &[u8]) -> String {
    decode(bytes).unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_is_unchanged() {
        assert_eq!(encode("com/acme/Widget"), b"com/acme/Widget");
        assert_eq!(decode(b"run").as_deref(), Some("run"));
    }

    #[test]
    fn test_nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']).as_deref(), Some("a\0b"));
    }

    #[test]
    fn test_supplementary_uses_surrogate_pair() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode(&encoded).as_deref(), Some("\u{1F600}"));
    }

    #[test]
    fn test_two_and_three_byte_forms() {
        for s in ["caf\u{e9}", "\u{4e2d}\u{6587}", "$lambda$\u{3bb}"] {
            assert_eq!(decode(&encode(s)).as_deref(), Some(s));
        }
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(decode(&[0x00]), None);
        assert_eq!(decode(&[0xC3]), None);
        assert_eq!(decode(&[0xF0, 0x9F, 0x98, 0x80]), None);
        assert_eq!(decode_lossy(&[b'o', b'k', 0xFF]), "ok\u{fffd}");
    }
}
