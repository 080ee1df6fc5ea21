//! Modified UTF-8, the string encoding used on the wire.
//!
//! It differs from standard UTF-8 in two ways: the NUL character is encoded as the two-byte
//! sequence `0xC0 0x80`, and supplementary characters are encoded as a surrogate pair, each half
//! taking three bytes.

use crate::error::{Result, StreamError};

/// Number of bytes `s` occupies in modified UTF-8.
pub fn utf_length(s: &str) -> u64 {
    s.encode_utf16().map(unit_length).sum()
}

fn unit_length(c: u16) -> u64 {
    match c {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Appends the modified UTF-8 encoding of `s` to `out`.
pub fn encode_into(s: &str, out: &mut Vec<u8>) {
    for c in s.encode_utf16() {
        match c {
            0x0001..=0x007F => out.push(c as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((c >> 6) & 0x1F) as u8);
                out.push(0x80 | (c & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((c >> 12) & 0x0F) as u8);
                out.push(0x80 | ((c >> 6) & 0x3F) as u8);
                out.push(0x80 | (c & 0x3F) as u8);
            }
        }
    }
}

/// Encodes `s` into a fresh buffer.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    encode_into(s, &mut out);
    out
}

/// Decodes modified UTF-8.
///
/// Malformed sequences are a [`StreamError::UtfDataFormat`]. Unpaired surrogates, which a Rust
/// string cannot hold, are replaced with U+FFFD.
pub fn decode(bytes: &[u8]) -> Result<String> {
    if bytes.is_ascii() && !bytes.contains(&0) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|e| StreamError::UtfDataFormat(e.to_string()));
    }
    let mut units = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let b1 = bytes[pos];
        match b1 >> 4 {
            0..=7 => {
                units.push(u16::from(b1));
                pos += 1;
            }
            12 | 13 => {
                let b2 = continuation(bytes, pos, 1)?;
                units.push((u16::from(b1 & 0x1F) << 6) | u16::from(b2 & 0x3F));
                pos += 2;
            }
            14 => {
                let b2 = continuation(bytes, pos, 1)?;
                let b3 = continuation(bytes, pos, 2)?;
                units.push(
                    (u16::from(b1 & 0x0F) << 12)
                        | (u16::from(b2 & 0x3F) << 6)
                        | u16::from(b3 & 0x3F),
                );
                pos += 3;
            }
            _ => {
                return Err(StreamError::UtfDataFormat(format!(
                    "malformed input around byte {pos}"
                )));
            }
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

fn continuation(bytes: &[u8], start: usize, offset: usize) -> Result<u8> {
    match bytes.get(start + offset) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b),
        Some(_) => Err(StreamError::UtfDataFormat(format!(
            "malformed input around byte {}",
            start + offset
        ))),
        None => Err(StreamError::UtfDataFormat(
            "malformed input: partial character at end".to_string(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(utf_length("a\0b"), 4);
    }

    #[test]
    fn supplementary_characters_become_surrogate_pairs() {
        let s = "\u{1F600}";
        let bytes = encode(s);
        assert_eq!(bytes, vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(utf_length(s), 6);
        assert_eq!(decode(&bytes).unwrap(), s);
    }

    #[test]
    fn decodes_mixed_widths() {
        let s = "caf\u{e9} \u{20ac}";
        assert_eq!(decode(&encode(s)).unwrap(), s);
    }

    #[test]
    fn unpaired_surrogate_is_replaced() {
        // A lone high surrogate (U+D83D) followed by 'x'.
        let bytes = [0xED, 0xA0, 0xBD, b'x'];
        assert_eq!(decode(&bytes).unwrap(), "\u{FFFD}x");
    }

    #[test]
    fn rejects_bad_continuation() {
        assert!(matches!(
            decode(&[0xC3, 0x41]),
            Err(StreamError::UtfDataFormat(_))
        ));
        assert!(matches!(decode(&[0xE2, 0x82]), Err(StreamError::UtfDataFormat(_))));
        assert!(matches!(decode(&[0xF0, 0x80]), Err(StreamError::UtfDataFormat(_))));
    }
}
