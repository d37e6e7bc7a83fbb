//! Hex rendering for log payloads and snapshot raw frames.

use crate::error::{FrameError, Result};

/// Render bytes as space-separated uppercase hex pairs (`01 03 0A`).
pub fn to_hex(bytes: &[u8]) -> String {
    let packed = ::hex::encode_upper(bytes);
    let mut out = String::with_capacity(bytes.len() * 3);
    for (index, pair) in packed.as_bytes().chunks(2).enumerate() {
        if index > 0 {
            out.push(' ');
        }
        out.push(char::from(pair[0]));
        out.push(char::from(pair[1]));
    }
    out
}

/// Parse hex text, ignoring whitespace, `:` and `-` separators and an
/// optional `0x` prefix.
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != ':' && *c != '-')
        .collect();

    ::hex::decode(&digits).map_err(|err| FrameError::InvalidHex(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_spaced_uppercase() {
        assert_eq!(to_hex(&[0x01, 0xAB, 0x0F]), "01 AB 0F");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn parses_common_spellings() {
        assert_eq!(parse_hex("01 03 0a").unwrap(), vec![0x01, 0x03, 0x0A]);
        assert_eq!(parse_hex("0x0103FCD0").unwrap(), vec![0x01, 0x03, 0xFC, 0xD0]);
        assert_eq!(parse_hex("01:03-04").unwrap(), vec![0x01, 0x03, 0x04]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(matches!(parse_hex("013"), Err(FrameError::InvalidHex(_))));
        assert!(matches!(parse_hex("zz"), Err(FrameError::InvalidHex(_))));
    }
}
