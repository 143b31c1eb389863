//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for frame dumps in logs and for decoding frames captured
//! from a serial sniffer on the command line.
//!
//! ## Usage
//!
//! ```rust
//! use solarlink::util::hex::{decode_hex, split_hex};
//!
//! let data = decode_hex("01 03 02 00 64").unwrap();
//! assert_eq!(split_hex(&data), "01 03 02 00 64");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Formats bytes as "01 03 02 00 64": uppercase, one space between bytes.
///
/// This is the form used whenever a partial or garbled frame is logged.
pub fn split_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Encode bytes to uppercase hex string without separators
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters. Whitespace, `:` and `-`
/// separators are stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_hex() {
        assert_eq!(split_hex(&[0x01, 0x83, 0x02, 0xC0, 0xF1]), "01 83 02 C0 F1");
        assert_eq!(split_hex(&[]), "");
        assert_eq!(split_hex(&[0x0A]), "0A");
    }

    #[test]
    fn test_encode_upper() {
        assert_eq!(encode_hex_upper(&[0xAB, 0xCD, 0x01]), "ABCD01");
    }

    #[test]
    fn test_decode_with_separators() {
        let expected = vec![0x01, 0x03, 0x02, 0x00, 0x64];
        assert_eq!(decode_hex("01 03 02 00 64").unwrap(), expected);
        assert_eq!(decode_hex("01:03-02 0064").unwrap(), expected);
        assert_eq!(decode_hex("0103020064").unwrap(), expected);
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("   "), Err(HexError::EmptyString));
        assert_eq!(decode_hex("123"), Err(HexError::OddLength(3)));
        assert!(matches!(decode_hex("GG"), Err(HexError::DecodeError(_))));
    }
}
