//! PETSCII text codec for the C64 lower/upper case character set.
//!
//! Every string stored in a `.car` archive (record names, the magic string and
//! the header note) goes through this codec. Only the printable subset that
//! maps cleanly onto Unicode is supported; graphics characters and control
//! codes other than carriage return are rejected.

use crate::error::{CarError, Result};

/// Shifted space, used to pad record names.
pub const SHIFTED_SPACE: u8 = 0xA0;

const CARRIAGE_RETURN: u8 = 0x0D;

fn encode_char(c: char) -> Option<u8> {
    let byte = match c {
        // space, punctuation, digits and '@' share their ASCII codes
        ' '..='@' => c as u8,
        'a'..='z' => c as u8 - b'a' + 0x41,
        'A'..='Z' => c as u8 - b'A' + 0xC1,
        '[' => 0x5B,
        '£' => 0x5C,
        ']' => 0x5D,
        '↑' => 0x5E,
        '←' => 0x5F,
        '\u{a0}' => SHIFTED_SPACE,
        '\r' => CARRIAGE_RETURN,
        _ => return None,
    };
    Some(byte)
}

fn decode_byte(b: u8) -> Option<char> {
    let c = match b {
        0x20..=0x40 => b as char,
        0x41..=0x5A => (b - 0x41 + b'a') as char,
        0x61..=0x7A => (b - 0x61 + b'A') as char,
        0xC1..=0xDA => (b - 0xC1 + b'A') as char,
        0x5B => '[',
        0x5C => '£',
        0x5D => ']',
        0x5E => '↑',
        0x5F => '←',
        SHIFTED_SPACE => '\u{a0}',
        CARRIAGE_RETURN => '\r',
        _ => return None,
    };
    Some(c)
}

/// Encodes `text` into PETSCII.
pub fn encode(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| encode_char(c).ok_or_else(|| CarError::Encoding(c.to_string())))
        .collect()
}

/// Decodes PETSCII `bytes` back into a string.
pub fn decode(bytes: &[u8]) -> Result<String> {
    bytes
        .iter()
        .map(|&b| decode_byte(b).ok_or_else(|| CarError::Encoding(format!("byte 0x{b:02X}"))))
        .collect()
}

/// Length of `text` once encoded, without allocating the encoding.
pub fn encoded_len(text: &str) -> Result<usize> {
    text.chars().try_fold(0usize, |len, c| {
        encode_char(c)
            .map(|_| len + 1)
            .ok_or_else(|| CarError::Encoding(c.to_string()))
    })
}

/// Encodes `text` into a field of exactly `width` bytes, filling the tail with `pad`.
pub fn encode_padded(text: &str, width: usize, pad: u8, field: &str) -> Result<Vec<u8>> {
    let mut bytes = encode(text)?;
    if bytes.len() > width {
        return Err(CarError::Validation(format!(
            "{field} '{text}' is {} bytes, the limit is {width}",
            bytes.len()
        )));
    }
    bytes.resize(width, pad);
    Ok(bytes)
}

/// Decodes a fixed-width field, dropping trailing `pad` bytes.
pub fn decode_padded(bytes: &[u8], pad: u8) -> Result<String> {
    let end = bytes.iter().rposition(|&b| b != pad).map_or(0, |i| i + 1);
    decode(&bytes[..end])
}
