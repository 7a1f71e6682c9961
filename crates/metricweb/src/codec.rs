// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reversible encoding of archive paths and instance names into
//! dot-free identifier components.
//!
//! Alphanumerics, `_` and space pass through. Every other byte becomes
//! `-XY-` with `XY` its upper-case hex value, so an encoded component never
//! contains a `.` and graphite-style names stay dot-splittable.

const HEX: &[u8; 16] = b"0123456789ABCDEF";
const DELIM: u8 = b'-';

/// Encode raw bytes.
pub fn encode_bytes(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b' ' {
            out.push(char::from(b));
        } else {
            out.push(char::from(DELIM));
            out.push(char::from(HEX[usize::from(b >> 4)]));
            out.push(char::from(HEX[usize::from(b & 0x0f)]));
            out.push(char::from(DELIM));
        }
    }
    out
}

/// Encode a UTF-8 string.
pub fn encode(raw: &str) -> String {
    encode_bytes(raw.as_bytes())
}

/// Decode to raw bytes. `None` on a malformed escape sequence.
pub fn decode_bytes(encoded: &str) -> Option<Vec<u8>> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == DELIM {
            if i + 3 >= bytes.len() || bytes[i + 3] != DELIM {
                return None;
            }
            let hi = hex_value(bytes[i + 1])?;
            let lo = hex_value(bytes[i + 2])?;
            out.push((hi << 4) | lo);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

/// Decode to a string. Malformed input (including escapes that do not form
/// valid UTF-8) yields an empty string, never a panic.
pub fn decode(encoded: &str) -> String {
    decode_bytes(encoded)
        .and_then(|raw| String::from_utf8(raw).ok())
        .unwrap_or_default()
}

// Upper-case only; the encoder never emits lower-case digits.
fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
