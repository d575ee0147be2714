//! # Variable-Length Integer Encoding
//!
//! Length prefixes for key/value blobs inside a node page and for the name
//! fields of the tree descriptor. The scheme favors small values: lengths up
//! to 240 take one byte, typical serialized keys take one or two.
//!
//! ## Format
//!
//! The first byte selects the width:
//!
//! ```text
//! 0-240     value is the marker itself
//! 241-248   2 bytes: value = 240 + ((marker - 241) << 8) + next
//! 249       3 bytes: value = 2288 + (b1 << 8) + b2
//! 250       4 bytes: 3-byte big-endian payload
//! 251       5 bytes: 4-byte big-endian payload
//! 252-254   reserved
//! 255       9 bytes: 8-byte big-endian payload
//! ```
//!
//! All functions are allocation-free except the `Vec` append helpers used by
//! the page and descriptor codecs.

use eyre::{bail, ensure, Result};

/// Number of bytes `encode_varint` would produce for `value`.
pub fn varint_len(value: u64) -> usize {
    if value <= 240 {
        1
    } else if value <= 2287 {
        2
    } else if value <= 67823 {
        3
    } else if value <= 0xFF_FFFF {
        4
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Encode `value` into `buf`, returning the number of bytes written.
///
/// `buf` must have at least `varint_len(value)` bytes available.
pub fn encode_varint(value: u64, buf: &mut [u8]) -> usize {
    if value <= 240 {
        buf[0] = value as u8;
        1
    } else if value <= 2287 {
        let v = value - 240;
        buf[0] = ((v >> 8) + 241) as u8;
        buf[1] = (v & 0xFF) as u8;
        2
    } else if value <= 67823 {
        let v = value - 2288;
        buf[0] = 249;
        buf[1] = (v >> 8) as u8;
        buf[2] = (v & 0xFF) as u8;
        3
    } else if value <= 0xFF_FFFF {
        buf[0] = 250;
        buf[1] = (value >> 16) as u8;
        buf[2] = (value >> 8) as u8;
        buf[3] = value as u8;
        4
    } else if value <= 0xFFFF_FFFF {
        buf[0] = 251;
        buf[1] = (value >> 24) as u8;
        buf[2] = (value >> 16) as u8;
        buf[3] = (value >> 8) as u8;
        buf[4] = value as u8;
        5
    } else {
        buf[0] = 255;
        buf[1..9].copy_from_slice(&value.to_be_bytes());
        9
    }
}

/// Decode a varint from the front of `buf`, returning `(value, bytes_read)`.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    let first = buf[0];

    if first <= 240 {
        Ok((first as u64, 1))
    } else if first <= 248 {
        ensure!(buf.len() >= 2, "truncated 2-byte varint");
        let value = 240 + ((first as u64 - 241) << 8) + buf[1] as u64;
        Ok((value, 2))
    } else if first == 249 {
        ensure!(buf.len() >= 3, "truncated 3-byte varint");
        let value = 2288 + ((buf[1] as u64) << 8) + buf[2] as u64;
        Ok((value, 3))
    } else if first == 250 {
        ensure!(buf.len() >= 4, "truncated 4-byte varint");
        let value = ((buf[1] as u64) << 16) + ((buf[2] as u64) << 8) + buf[3] as u64;
        Ok((value, 4))
    } else if first == 251 {
        ensure!(buf.len() >= 5, "truncated 5-byte varint");
        let value = ((buf[1] as u64) << 24)
            + ((buf[2] as u64) << 16)
            + ((buf[3] as u64) << 8)
            + buf[4] as u64;
        Ok((value, 5))
    } else if first == 255 {
        ensure!(buf.len() >= 9, "truncated 9-byte varint");
        let value = u64::from_be_bytes(buf[1..9].try_into().unwrap()); // INVARIANT: length validated above
        Ok((value, 9))
    } else {
        bail!("invalid varint marker: {}", first)
    }
}

/// Append a varint to `out`.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    let mut scratch = [0u8; 9];
    let n = encode_varint(value, &mut scratch);
    out.extend_from_slice(&scratch[..n]);
}

/// Append a length-prefixed blob to `out`.
pub fn write_prefixed(out: &mut Vec<u8>, blob: &[u8]) {
    write_varint(out, blob.len() as u64);
    out.extend_from_slice(blob);
}

/// Read a length-prefixed blob from the front of `buf`.
///
/// Returns the blob and the total bytes consumed (prefix plus payload).
pub fn read_prefixed(buf: &[u8]) -> Result<(&[u8], usize)> {
    let (len, prefix) = decode_varint(buf)?;
    let len = len as usize;
    ensure!(
        buf.len() >= prefix + len,
        "length-prefixed blob runs past the buffer: need {} bytes, have {}",
        prefix + len,
        buf.len()
    );
    Ok((&buf[prefix..prefix + len], prefix + len))
}
