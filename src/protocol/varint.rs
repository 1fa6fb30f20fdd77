//! Variable-length integers
//!
//! 7 bits per byte, least significant group first, high bit set on every
//! byte except the last. Identifiers 0-127 fit in a single byte.

use crate::protocol::ProtocolError;
use bytes::BufMut;

/// Longest encoding of a `u32`
pub const MAX_VARINT_LEN: usize = 5;

/// Append `value` to `dst`
pub fn put_varint<B: BufMut>(dst: &mut B, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

/// Number of bytes `value` occupies on the wire
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Read a varint from the front of `src` without consuming it.
///
/// Returns `Ok(None)` when `src` ends in the middle of the integer, so
/// stream decoders can wait for more bytes.
pub fn peek_varint(src: &[u8]) -> Result<Option<(u32, usize)>, ProtocolError> {
    let mut value: u32 = 0;

    for (i, byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        let group = (byte & 0x7f) as u32;
        if i == MAX_VARINT_LEN - 1 && group > 0x0f {
            return Err(ProtocolError::MalformedPacket(
                "varint overflows 32 bits".to_string(),
            ));
        }
        value |= group << (7 * i);

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if src.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::MalformedPacket(
            "varint longer than 5 bytes".to_string(),
        ));
    }

    Ok(None)
}

/// Read a varint that must be complete within `src`
pub fn read_varint(src: &[u8]) -> Result<(u32, usize), ProtocolError> {
    peek_varint(src)?
        .ok_or_else(|| ProtocolError::MalformedPacket("truncated varint".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        buf
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(10), vec![0x0a]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xac, 0x02]);
        assert_eq!(encoded(u32::MAX), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn test_len_matches_encoding() {
        for value in [0, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, u32::MAX] {
            assert_eq!(varint_len(value), encoded(value).len(), "value {}", value);
        }
    }

    #[test]
    fn test_peek_incomplete() {
        assert_eq!(peek_varint(&[]).unwrap(), None);
        assert_eq!(peek_varint(&[0x80]).unwrap(), None);
        assert_eq!(peek_varint(&[0xac, 0x02, 0xff]).unwrap(), Some((300, 2)));
    }

    #[test]
    fn test_rejects_overlong() {
        assert!(peek_varint(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
        assert!(peek_varint(&[0xff, 0xff, 0xff, 0xff, 0x1f]).is_err());
    }

    #[test]
    fn test_read_requires_complete() {
        assert!(read_varint(&[0x80, 0x80]).is_err());
        assert_eq!(read_varint(&[0x05]).unwrap(), (5, 1));
    }
}
